//! Command-line surface: `llm-bridge serve` runs the proxy runtime,
//! `llm-bridge migrate` applies pending schema migrations and exits.
//! Environment variables (§6) carry everything else; this CLI only picks
//! between the two process modes.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "llm-bridge", version, about = "Local OpenAI-compatible LLM proxy")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the proxy runtime: the two public listeners plus the admin port.
    Serve,
    /// Apply pending database migrations, then exit.
    Migrate,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serve() {
        let cli = Cli::parse_from(["llm-bridge"]);
        assert_eq!(cli.command(), Command::Serve);
    }

    #[test]
    fn parses_migrate_subcommand() {
        let cli = Cli::parse_from(["llm-bridge", "migrate"]);
        assert_eq!(cli.command(), Command::Migrate);
    }
}
