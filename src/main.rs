use clap::Parser;

mod cli;

use llm_bridge::config::EnvConfig;
use llm_bridge::{init_tracing, server};

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    let env = EnvConfig::from_env();
    init_tracing(&env.log_level);

    match args.command() {
        cli::Command::Serve => {
            if let Err(e) = server::run(env).await {
                tracing::error!(error = %e, "startup failed");
                std::process::exit(e.exit_code());
            }
        }
        cli::Command::Migrate => {
            let pool = match llm_bridge::db::connect(&env.database_path).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(error = %e, "failed to open database");
                    std::process::exit(1);
                }
            };
            if let Err(e) = llm_bridge::db::migrate(&pool).await {
                tracing::error!(error = %e, "migration failed");
                std::process::exit(2);
            }
            println!("migrations applied");
        }
    }
}
