//! Dashboard Query (§4.5): read-only aggregations over `usage_records` for
//! the out-of-scope admin UI. Plain `sqlx::query_as` calls rather than a
//! query builder, grounded in the teacher's reporting queries in
//! `observability`; time buckets are filled with zeros in Rust rather than
//! leaning on SQLite's limited date-truncation support.

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LeaderboardRow {
    pub key: String,
    pub total_tokens: i64,
    pub request_count: i64,
}

/// Clients ranked by total tokens consumed, ties broken by request count
/// then by the client key itself, so output is deterministic.
pub async fn client_leaderboard(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<LeaderboardRow>, AppError> {
    leaderboard(pool, "client_ip", start, end).await
}

/// Models ranked the same way, grouped by `public_name`.
pub async fn model_leaderboard(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<LeaderboardRow>, AppError> {
    leaderboard(pool, "public_name", start, end).await
}

async fn leaderboard(
    pool: &SqlitePool,
    group_column: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<LeaderboardRow>, AppError> {
    // group_column only ever comes from the two callers above, never from a
    // caller-supplied string, so interpolating it into the query is safe.
    let sql = format!(
        "SELECT {group_column} AS key, SUM(input_tokens + output_tokens) AS total_tokens, \
         COUNT(*) AS request_count FROM usage_records \
         WHERE timestamp >= ? AND timestamp < ? GROUP BY {group_column}"
    );
    let mut rows: Vec<LeaderboardRow> = sqlx::query_as(&sql)
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(pool)
        .await?;

    rows.sort_by(|a, b| {
        b.total_tokens
            .cmp(&a.total_tokens)
            .then_with(|| b.request_count.cmp(&a.request_count))
            .then_with(|| a.key.cmp(&b.key))
    });
    Ok(rows)
}

#[derive(Debug, Clone, Copy)]
pub enum BucketSize {
    Minute,
    Hour,
    Day,
}

impl BucketSize {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minute" => Some(BucketSize::Minute),
            "hour" => Some(BucketSize::Hour),
            "day" => Some(BucketSize::Day),
            _ => None,
        }
    }

    fn duration(self) -> chrono::Duration {
        match self {
            BucketSize::Minute => chrono::Duration::minutes(1),
            BucketSize::Hour => chrono::Duration::hours(1),
            BucketSize::Day => chrono::Duration::days(1),
        }
    }

    fn align(self, t: DateTime<Utc>) -> DateTime<Utc> {
        let t = t.with_nanosecond(0).unwrap().with_second(0).unwrap();
        match self {
            BucketSize::Minute => t,
            BucketSize::Hour => t.with_minute(0).unwrap(),
            BucketSize::Day => t.with_minute(0).unwrap().with_hour(0).unwrap(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeBucket {
    pub bucket_start: DateTime<Utc>,
    pub request_count: u64,
    pub total_tokens: u64,
    pub avg_response_ms: f64,
}

#[derive(sqlx::FromRow)]
struct UsageRow {
    timestamp: String,
    input_tokens: i64,
    output_tokens: i64,
    response_time_ms: i64,
}

/// Request volume and token usage bucketed over `[start, end)`. Gaps with
/// no traffic are filled with zero-valued buckets so callers can render a
/// continuous time series without doing the gap-filling themselves.
pub async fn time_buckets(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    size: BucketSize,
) -> Result<Vec<TimeBucket>, AppError> {
    let rows: Vec<UsageRow> = sqlx::query_as(
        "SELECT timestamp, input_tokens, output_tokens, response_time_ms FROM usage_records \
         WHERE timestamp >= ? AND timestamp < ?",
    )
    .bind(start.to_rfc3339())
    .bind(end.to_rfc3339())
    .fetch_all(pool)
    .await?;

    let mut agg: HashMap<DateTime<Utc>, (u64, u64, u64)> = HashMap::new();
    for row in rows {
        let ts = DateTime::parse_from_rfc3339(&row.timestamp)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(start);
        let bucket = size.align(ts);
        let entry = agg.entry(bucket).or_insert((0, 0, 0));
        entry.0 += 1;
        entry.1 += (row.input_tokens + row.output_tokens) as u64;
        entry.2 += row.response_time_ms as u64;
    }

    let mut out = Vec::new();
    let mut cursor = size.align(start);
    let step = size.duration();
    while cursor < end {
        let (count, tokens, response_sum) = agg.get(&cursor).copied().unwrap_or((0, 0, 0));
        out.push(TimeBucket {
            bucket_start: cursor,
            request_count: count,
            total_tokens: tokens,
            avg_response_ms: if count > 0 {
                response_sum as f64 / count as f64
            } else {
                0.0
            },
        });
        cursor += step;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{UsageRecord, UsageStatus};
    use uuid::Uuid;

    async fn seeded_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        pool
    }

    async fn insert(pool: &SqlitePool, client_ip: &str, model: &str, tokens: u64, ts: DateTime<Utc>) {
        let record = UsageRecord {
            id: Uuid::new_v4(),
            timestamp: ts,
            client_ip: client_ip.to_string(),
            public_name: model.to_string(),
            config_id: Some(1),
            input_tokens: tokens / 2,
            output_tokens: tokens - tokens / 2,
            response_time_ms: 100,
            status: UsageStatus::Success,
            error_message: None,
        };
        sqlx::query(
            "INSERT INTO usage_records \
             (id, timestamp, client_ip, public_name, config_id, input_tokens, output_tokens, \
              response_time_ms, status, error_message) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.timestamp.to_rfc3339())
        .bind(&record.client_ip)
        .bind(&record.public_name)
        .bind(record.config_id)
        .bind(record.input_tokens as i64)
        .bind(record.output_tokens as i64)
        .bind(record.response_time_ms as i64)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn client_leaderboard_orders_by_tokens_then_ip() {
        let pool = seeded_pool().await;
        let now = Utc::now();
        insert(&pool, "1.1.1.1", "gpt-4", 100, now).await;
        insert(&pool, "2.2.2.2", "gpt-4", 300, now).await;
        let start = now - chrono::Duration::hours(1);
        let end = now + chrono::Duration::hours(1);
        let rows = client_leaderboard(&pool, start, end).await.unwrap();
        assert_eq!(rows[0].key, "2.2.2.2");
        assert_eq!(rows[0].total_tokens, 300);
    }

    #[tokio::test]
    async fn time_buckets_fill_gaps_with_zero() {
        let pool = seeded_pool().await;
        let start = Utc::now().with_nanosecond(0).unwrap().with_second(0).unwrap();
        insert(&pool, "1.1.1.1", "gpt-4", 40, start).await;
        let end = start + chrono::Duration::minutes(3);
        let buckets = time_buckets(&pool, start, end, BucketSize::Minute).await.unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].request_count, 1);
        assert_eq!(buckets[1].request_count, 0);
        assert_eq!(buckets[2].request_count, 0);
    }
}
