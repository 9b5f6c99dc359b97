//! Utility to inspect the portfolio schema: columns and row counts per table.
//!
//! Pass `--migrate` to apply the bundled schema before inspecting.

use sacco_risk_api::db::Database;
use std::env;

const TABLES: [&str; 6] = [
    "clients",
    "loans",
    "repayments",
    "guarantors",
    "risk_scores",
    "loan_schedules",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("DB_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL or DB_URL must be set"))?;

    let db = Database::new(&database_url, 2).await?;
    if env::args().any(|arg| arg == "--migrate") {
        db.migrate().await?;
    }

    for table in TABLES {
        let columns: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&db.pool)
        .await?;

        if columns.is_empty() {
            println!("- {}: missing", table);
            continue;
        }

        let (rows,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&db.pool)
            .await?;

        println!("- {} ({} rows)", table, rows);
        for (col, type_, nullable) in columns {
            let marker = if nullable == "YES" { "?" } else { "" };
            println!("  - {}{}: {}", col, marker, type_);
        }
        println!();
    }

    Ok(())
}
