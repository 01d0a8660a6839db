//! Database layer for the SQLite request store.
//!
//! This module handles all database operations including:
//! - Connection pool management with WAL mode
//! - Schema migrations
//! - Conditional writes for review requests, notifications and identity lookups

pub mod notifications;
pub mod pool;
pub mod review_requests;
pub mod users;

use std::path::Path;
use thiserror::Error;

/// Database-related errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

/// Initialize the database with the default pool size.
pub async fn initialize(db_path: &Path) -> Result<pool::DbPool, DbError> {
    initialize_with(db_path, pool::DEFAULT_MAX_CONNECTIONS).await
}

/// Initialize the database: create the file if needed and run migrations.
///
/// # Arguments
/// * `db_path` - Path to the SQLite database file
/// * `max_connections` - Upper bound on pooled connections
///
/// # Returns
/// A connection pool configured with WAL mode
pub async fn initialize_with(
    db_path: &Path,
    max_connections: u32,
) -> Result<pool::DbPool, DbError> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            DbError::Migration(format!("Failed to create database directory: {}", e))
        })?;
    }

    let pool = pool::create_pool(db_path, max_connections).await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Embedded migrations, applied in order.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial_schema",
    include_str!("migrations/0001_initial_schema.sql"),
)];

/// Run all pending database migrations.
///
/// Each migration and its `_migrations` record commit together, so a
/// failed statement leaves the schema at the previous version.
async fn run_migrations(pool: &pool::DbPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    for (name, sql) in MIGRATIONS {
        let mut tx = pool.begin().await?;

        let applied: Option<(i64,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;

        if applied.is_some() {
            continue;
        }

        for statement in parse_sql_statements(sql) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::Migration(format!("{}: {}", name, e)))?;
        }

        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        log::info!("[db] Applied migration {}", name);
    }

    Ok(())
}

/// Split a migration file into statements.
///
/// A `;` ends a statement only at parenthesis depth zero and outside a
/// single-quoted literal. `--` starts a comment running to the end of the
/// line, except inside a literal. A doubled `''` inside a literal is an
/// escaped quote and toggles the literal state twice, which leaves it open.
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut paren_depth: u32 = 0;
    let mut in_string = false;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                in_string = !in_string;
                current.push(ch);
            }
            _ if in_string => current.push(ch),
            '-' if chars.peek() == Some(&'-') => {
                while chars.next_if(|&c| c != '\n').is_some() {}
            }
            '(' => {
                paren_depth += 1;
                current.push(ch);
            }
            ')' => {
                paren_depth = paren_depth.saturating_sub(1);
                current.push(ch);
            }
            ';' if paren_depth == 0 => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let statement = raw.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
}
