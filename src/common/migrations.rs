// src/common/migrations.rs
//! Database migration and schema management

use sqlx::SqlitePool;
use tracing::{info, warn};

/// Run all database migrations
///
/// Tables are created if they don't exist. When `reset` is set every table is
/// dropped first, which discards all users, sessions and conversations.
pub async fn run_migrations(pool: &SqlitePool, reset: bool) -> Result<(), sqlx::Error> {
    if reset {
        warn!("⚠️  RESET_DB=true - Dropping all tables and recreating schema...");
        drop_all_tables(pool).await?;
        info!("✅ Dropped old tables");
    } else {
        info!("ℹ️  Skipping table drop (RESET_DB not set). Tables will be created if they don't exist.");
    }

    create_identity_tables(pool).await?;
    create_chat_tables(pool).await?;
    create_session_table(pool).await?;
    create_indexes(pool).await?;

    info!("✅ Database migration completed successfully!");

    Ok(())
}

async fn drop_all_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Drop tables in reverse dependency order
    let tables = ["messages", "conversations", "auth_providers", "sessions", "users"];

    for table in tables {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(pool)
            .await?;
    }

    Ok(())
}

async fn create_identity_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Users table - email is the reconciliation anchor
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            name TEXT,
            image TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Provider identities linked to a user
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS auth_providers (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            provider TEXT NOT NULL CHECK (provider IN ('google', 'github')),
            provider_user_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            CONSTRAINT auth_providers_provider_user_unique UNIQUE (provider, provider_user_id),
            CONSTRAINT auth_providers_user_provider_unique UNIQUE (user_id, provider),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_chat_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT DEFAULT 'New Chat',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('system', 'user', 'assistant', 'tool')),
            content TEXT NOT NULL,
            tool_calls TEXT,
            tool_result TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            FOREIGN KEY(conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_session_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Server-side session store; `expire` is a unix timestamp in seconds
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            sid TEXT PRIMARY KEY,
            sess TEXT NOT NULL,
            expire INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_auth_providers_user ON auth_providers(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_conversations_user_updated ON conversations(user_id, updated_at)",
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation_created ON messages(conversation_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_sessions_expire ON sessions(expire)",
    ];

    for statement in indexes {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    /// In-memory database with the full schema applied
    pub(crate) async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        run_migrations(&pool, false).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = setup_test_db().await;
        run_migrations(&pool, false).await.unwrap();
        run_migrations(&pool, true).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();

        for expected in ["auth_providers", "conversations", "messages", "sessions", "users"] {
            assert!(names.contains(&expected), "missing table {}", expected);
        }
    }

    #[tokio::test]
    async fn test_identity_constraints() {
        let pool = setup_test_db().await;

        sqlx::query("INSERT INTO users (id, email) VALUES ('U_1', 'a@x.com')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO users (id, email) VALUES ('U_2', 'b@x.com')")
            .execute(&pool)
            .await
            .unwrap();

        // Duplicate email
        let dup = sqlx::query("INSERT INTO users (id, email) VALUES ('U_3', 'a@x.com')")
            .execute(&pool)
            .await;
        assert!(dup.is_err());

        sqlx::query(
            "INSERT INTO auth_providers (id, user_id, provider, provider_user_id) VALUES ('P_1', 'U_1', 'google', 'g-1')",
        )
        .execute(&pool)
        .await
        .unwrap();

        // Same external identity on another user
        let same_identity = sqlx::query(
            "INSERT INTO auth_providers (id, user_id, provider, provider_user_id) VALUES ('P_2', 'U_2', 'google', 'g-1')",
        )
        .execute(&pool)
        .await;
        assert!(same_identity.is_err());

        // Second google identity on the same user
        let same_provider = sqlx::query(
            "INSERT INTO auth_providers (id, user_id, provider, provider_user_id) VALUES ('P_3', 'U_1', 'google', 'g-2')",
        )
        .execute(&pool)
        .await;
        assert!(same_provider.is_err());

        // Cascade on user removal
        sqlx::query("DELETE FROM users WHERE id = 'U_1'")
            .execute(&pool)
            .await
            .unwrap();
        let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM auth_providers")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
