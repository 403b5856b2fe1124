//! Append-only conversation log.
//!
//! Every [`append`] is a committed SQLite write before it returns, so a crash
//! right after a successful append never loses the turn. Turns are never
//! edited; [`reset`] clears the whole log when a new document replaces the
//! indexed one.

use askdoc_core::models::{Role, Turn};
use sqlx::{Row, SqliteConnection};

use crate::error::{PipelineError, PipelineResult};

pub use askdoc_core::prompt::render_history as render;

/// Durably append one turn.
pub async fn append(conn: &mut SqliteConnection, turn: &Turn) -> PipelineResult<()> {
    sqlx::query("INSERT INTO turns (role, content, created_at) VALUES (?, ?, ?)")
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Load the full history in insertion order. No turns is an empty history.
pub async fn load(conn: &mut SqliteConnection) -> PipelineResult<Vec<Turn>> {
    let rows = sqlx::query("SELECT role, content FROM turns ORDER BY seq ASC")
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| {
            let tag: String = row.get("role");
            let role = Role::parse(&tag).ok_or_else(|| {
                PipelineError::PersistenceFailure(format!("unknown role tag in history: {}", tag))
            })?;
            Ok(Turn {
                role,
                content: row.get("content"),
            })
        })
        .collect()
}

/// Number of persisted turns.
pub async fn count(conn: &mut SqliteConnection) -> PipelineResult<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM turns")
        .fetch_one(&mut *conn)
        .await?;
    Ok(n)
}

/// Clear the history to an empty sequence.
pub async fn reset(conn: &mut SqliteConnection) -> PipelineResult<()> {
    sqlx::query("DELETE FROM turns").execute(&mut *conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, sqlx::SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("t.sqlite"))
            .await
            .unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        (tmp, pool)
    }

    #[tokio::test]
    async fn append_then_load_returns_turn_last() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        assert!(load(&mut conn).await.unwrap().is_empty());

        append(&mut conn, &Turn::user("first")).await.unwrap();
        append(&mut conn, &Turn::assistant("second")).await.unwrap();

        let history = load(&mut conn).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.last(), Some(&Turn::assistant("second")));
        assert_eq!(count(&mut conn).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reset_then_load_is_empty() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        append(&mut conn, &Turn::user("q")).await.unwrap();
        reset(&mut conn).await.unwrap();
        assert!(load(&mut conn).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.sqlite");
        {
            let pool = crate::db::connect_path(&path).await.unwrap();
            crate::migrate::migrate(&pool).await.unwrap();
            let mut conn = pool.acquire().await.unwrap();
            append(&mut conn, &Turn::user("persisted?")).await.unwrap();
            drop(conn);
            pool.close().await;
        }
        let pool = crate::db::connect_path(&path).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(
            load(&mut conn).await.unwrap(),
            vec![Turn::user("persisted?")]
        );
    }

    #[test]
    fn render_uses_role_lines() {
        let turns = vec![Turn::user("a"), Turn::assistant("b")];
        assert_eq!(render(&turns), "user: a\nassistant: b");
    }
}
