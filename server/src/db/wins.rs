use chrono::NaiveDateTime;
use shared::{WinCategory, Window};
use sqlx::{Sqlite, Transaction};
use tracing::instrument;

use super::{types::WinRecord, DB};

const WIN_SELECT: &str = r#"
    SELECT w.id, w.user_id, u.account_id, u.display_name, w.message, w.category, w.created_at
    FROM wins w
    JOIN users u ON u.id = w.user_id
"#;

impl DB {
    #[instrument(skip(tx, message))]
    pub async fn insert_win(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        message: &str,
        category: WinCategory,
        now: NaiveDateTime,
    ) -> sqlx::Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO wins (user_id, message, category, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(message)
        .bind(category.as_ref())
        .bind(now)
        .fetch_one(tx.as_mut())
        .await?;
        Ok(id)
    }

    pub async fn get_win_in_tx(
        tx: &mut Transaction<'static, Sqlite>,
        win_id: i64,
    ) -> sqlx::Result<WinRecord> {
        sqlx::query_as(&format!("{WIN_SELECT} WHERE w.id = $1"))
            .bind(win_id)
            .fetch_one(tx.as_mut())
            .await
    }

    /// Most recent wins of the community posted inside `window`.
    pub async fn wins_between(
        &self,
        community_id: &str,
        window: Window,
        limit: u32,
    ) -> sqlx::Result<Vec<WinRecord>> {
        sqlx::query_as(&format!(
            "{WIN_SELECT}
             WHERE u.community_id = $1 AND w.created_at >= $2 AND w.created_at < $3
             ORDER BY w.created_at DESC, w.id DESC
             LIMIT $4"
        ))
        .bind(community_id)
        .bind(window.start)
        .bind(window.end)
        .bind(limit as i64)
        .fetch_all(&self.0)
        .await
    }
}
