use chrono::NaiveDateTime;
use shared::Points;
use sqlx::{Sqlite, Transaction};
use tracing::instrument;

use super::{types::SprintScope, DB};

impl DB {
    /// Credits `amount` to the user's lifetime total and, when a sprint is
    /// given, to the user's subtotal for that period. The sprint row is
    /// created on the first award and keeps the window it was created with.
    ///
    /// Both writes happen on `tx`, so they commit or roll back together.
    #[instrument(skip(tx))]
    pub async fn add_points(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        sprint: Option<SprintScope>,
        amount: Points,
        at: NaiveDateTime,
    ) -> sqlx::Result<i64> {
        let (total,): (i64,) = sqlx::query_as(
            r#"
            UPDATE users
            SET total_points = total_points + $2, last_awarded_at = $3
            WHERE id = $1
            RETURNING total_points
            "#,
        )
        .bind(user_id)
        .bind(amount as i64)
        .bind(at)
        .fetch_optional(tx.as_mut())
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;

        if let Some(sprint) = sprint {
            sqlx::query(
                r#"
                INSERT INTO sprint_points
                    (period_id, user_id, community_id, points, window_start, window_end, last_awarded_at)
                SELECT $1, id, community_id, $3, $4, $5, $6
                FROM users
                WHERE id = $2
                ON CONFLICT (period_id, user_id) DO UPDATE
                SET points = sprint_points.points + excluded.points,
                    last_awarded_at = excluded.last_awarded_at
                "#,
            )
            .bind(sprint.period_id)
            .bind(user_id)
            .bind(amount as i64)
            .bind(sprint.window.start)
            .bind(sprint.window.end)
            .bind(at)
            .execute(tx.as_mut())
            .await?;
        }

        Ok(total)
    }

    pub async fn sprint_points(&self, period_id: i64, user_id: i64) -> sqlx::Result<i64> {
        let points: Option<(i64,)> = sqlx::query_as(
            "SELECT points FROM sprint_points WHERE period_id = $1 AND user_id = $2",
        )
        .bind(period_id)
        .bind(user_id)
        .fetch_optional(&self.0)
        .await?;
        Ok(points.map(|(points,)| points).unwrap_or_default())
    }
}
