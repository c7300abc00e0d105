use chrono::NaiveDateTime;
use shared::{Points, Window};
use sqlx::{Sqlite, Transaction};
use tracing::instrument;

use super::{
    types::{FocusPeriod, GoalRecord, PeriodRecord, PeriodSummary},
    DB,
};

const PERIOD_SELECT: &str = r#"
    SELECT p.id, p.user_id, u.account_id, u.display_name, p.community_id,
           p.start_date, p.end_date, p.leaderboard_finalized, p.created_at
    FROM periods p
    JOIN users u ON u.id = p.user_id
"#;

const GOAL_COLUMNS: &str = r#"
    id, period_id, position, title, description, points, completed, completed_at, created_at
"#;

impl DB {
    /// Inserts a period unless the user already has one containing `now`.
    /// Returns `None` when an active period exists.
    #[instrument(skip(tx))]
    pub async fn insert_period_if_none_active(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        community_id: &str,
        window: Window,
        now: NaiveDateTime,
    ) -> sqlx::Result<Option<i64>> {
        let id: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO periods (user_id, community_id, start_date, end_date, leaderboard_finalized, created_at)
            SELECT $1, $2, $3, $4, FALSE, $5
            WHERE NOT EXISTS (
                SELECT 1 FROM periods
                WHERE user_id = $1 AND start_date <= $5 AND $5 < end_date
            )
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(community_id)
        .bind(window.start)
        .bind(window.end)
        .bind(now)
        .fetch_optional(tx.as_mut())
        .await?;

        Ok(id.map(|(id,)| id))
    }

    pub async fn get_period(&self, period_id: i64) -> sqlx::Result<Option<PeriodRecord>> {
        sqlx::query_as(&format!("{PERIOD_SELECT} WHERE p.id = $1"))
            .bind(period_id)
            .fetch_optional(&self.0)
            .await
    }

    pub async fn get_period_in_tx(
        tx: &mut Transaction<'static, Sqlite>,
        period_id: i64,
    ) -> sqlx::Result<Option<PeriodRecord>> {
        sqlx::query_as(&format!("{PERIOD_SELECT} WHERE p.id = $1"))
            .bind(period_id)
            .fetch_optional(tx.as_mut())
            .await
    }

    pub async fn active_period_in_tx(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        now: NaiveDateTime,
    ) -> sqlx::Result<Option<PeriodRecord>> {
        sqlx::query_as(&format!(
            "{PERIOD_SELECT} WHERE p.user_id = $1 AND p.start_date <= $2 AND $2 < p.end_date
             ORDER BY p.start_date DESC LIMIT 1"
        ))
        .bind(user_id)
        .bind(now)
        .fetch_optional(tx.as_mut())
        .await
    }

    pub async fn get_active_period(
        &self,
        user_id: i64,
        now: NaiveDateTime,
    ) -> sqlx::Result<Option<FocusPeriod>> {
        let period: Option<PeriodRecord> = sqlx::query_as(&format!(
            "{PERIOD_SELECT} WHERE p.user_id = $1 AND p.start_date <= $2 AND $2 < p.end_date
             ORDER BY p.start_date DESC LIMIT 1"
        ))
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.0)
        .await?;

        let Some(period) = period else {
            return Ok(None);
        };
        let goals = self.get_goals(period.id).await?;
        Ok(Some(FocusPeriod { period, goals }))
    }

    pub async fn get_goals(&self, period_id: i64) -> sqlx::Result<Vec<GoalRecord>> {
        sqlx::query_as(&format!(
            "SELECT {GOAL_COLUMNS} FROM goals WHERE period_id = $1 ORDER BY position"
        ))
        .bind(period_id)
        .fetch_all(&self.0)
        .await
    }

    /// Appends a goal after the highest position used in the period.
    #[instrument(skip(tx))]
    pub async fn insert_goal(
        tx: &mut Transaction<'static, Sqlite>,
        period_id: i64,
        title: &str,
        description: Option<&str>,
        points: Points,
        now: NaiveDateTime,
    ) -> sqlx::Result<GoalRecord> {
        sqlx::query_as(&format!(
            r#"
            INSERT INTO goals (period_id, position, title, description, points, completed, created_at)
            SELECT $1, COALESCE(MAX(position), 0) + 1, $2, $3, $4, FALSE, $5
            FROM goals
            WHERE period_id = $1
            RETURNING {GOAL_COLUMNS}
            "#
        ))
        .bind(period_id)
        .bind(title)
        .bind(description)
        .bind(points as i64)
        .bind(now)
        .fetch_one(tx.as_mut())
        .await
    }

    /// Marks the goal completed if it is still open. `None` means the goal is
    /// missing or was completed before.
    #[instrument(skip(tx))]
    pub async fn complete_goal(
        tx: &mut Transaction<'static, Sqlite>,
        period_id: i64,
        position: u32,
        now: NaiveDateTime,
    ) -> sqlx::Result<Option<GoalRecord>> {
        sqlx::query_as(&format!(
            r#"
            UPDATE goals
            SET completed = TRUE, completed_at = $3
            WHERE period_id = $1 AND position = $2 AND completed = FALSE
            RETURNING {GOAL_COLUMNS}
            "#
        ))
        .bind(period_id)
        .bind(position as i64)
        .bind(now)
        .fetch_optional(tx.as_mut())
        .await
    }

    pub async fn get_goal_in_tx(
        tx: &mut Transaction<'static, Sqlite>,
        period_id: i64,
        position: u32,
    ) -> sqlx::Result<Option<GoalRecord>> {
        sqlx::query_as(&format!(
            "SELECT {GOAL_COLUMNS} FROM goals WHERE period_id = $1 AND position = $2"
        ))
        .bind(period_id)
        .bind(position as i64)
        .fetch_optional(tx.as_mut())
        .await
    }

    /// Active periods across all communities, or one community when given.
    pub async fn active_period_summaries(
        &self,
        community_id: Option<&str>,
        now: NaiveDateTime,
    ) -> sqlx::Result<Vec<PeriodSummary>> {
        sqlx::query_as(
            r#"
            SELECT p.id, p.user_id, u.account_id, u.display_name, p.community_id,
                   p.start_date, p.end_date, p.leaderboard_finalized, p.created_at,
                   COUNT(g.id) AS total_goals,
                   COALESCE(SUM(g.completed), 0) AS completed_goals
            FROM periods p
            JOIN users u ON u.id = p.user_id
            LEFT JOIN goals g ON g.period_id = p.id
            WHERE p.start_date <= $1 AND $1 < p.end_date
              AND ($2 IS NULL OR p.community_id = $2)
            GROUP BY p.id
            ORDER BY p.community_id, p.start_date, p.id
            "#,
        )
        .bind(now)
        .bind(community_id)
        .fetch_all(&self.0)
        .await
    }

    /// Periods whose window is over and whose leaderboard was not posted yet.
    pub async fn ended_unfinalized_periods(
        &self,
        community_id: &str,
        now: NaiveDateTime,
    ) -> sqlx::Result<Vec<PeriodRecord>> {
        sqlx::query_as(&format!(
            "{PERIOD_SELECT}
             WHERE p.community_id = $1 AND p.end_date <= $2 AND p.leaderboard_finalized = FALSE
             ORDER BY p.end_date, p.id"
        ))
        .bind(community_id)
        .bind(now)
        .fetch_all(&self.0)
        .await
    }

    pub async fn communities_with_ended_periods(
        &self,
        now: NaiveDateTime,
    ) -> sqlx::Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT community_id
            FROM periods
            WHERE end_date <= $1 AND leaderboard_finalized = FALSE
            ORDER BY community_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.0)
        .await?;
        Ok(rows.into_iter().map(|(community,)| community).collect())
    }

    /// Flips the flag once. Returns false if the period was already final.
    #[instrument(skip(tx))]
    pub async fn finalize_period(
        tx: &mut Transaction<'static, Sqlite>,
        period_id: i64,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE periods
            SET leaderboard_finalized = TRUE
            WHERE id = $1 AND leaderboard_finalized = FALSE
            "#,
        )
        .bind(period_id)
        .execute(tx.as_mut())
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
