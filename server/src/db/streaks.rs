use chrono::NaiveDateTime;
use shared::StreakState;
use sqlx::{Sqlite, Transaction};
use tracing::instrument;

use super::{
    types::{AbsentMember, Standup, StreakRecord},
    DB,
};

impl DB {
    pub async fn has_check_in(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        day: NaiveDateTime,
    ) -> sqlx::Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM check_ins WHERE user_id = $1 AND day = $2)",
        )
        .bind(user_id)
        .bind(day)
        .fetch_one(tx.as_mut())
        .await?;
        Ok(exists)
    }

    /// Fails with a unique violation if the user already checked in on `day`.
    #[instrument(skip(tx, standup))]
    pub async fn insert_check_in(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        day: NaiveDateTime,
        checked_in_at: NaiveDateTime,
        standup: &Standup,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO check_ins (user_id, day, checked_in_at, working_on, accomplished, blockers)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user_id)
        .bind(day)
        .bind(checked_in_at)
        .bind(standup.working_on.as_deref())
        .bind(standup.accomplished.as_deref())
        .bind(standup.blockers.as_deref())
        .execute(tx.as_mut())
        .await?;
        Ok(())
    }

    pub async fn get_streak_in_tx(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
    ) -> sqlx::Result<StreakState> {
        let record: Option<StreakRecord> = sqlx::query_as(
            r#"
            SELECT user_id, current_streak, longest_streak, total_check_ins, last_check_in
            FROM streaks
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(tx.as_mut())
        .await?;
        Ok(record.map(Into::into).unwrap_or_default())
    }

    pub async fn get_streak(&self, user_id: i64) -> sqlx::Result<StreakState> {
        let record: Option<StreakRecord> = sqlx::query_as(
            r#"
            SELECT user_id, current_streak, longest_streak, total_check_ins, last_check_in
            FROM streaks
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.0)
        .await?;
        Ok(record.map(Into::into).unwrap_or_default())
    }

    #[instrument(skip(tx))]
    pub async fn upsert_streak(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        state: &StreakState,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO streaks (user_id, current_streak, longest_streak, total_check_ins, last_check_in)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE
            SET current_streak = excluded.current_streak,
                longest_streak = excluded.longest_streak,
                total_check_ins = excluded.total_check_ins,
                last_check_in = excluded.last_check_in
            "#,
        )
        .bind(user_id)
        .bind(state.current as i64)
        .bind(state.longest as i64)
        .bind(state.total_check_ins as i64)
        .bind(state.last_check_in)
        .execute(tx.as_mut())
        .await?;
        Ok(())
    }

    /// Members with an active period and no check-in for the day starting at
    /// `today`.
    pub async fn members_without_check_in(
        &self,
        today: NaiveDateTime,
        now: NaiveDateTime,
    ) -> sqlx::Result<Vec<AbsentMember>> {
        sqlx::query_as(
            r#"
            SELECT DISTINCT u.id AS user_id, u.account_id, u.display_name, u.community_id,
                   COALESCE(s.current_streak, 0) AS current_streak
            FROM periods p
            JOIN users u ON u.id = p.user_id
            LEFT JOIN streaks s ON s.user_id = u.id
            WHERE p.start_date <= $2 AND $2 < p.end_date
              AND NOT EXISTS (
                  SELECT 1 FROM check_ins c WHERE c.user_id = u.id AND c.day = $1
              )
            ORDER BY u.community_id, u.id
            "#,
        )
        .bind(today)
        .bind(now)
        .fetch_all(&self.0)
        .await
    }
}
