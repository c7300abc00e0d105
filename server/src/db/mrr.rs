use chrono::NaiveDateTime;
use sqlx::{Sqlite, Transaction};
use tracing::instrument;

use super::{
    types::{MrrEntryRecord, MrrLeaderboardEntry, MrrSettingsRecord, MrrTotals},
    DB,
};

const MRR_SELECT: &str = r#"
    SELECT e.id, e.user_id, u.account_id, u.display_name, e.amount_cents, e.currency,
           e.note, e.recorded_at
    FROM mrr_entries e
    JOIN users u ON u.id = e.user_id
"#;

/// Each member's most recent entry, limited to those who made it public.
const LATEST_PUBLIC: &str = r#"
    WITH latest AS (
        SELECT e.*,
               ROW_NUMBER() OVER (
                   PARTITION BY e.user_id ORDER BY e.recorded_at DESC, e.id DESC
               ) AS recency
        FROM mrr_entries e
        JOIN users u ON u.id = e.user_id
        WHERE u.community_id = $1
    )
"#;

impl DB {
    #[instrument(skip(tx, note))]
    pub async fn insert_mrr_entry(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        amount_cents: i64,
        currency: &str,
        note: Option<&str>,
        now: NaiveDateTime,
    ) -> sqlx::Result<MrrEntryRecord> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO mrr_entries (user_id, amount_cents, currency, note, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(amount_cents)
        .bind(currency)
        .bind(note)
        .bind(now)
        .fetch_one(tx.as_mut())
        .await?;

        sqlx::query_as(&format!("{MRR_SELECT} WHERE e.id = $1"))
            .bind(id)
            .fetch_one(tx.as_mut())
            .await
    }

    pub async fn latest_mrr_in_tx(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
    ) -> sqlx::Result<Option<MrrEntryRecord>> {
        sqlx::query_as(&format!(
            "{MRR_SELECT} WHERE e.user_id = $1 ORDER BY e.recorded_at DESC, e.id DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(tx.as_mut())
        .await
    }

    /// Settings row of the member, created private on first use.
    pub async fn ensure_mrr_settings(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
    ) -> sqlx::Result<MrrSettingsRecord> {
        sqlx::query("INSERT INTO mrr_settings (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(tx.as_mut())
            .await?;
        sqlx::query_as(
            "SELECT user_id, is_public, last_milestone_cents FROM mrr_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(tx.as_mut())
        .await
    }

    /// Records `milestone` unless an equal or higher one is already stored.
    #[instrument(skip(tx))]
    pub async fn raise_mrr_milestone(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        milestone: i64,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE mrr_settings
            SET last_milestone_cents = $2
            WHERE user_id = $1 AND last_milestone_cents < $2
            "#,
        )
        .bind(user_id)
        .bind(milestone)
        .execute(tx.as_mut())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_mrr_visibility(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        is_public: bool,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mrr_settings (user_id, is_public)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET is_public = excluded.is_public
            "#,
        )
        .bind(user_id)
        .bind(is_public)
        .execute(tx.as_mut())
        .await?;
        Ok(())
    }

    pub async fn mrr_settings(&self, user_id: i64) -> sqlx::Result<Option<MrrSettingsRecord>> {
        sqlx::query_as(
            "SELECT user_id, is_public, last_milestone_cents FROM mrr_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.0)
        .await
    }

    /// Latest entry recorded at or before `at`.
    pub async fn mrr_as_of(
        &self,
        user_id: i64,
        at: NaiveDateTime,
    ) -> sqlx::Result<Option<MrrEntryRecord>> {
        sqlx::query_as(&format!(
            "{MRR_SELECT}
             WHERE e.user_id = $1 AND e.recorded_at <= $2
             ORDER BY e.recorded_at DESC, e.id DESC
             LIMIT 1"
        ))
        .bind(user_id)
        .bind(at)
        .fetch_optional(&self.0)
        .await
    }

    /// Entries since `since`, newest first.
    pub async fn mrr_history(
        &self,
        user_id: i64,
        since: NaiveDateTime,
    ) -> sqlx::Result<Vec<MrrEntryRecord>> {
        sqlx::query_as(&format!(
            "{MRR_SELECT}
             WHERE e.user_id = $1 AND e.recorded_at >= $2
             ORDER BY e.recorded_at DESC, e.id DESC"
        ))
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.0)
        .await
    }

    pub async fn mrr_totals(&self, user_id: i64) -> sqlx::Result<MrrTotals> {
        sqlx::query_as(
            r#"
            SELECT MAX(amount_cents) AS peak_cents,
                   COUNT(*) AS entries,
                   MIN(recorded_at) AS first_recorded_at
            FROM mrr_entries
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.0)
        .await
    }

    /// Public members ranked by their latest amount; earlier reporters win
    /// ties.
    #[instrument(skip(self))]
    pub async fn mrr_leaderboard(
        &self,
        community_id: &str,
        limit: u32,
    ) -> sqlx::Result<Vec<MrrLeaderboardEntry>> {
        sqlx::query_as(&format!(
            "{LATEST_PUBLIC}
            SELECT ROW_NUMBER() OVER (
                       ORDER BY l.amount_cents DESC, l.recorded_at ASC, u.id ASC
                   ) AS place,
                   u.id AS user_id, u.account_id, u.display_name,
                   l.amount_cents, l.currency, l.recorded_at
            FROM latest l
            JOIN users u ON u.id = l.user_id
            JOIN mrr_settings s ON s.user_id = l.user_id
            WHERE l.recency = 1 AND s.is_public = TRUE
            ORDER BY place
            LIMIT $2"
        ))
        .bind(community_id)
        .bind(limit as i64)
        .fetch_all(&self.0)
        .await
    }

    /// Sum of the latest public amounts in the community.
    pub async fn community_mrr(&self, community_id: &str) -> sqlx::Result<i64> {
        let (total,): (i64,) = sqlx::query_as(&format!(
            "{LATEST_PUBLIC}
            SELECT COALESCE(SUM(l.amount_cents), 0)
            FROM latest l
            JOIN mrr_settings s ON s.user_id = l.user_id
            WHERE l.recency = 1 AND s.is_public = TRUE"
        ))
        .bind(community_id)
        .fetch_one(&self.0)
        .await?;
        Ok(total)
    }
}
