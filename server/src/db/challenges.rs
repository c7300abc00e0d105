use chrono::NaiveDateTime;
use shared::{ChallengeMultiplier, Window};
use sqlx::{Sqlite, Transaction};
use tracing::instrument;

use super::{
    types::{ChallengeRecord, ChallengeStatus, ParticipantRecord, ParticipantStatus},
    DB,
};

const CHALLENGE_COLUMNS: &str = r#"
    id, community_id, creator_id, title, description, start_date, end_date, multiplier, status,
    created_at
"#;

const PARTICIPANT_SELECT: &str = r#"
    SELECT cp.challenge_id, cp.user_id, u.account_id, cp.status, cp.submitted_at, cp.completed_at
    FROM challenge_participants cp
    JOIN users u ON u.id = cp.user_id
"#;

impl DB {
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(tx, description))]
    pub async fn insert_challenge(
        tx: &mut Transaction<'static, Sqlite>,
        community_id: &str,
        creator_id: i64,
        title: &str,
        description: Option<&str>,
        window: Window,
        multiplier: ChallengeMultiplier,
        now: NaiveDateTime,
    ) -> sqlx::Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO challenges
                (community_id, creator_id, title, description, start_date, end_date, multiplier, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(community_id)
        .bind(creator_id)
        .bind(title)
        .bind(description)
        .bind(window.start)
        .bind(window.end)
        .bind(multiplier.value())
        .bind(ChallengeStatus::Active)
        .bind(now)
        .fetch_one(tx.as_mut())
        .await?;
        Ok(id)
    }

    pub async fn add_challenge_participant(
        tx: &mut Transaction<'static, Sqlite>,
        challenge_id: i64,
        user_id: i64,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO challenge_participants (challenge_id, user_id, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (challenge_id, user_id) DO NOTHING
            "#,
        )
        .bind(challenge_id)
        .bind(user_id)
        .bind(ParticipantStatus::Active)
        .execute(tx.as_mut())
        .await?;
        Ok(())
    }

    pub async fn get_challenge(&self, challenge_id: i64) -> sqlx::Result<Option<ChallengeRecord>> {
        sqlx::query_as(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = $1"
        ))
        .bind(challenge_id)
        .fetch_optional(&self.0)
        .await
    }

    pub async fn get_challenge_in_tx(
        tx: &mut Transaction<'static, Sqlite>,
        challenge_id: i64,
    ) -> sqlx::Result<Option<ChallengeRecord>> {
        sqlx::query_as(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = $1"
        ))
        .bind(challenge_id)
        .fetch_optional(tx.as_mut())
        .await
    }

    pub async fn get_participants(
        &self,
        challenge_id: i64,
    ) -> sqlx::Result<Vec<ParticipantRecord>> {
        sqlx::query_as(&format!(
            "{PARTICIPANT_SELECT} WHERE cp.challenge_id = $1 ORDER BY cp.user_id"
        ))
        .bind(challenge_id)
        .fetch_all(&self.0)
        .await
    }

    pub async fn get_participant_in_tx(
        tx: &mut Transaction<'static, Sqlite>,
        challenge_id: i64,
        user_id: i64,
    ) -> sqlx::Result<Option<ParticipantRecord>> {
        sqlx::query_as(&format!(
            "{PARTICIPANT_SELECT} WHERE cp.challenge_id = $1 AND cp.user_id = $2"
        ))
        .bind(challenge_id)
        .bind(user_id)
        .fetch_optional(tx.as_mut())
        .await
    }

    /// Moves a participant from `from` to `to`. Returns false if the
    /// participant was not in `from`.
    #[instrument(skip(tx))]
    pub async fn transition_participant(
        tx: &mut Transaction<'static, Sqlite>,
        challenge_id: i64,
        user_id: i64,
        from: ParticipantStatus,
        to: ParticipantStatus,
        now: NaiveDateTime,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE challenge_participants
            SET status = $4,
                submitted_at = CASE WHEN $4 = 'submitted' THEN $5 ELSE submitted_at END,
                completed_at = CASE WHEN $4 = 'completed' THEN $5 ELSE completed_at END
            WHERE challenge_id = $1 AND user_id = $2 AND status = $3
            "#,
        )
        .bind(challenge_id)
        .bind(user_id)
        .bind(from)
        .bind(to)
        .bind(now)
        .execute(tx.as_mut())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn insert_challenge_validation(
        tx: &mut Transaction<'static, Sqlite>,
        challenge_id: i64,
        validator_id: i64,
        target_id: i64,
        approved: bool,
        now: NaiveDateTime,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO challenge_validations (challenge_id, validator_id, target_id, approved, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(challenge_id)
        .bind(validator_id)
        .bind(target_id)
        .bind(approved)
        .bind(now)
        .execute(tx.as_mut())
        .await?;
        Ok(())
    }

    pub async fn expired_active_challenges(
        &self,
        now: NaiveDateTime,
    ) -> sqlx::Result<Vec<ChallengeRecord>> {
        sqlx::query_as(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges
             WHERE status = $1 AND end_date <= $2
             ORDER BY end_date, id"
        ))
        .bind(ChallengeStatus::Active)
        .bind(now)
        .fetch_all(&self.0)
        .await
    }

    /// Fails every participant that did not complete, then closes the
    /// challenge as completed only if nobody failed.
    #[instrument(skip(tx))]
    pub async fn close_challenge(
        tx: &mut Transaction<'static, Sqlite>,
        challenge_id: i64,
    ) -> sqlx::Result<ChallengeStatus> {
        let failed = sqlx::query(
            r#"
            UPDATE challenge_participants
            SET status = $2
            WHERE challenge_id = $1 AND status <> $3
            "#,
        )
        .bind(challenge_id)
        .bind(ParticipantStatus::Failed)
        .bind(ParticipantStatus::Completed)
        .execute(tx.as_mut())
        .await?
        .rows_affected();

        let status = if failed == 0 {
            ChallengeStatus::Completed
        } else {
            ChallengeStatus::Failed
        };

        sqlx::query("UPDATE challenges SET status = $2 WHERE id = $1 AND status = $3")
            .bind(challenge_id)
            .bind(status)
            .bind(ChallengeStatus::Active)
            .execute(tx.as_mut())
            .await?;

        Ok(status)
    }
}
