use serde::Serialize;
use shared::{ChallengeMultiplier, Points, Window, DEFAULT_CHALLENGE_MULTIPLIER};
use tracing::{info, instrument};

use crate::{
    db::{
        types::{ChallengeRecord, ChallengeStatus, ParticipantRecord, ParticipantStatus},
        DB,
    },
    error::{Error, Result},
    ledger, Context,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub approved: bool,
    pub points_awarded: Points,
}

impl Context {
    /// Creates a challenge running for `days` days from today's midnight.
    /// The creator always takes part.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, description))]
    pub async fn create_challenge(
        &self,
        community_id: &str,
        creator_account_id: &str,
        title: &str,
        description: Option<&str>,
        days: u32,
        participants: &[&str],
        multiplier: Option<f64>,
    ) -> Result<ChallengeRecord> {
        if days == 0 {
            return Err(Error::InvalidState("a challenge has to last at least one day"));
        }
        let now = self.now();
        let window = Window::days_from(now, days)
            .ok_or(Error::InvalidState("the challenge would end too far in the future"))?;
        let multiplier = ChallengeMultiplier::new(multiplier.unwrap_or(DEFAULT_CHALLENGE_MULTIPLIER));

        let mut tx = self.db.begin().await?;
        let creator_id =
            DB::upsert_user(&mut tx, creator_account_id, community_id, None, now).await?;
        let challenge_id = DB::insert_challenge(
            &mut tx,
            community_id,
            creator_id,
            title,
            description,
            window,
            multiplier,
            now,
        )
        .await?;
        DB::add_challenge_participant(&mut tx, challenge_id, creator_id).await?;
        for account_id in participants {
            let user_id = DB::upsert_user(&mut tx, account_id, community_id, None, now).await?;
            DB::add_challenge_participant(&mut tx, challenge_id, user_id).await?;
        }
        let challenge = DB::get_challenge_in_tx(&mut tx, challenge_id)
            .await?
            .ok_or(Error::ChallengeNotFound)?;
        tx.commit().await?;

        info!("Challenge {challenge_id} created in {community_id}");
        Ok(challenge)
    }

    pub async fn challenge(&self, challenge_id: i64) -> Result<ChallengeRecord> {
        self.db
            .get_challenge(challenge_id)
            .await?
            .ok_or(Error::ChallengeNotFound)
    }

    pub async fn challenge_participants(&self, challenge_id: i64) -> Result<Vec<ParticipantRecord>> {
        Ok(self.db.get_participants(challenge_id).await?)
    }

    /// Marks the member's part as done, pending validation by another
    /// participant.
    #[instrument(skip(self))]
    pub async fn submit_challenge_completion(
        &self,
        challenge_id: i64,
        account_id: &str,
    ) -> Result<ParticipantRecord> {
        let now = self.now();
        let challenge = self.open_challenge(challenge_id).await?;
        let user = self
            .db
            .get_user(account_id, &challenge.community_id)
            .await?
            .ok_or(Error::NotParticipant)?;

        let mut tx = self.db.begin().await?;
        let participant = DB::get_participant_in_tx(&mut tx, challenge_id, user.id)
            .await?
            .ok_or(Error::NotParticipant)?;
        if participant.status != ParticipantStatus::Active {
            return Err(Error::InvalidState("completion was already submitted"));
        }
        DB::transition_participant(
            &mut tx,
            challenge_id,
            user.id,
            ParticipantStatus::Active,
            ParticipantStatus::Submitted,
            now,
        )
        .await?;
        let participant = DB::get_participant_in_tx(&mut tx, challenge_id, user.id)
            .await?
            .ok_or(Error::NotParticipant)?;
        tx.commit().await?;

        Ok(participant)
    }

    /// Another participant approves or rejects a submitted completion.
    /// Approval credits `floor(10 × multiplier)` lifetime points; rejection
    /// sends the member back to work on it.
    #[instrument(skip(self))]
    pub async fn validate_challenge_completion(
        &self,
        challenge_id: i64,
        validator_account_id: &str,
        target_account_id: &str,
        approved: bool,
    ) -> Result<ValidationOutcome> {
        if validator_account_id == target_account_id {
            return Err(Error::SelfValidation);
        }
        let now = self.now();
        let challenge = self.open_challenge(challenge_id).await?;
        let (Some(validator), Some(target)) = (
            self.db
                .get_user(validator_account_id, &challenge.community_id)
                .await?,
            self.db
                .get_user(target_account_id, &challenge.community_id)
                .await?,
        ) else {
            return Err(Error::NotParticipant);
        };

        let mut tx = self.db.begin().await?;
        DB::get_participant_in_tx(&mut tx, challenge_id, validator.id)
            .await?
            .ok_or(Error::NotParticipant)?;
        let next = if approved {
            ParticipantStatus::Completed
        } else {
            ParticipantStatus::Active
        };
        let moved = DB::transition_participant(
            &mut tx,
            challenge_id,
            target.id,
            ParticipantStatus::Submitted,
            next,
            now,
        )
        .await?;
        if !moved {
            return Err(
                match DB::get_participant_in_tx(&mut tx, challenge_id, target.id).await? {
                    Some(_) => Error::InvalidState("there is no submitted completion to validate"),
                    None => Error::NotParticipant,
                },
            );
        }
        DB::insert_challenge_validation(&mut tx, challenge_id, validator.id, target.id, approved, now)
            .await?;

        let points_awarded = if approved {
            let reward = challenge.multiplier().reward();
            ledger::award(&mut tx, target.id, None, reward, now).await?;
            reward
        } else {
            0
        };
        tx.commit().await?;

        Ok(ValidationOutcome {
            approved,
            points_awarded,
        })
    }

    /// Closes every active challenge whose window is over. Members that did
    /// not complete fail; the challenge completes only if nobody failed.
    #[instrument(skip(self))]
    pub async fn fail_expired_challenges(&self) -> Result<Vec<(i64, ChallengeStatus)>> {
        let expired = self.db.expired_active_challenges(self.now()).await?;
        let mut closed = Vec::with_capacity(expired.len());
        for challenge in expired {
            let mut tx = self.db.begin().await?;
            let status = DB::close_challenge(&mut tx, challenge.id).await?;
            tx.commit().await?;
            if status == ChallengeStatus::Failed {
                info!("Challenge {} expired with unfinished participants", challenge.id);
            }
            closed.push((challenge.id, status));
        }
        Ok(closed)
    }

    async fn open_challenge(&self, challenge_id: i64) -> Result<ChallengeRecord> {
        let challenge = self.challenge(challenge_id).await?;
        if challenge.status != ChallengeStatus::Active || challenge.window().has_ended(self.now())
        {
            return Err(Error::InvalidState("the challenge is closed"));
        }
        Ok(challenge)
    }
}
