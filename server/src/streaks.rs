use chrono::NaiveDateTime;
use serde::Serialize;
use shared::{start_of_day, CheckInOutcome, Points, StreakState, CHECK_IN_BASE_POINTS};
use tracing::{info, instrument};

use crate::{
    db::{types::Standup, DB},
    error::{Error, Result},
    events::Notification,
    ledger, Context,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckInReceipt {
    pub streak: StreakState,
    /// Milestone bonus reached with this check-in, if any.
    pub bonus: Option<Points>,
    /// Base points plus bonus.
    pub points_awarded: Points,
}

impl Context {
    /// Records the member's check-in for the calendar day of `moment`.
    ///
    /// The check-in row, the streak and the points commit together. A second
    /// check-in on the same local day fails with [`Error::DuplicateCheckIn`]
    /// and changes nothing.
    #[instrument(skip(self, standup))]
    pub async fn record_check_in(
        &self,
        account_id: &str,
        community_id: &str,
        moment: NaiveDateTime,
        standup: Standup,
    ) -> Result<CheckInReceipt> {
        let day = start_of_day(moment);

        let mut tx = self.db.begin().await?;
        let user_id = DB::upsert_user(&mut tx, account_id, community_id, None, moment).await?;
        if DB::has_check_in(&mut tx, user_id, day).await? {
            return Err(Error::DuplicateCheckIn);
        }

        let mut streak = DB::get_streak_in_tx(&mut tx, user_id).await?;
        let bonus = match streak.check_in(moment) {
            CheckInOutcome::SameDay => return Err(Error::DuplicateCheckIn),
            CheckInOutcome::Counted { bonus } => bonus,
        };

        DB::insert_check_in(&mut tx, user_id, day, moment, &standup)
            .await
            .map_err(|e| {
                if Error::is_unique_violation(&e) {
                    Error::DuplicateCheckIn
                } else {
                    Error::Storage(e)
                }
            })?;
        DB::upsert_streak(&mut tx, user_id, &streak).await?;

        let points_awarded = CHECK_IN_BASE_POINTS + bonus.unwrap_or_default();
        let sprint = DB::active_period_in_tx(&mut tx, user_id, moment)
            .await?
            .map(|period| period.sprint());
        ledger::award(&mut tx, user_id, sprint, points_awarded, moment).await?;
        let user = DB::get_user_in_tx(&mut tx, user_id).await?;
        tx.commit().await?;

        if let Some(bonus) = bonus {
            info!(
                "{account_id} reached a {}-day streak in {community_id}",
                streak.current
            );
            self.notifier.send(Notification::StreakMilestone {
                community_id: community_id.to_string(),
                name: user.name().to_string(),
                streak: streak.current,
                bonus,
            });
        }

        Ok(CheckInReceipt {
            streak,
            bonus,
            points_awarded,
        })
    }

    /// Check-in made now.
    pub async fn check_in(
        &self,
        account_id: &str,
        community_id: &str,
        standup: Standup,
    ) -> Result<CheckInReceipt> {
        self.record_check_in(account_id, community_id, self.now(), standup)
            .await
    }

    /// Default state for members who never checked in.
    pub async fn streak_state(&self, account_id: &str, community_id: &str) -> Result<StreakState> {
        match self.db.get_user(account_id, community_id).await? {
            Some(user) => Ok(self.db.get_streak(user.id).await?),
            None => Ok(StreakState::default()),
        }
    }
}
