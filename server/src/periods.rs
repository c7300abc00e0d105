use rocket::tokio::time::timeout;
use shared::{points_or_default, EstimateError, Window};
use tracing::{debug, info, instrument};

use crate::{
    consts,
    db::{
        types::{FocusPeriod, GoalRecord, PeriodRecord, PeriodSummary},
        DB,
    },
    error::{Error, Result},
    events::Notification,
    leaderboard, ledger, Context,
};

/// Outcome of one community's ended-period sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    pub finalized: usize,
    pub leaderboard_posted: bool,
    /// Communities whose sweep failed.
    pub failed: usize,
}

impl Context {
    /// Opens a two-week period starting at today's midnight.
    #[instrument(skip(self))]
    pub async fn start_period(&self, account_id: &str, community_id: &str) -> Result<PeriodRecord> {
        let now = self.now();
        let window = Window::focus_period(now);

        let mut tx = self.db.begin().await?;
        let user_id = DB::upsert_user(&mut tx, account_id, community_id, None, now).await?;
        let period_id =
            DB::insert_period_if_none_active(&mut tx, user_id, community_id, window, now)
                .await?
                .ok_or(Error::AlreadyActive)?;
        let period = DB::get_period_in_tx(&mut tx, period_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        tx.commit().await?;

        info!(
            "Started focus period {} for {account_id} in {community_id}",
            period.id
        );
        Ok(period)
    }

    pub async fn active_period(
        &self,
        account_id: &str,
        community_id: &str,
    ) -> Result<Option<FocusPeriod>> {
        let Some(user) = self.db.get_user(account_id, community_id).await? else {
            return Ok(None);
        };
        Ok(self.db.get_active_period(user.id, self.now()).await?)
    }

    pub async fn active_periods(&self, community_id: &str) -> Result<Vec<PeriodSummary>> {
        Ok(self
            .db
            .active_period_summaries(Some(community_id), self.now())
            .await?)
    }

    /// Appends a goal to an active period. The estimator decides the points;
    /// when it fails or runs out of time the default value is used instead.
    #[instrument(skip(self, description))]
    pub async fn add_goal(
        &self,
        period_id: i64,
        title: &str,
        description: Option<&str>,
    ) -> Result<GoalRecord> {
        let period = self
            .db
            .get_period(period_id)
            .await?
            .filter(|period| period.window().contains(self.now()))
            .ok_or(Error::NoActivePeriod)?;

        let estimate = match timeout(
            self.estimator_timeout,
            self.estimator.estimate(title, description),
        )
        .await
        {
            Ok(estimate) => estimate,
            Err(_) => Err(EstimateError::Timeout),
        };
        let points = points_or_default(title, estimate);

        let mut tx = self.db.begin().await?;
        let goal =
            DB::insert_goal(&mut tx, period.id, title, description, points, self.now()).await?;
        tx.commit().await?;

        debug!(
            "Added goal #{} to period {} worth {} points",
            goal.position, period.id, goal.points
        );
        Ok(goal)
    }

    pub async fn add_goal_to_active_period(
        &self,
        account_id: &str,
        community_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<GoalRecord> {
        let period = self
            .active_period(account_id, community_id)
            .await?
            .ok_or(Error::NoActivePeriod)?;
        self.add_goal(period.period.id, title, description).await
    }

    /// Completes the goal at `position` and credits its points to the
    /// period's sprint. Buddies hear about it once the award is committed.
    #[instrument(skip(self))]
    pub async fn complete_goal(&self, period_id: i64, position: u32) -> Result<GoalRecord> {
        let now = self.now();
        let mut tx = self.db.begin().await?;

        let Some(goal) = DB::complete_goal(&mut tx, period_id, position, now).await? else {
            return Err(match DB::get_goal_in_tx(&mut tx, period_id, position).await? {
                Some(_) => Error::AlreadyCompleted(position),
                None => Error::GoalNotFound(position),
            });
        };
        let period = DB::get_period_in_tx(&mut tx, period_id)
            .await?
            .ok_or(Error::GoalNotFound(position))?;
        ledger::award(
            &mut tx,
            period.user_id,
            Some(period.sprint()),
            goal.points as u32,
            now,
        )
        .await?;
        tx.commit().await?;

        self.notifier.send(Notification::GoalCompleted {
            user_id: period.user_id,
            community_id: period.community_id.clone(),
            name: period.name().to_string(),
            position,
            title: goal.title.clone(),
            points: goal.points as u32,
        });
        Ok(goal)
    }

    pub async fn complete_active_goal(
        &self,
        account_id: &str,
        community_id: &str,
        position: u32,
    ) -> Result<GoalRecord> {
        let period = self
            .active_period(account_id, community_id)
            .await?
            .ok_or(Error::NoActivePeriod)?;
        self.complete_goal(period.period.id, position).await
    }

    /// Posts one results message for the community's periods that ended
    /// since the last sweep, then marks every one of them finalized.
    ///
    /// Without a leaderboard destination nothing is posted and the periods
    /// stay pending until one is configured.
    #[instrument(skip(self))]
    pub async fn sweep_ended_periods(&self, community_id: &str) -> Result<FinalizeReport> {
        let now = self.now();
        let periods = self.db.ended_unfinalized_periods(community_id, now).await?;
        if periods.is_empty() {
            return Ok(FinalizeReport::default());
        }

        let config = self.db.community_config(community_id).await?;
        let Some(destination) = config.leaderboard_destination() else {
            debug!(
                "No leaderboard destination for {community_id}, leaving {} periods pending",
                periods.len()
            );
            return Ok(FinalizeReport::default());
        };

        let entries = self
            .db
            .ended_sprint_leaderboard(community_id, now, consts::LEADERBOARD_LIMIT)
            .await?;
        let leaderboard_posted = !entries.is_empty();
        if leaderboard_posted {
            self.notifier.post(
                destination,
                leaderboard::format_leaderboard(consts::SPRINT_RESULTS_TITLE, &entries),
            );
        }

        let mut tx = self.db.begin().await?;
        let mut finalized = 0;
        for period in &periods {
            if DB::finalize_period(&mut tx, period.id).await? {
                finalized += 1;
            }
        }
        tx.commit().await?;

        info!("Finalized {finalized} focus periods in {community_id}");
        Ok(FinalizeReport {
            finalized,
            leaderboard_posted,
            failed: 0,
        })
    }
}
