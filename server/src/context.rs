use std::{fmt, sync::Arc, time::Duration};

use chrono::NaiveDateTime;
use shared::{Clock, Estimator, SystemClock, Unconfigured};
use tracing::instrument;

use crate::{
    db::{
        types::{CommunityConfig, UserRecord},
        DB,
    },
    error::Result,
    events::Notifier,
};

pub const DEFAULT_ESTIMATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the engine operations need, passed in rather than global.
#[derive(Clone)]
pub struct Context {
    pub db: DB,
    pub clock: Arc<dyn Clock>,
    pub estimator: Arc<dyn Estimator>,
    pub notifier: Notifier,
    pub estimator_timeout: Duration,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("db", &self.db)
            .field("clock", &self.clock)
            .field("estimator_timeout", &self.estimator_timeout)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(db: DB, notifier: Notifier) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
            estimator: Arc::new(Unconfigured),
            notifier,
            estimator_timeout: DEFAULT_ESTIMATOR_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn Estimator>, timeout: Duration) -> Self {
        self.estimator = estimator;
        self.estimator_timeout = timeout;
        self
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Creates the member on first contact and refreshes the cached display
    /// name when one is given.
    #[instrument(skip(self))]
    pub async fn upsert_user(
        &self,
        account_id: &str,
        community_id: &str,
        display_name: Option<&str>,
    ) -> Result<UserRecord> {
        let mut tx = self.db.begin().await?;
        let id = DB::upsert_user(&mut tx, account_id, community_id, display_name, self.now())
            .await?;
        let user = DB::get_user_in_tx(&mut tx, id).await?;
        tx.commit().await?;
        Ok(user)
    }

    pub async fn set_leaderboard_destination(
        &self,
        community_id: &str,
        destination: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;
        DB::set_leaderboard_destination(&mut tx, community_id, destination).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_reminder_destination(
        &self,
        community_id: &str,
        destination: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;
        DB::set_reminder_destination(&mut tx, community_id, destination).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_mrr_destination(
        &self,
        community_id: &str,
        destination: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;
        DB::set_mrr_destination(&mut tx, community_id, destination).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn community_config(&self, community_id: &str) -> Result<CommunityConfig> {
        Ok(self.db.community_config(community_id).await?)
    }

    /// Pairs two members of the same community as accountability buddies.
    #[instrument(skip(self))]
    pub async fn add_buddy_pair(
        &self,
        community_id: &str,
        account_id: &str,
        buddy_account_id: &str,
    ) -> Result<()> {
        if account_id == buddy_account_id {
            return Err(crate::Error::InvalidState("members cannot buddy up with themselves"));
        }
        let now = self.now();
        let mut tx = self.db.begin().await?;
        let user_id = DB::upsert_user(&mut tx, account_id, community_id, None, now).await?;
        let buddy_id = DB::upsert_user(&mut tx, buddy_account_id, community_id, None, now).await?;
        DB::add_buddy_pair(&mut tx, user_id, buddy_id, now).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Turns completion notifications from `buddy_account_id` on or off for
    /// `account_id`. Returns false if the two are not paired.
    pub async fn set_buddy_notifications(
        &self,
        community_id: &str,
        account_id: &str,
        buddy_account_id: &str,
        enabled: bool,
    ) -> Result<bool> {
        let (Some(user), Some(buddy)) = (
            self.db.get_user(account_id, community_id).await?,
            self.db.get_user(buddy_account_id, community_id).await?,
        ) else {
            return Ok(false);
        };
        let mut tx = self.db.begin().await?;
        // Rows are keyed by whose completions are announced.
        let updated = DB::set_buddy_notifications(&mut tx, buddy.id, user.id, enabled).await?;
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn buddies_to_notify(&self, user_id: i64) -> Result<Vec<UserRecord>> {
        Ok(self.db.buddies_to_notify(user_id).await?)
    }
}
