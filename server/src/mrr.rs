use chrono::{Months, NaiveDateTime};
use serde::Serialize;
use shared::mrr;
use tracing::{info, instrument};

use crate::{
    db::{
        types::{MrrEntryRecord, MrrLeaderboardEntry},
        DB,
    },
    error::{Error, Result},
    Context,
};

#[derive(Debug, Clone, Serialize)]
pub struct MrrUpdate {
    pub entry: MrrEntryRecord,
    /// Percent change from the previous entry, when that one was above zero.
    pub growth: Option<f64>,
    /// Milestone in cents crossed for the first time by this entry.
    pub milestone: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MrrStats {
    pub current_cents: i64,
    pub currency: Option<String>,
    pub all_time_high_cents: i64,
    /// Change against the latest entry at least a month old.
    pub monthly_growth: Option<f64>,
    pub total_entries: i64,
    pub first_recorded_at: Option<NaiveDateTime>,
    pub is_public: bool,
    pub milestones_hit: usize,
    pub next_milestone: Option<i64>,
}

impl Context {
    /// Logs the member's current MRR. Milestones only ever move up: reporting
    /// a lower amount and climbing back never celebrates the same one twice.
    /// Public members get their milestone announced in the MRR destination.
    #[instrument(skip(self, note))]
    pub async fn record_mrr(
        &self,
        account_id: &str,
        community_id: &str,
        amount_cents: i64,
        currency: Option<&str>,
        note: Option<&str>,
    ) -> Result<MrrUpdate> {
        if amount_cents < 0 {
            return Err(Error::InvalidState("MRR cannot be negative"));
        }
        let now = self.now();
        let currency = mrr::normalize_currency(currency);
        let note = note.map(str::trim).filter(|note| !note.is_empty());

        let mut tx = self.db.begin().await?;
        let user_id = DB::upsert_user(&mut tx, account_id, community_id, None, now).await?;
        let previous = DB::latest_mrr_in_tx(&mut tx, user_id).await?;
        let entry =
            DB::insert_mrr_entry(&mut tx, user_id, amount_cents, &currency, note, now).await?;
        let settings = DB::ensure_mrr_settings(&mut tx, user_id).await?;
        let milestone = match mrr::new_milestone(amount_cents, settings.last_milestone_cents) {
            Some(milestone) if DB::raise_mrr_milestone(&mut tx, user_id, milestone).await? => {
                Some(milestone)
            }
            _ => None,
        };
        tx.commit().await?;

        if let Some(milestone) = milestone {
            info!("{account_id} reached {} MRR in {community_id}", mrr::format_milestone(milestone));
            if settings.is_public {
                let config = self.db.community_config(community_id).await?;
                if let Some(destination) = config.mrr_destination() {
                    self.notifier.post(
                        destination,
                        format!(
                            "🎉 {} just hit {} MRR! 🚀",
                            entry.name(),
                            mrr::format_milestone(milestone)
                        ),
                    );
                }
            }
        }

        let growth = previous
            .filter(|previous| previous.amount_cents > 0)
            .map(|previous| mrr::growth_percent(amount_cents, previous.amount_cents));
        Ok(MrrUpdate {
            entry,
            growth,
            milestone,
        })
    }

    pub async fn set_mrr_visibility(
        &self,
        account_id: &str,
        community_id: &str,
        is_public: bool,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let user_id =
            DB::upsert_user(&mut tx, account_id, community_id, None, self.now()).await?;
        DB::set_mrr_visibility(&mut tx, user_id, is_public).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Entries of the last `months` months, newest first.
    pub async fn mrr_history(
        &self,
        account_id: &str,
        community_id: &str,
        months: u32,
    ) -> Result<Vec<MrrEntryRecord>> {
        let Some(user) = self.db.get_user(account_id, community_id).await? else {
            return Ok(vec![]);
        };
        let since = self
            .now()
            .checked_sub_months(Months::new(months))
            .unwrap_or(NaiveDateTime::MIN);
        Ok(self.db.mrr_history(user.id, since).await?)
    }

    pub async fn mrr_stats(&self, account_id: &str, community_id: &str) -> Result<MrrStats> {
        let Some(user) = self.db.get_user(account_id, community_id).await? else {
            return Ok(MrrStats {
                next_milestone: mrr::next_milestone(0),
                ..Default::default()
            });
        };
        let now = self.now();
        let latest = self.db.mrr_as_of(user.id, now).await?;
        let totals = self.db.mrr_totals(user.id).await?;
        let month_ago = match now.checked_sub_months(Months::new(1)) {
            Some(month_ago) => self.db.mrr_as_of(user.id, month_ago).await?,
            None => None,
        };
        let settings = self.db.mrr_settings(user.id).await?.unwrap_or_default();

        let current_cents = latest.as_ref().map_or(0, |entry| entry.amount_cents);
        Ok(MrrStats {
            current_cents,
            currency: latest.map(|entry| entry.currency),
            all_time_high_cents: totals.peak_cents.unwrap_or_default(),
            monthly_growth: month_ago
                .map(|previous| mrr::growth_percent(current_cents, previous.amount_cents)),
            total_entries: totals.entries,
            first_recorded_at: totals.first_recorded_at,
            is_public: settings.is_public,
            milestones_hit: mrr::milestones_hit(current_cents),
            next_milestone: mrr::next_milestone(current_cents),
        })
    }

    /// Public members ranked by their latest MRR.
    pub async fn mrr_leaderboard(
        &self,
        community_id: &str,
        limit: u32,
    ) -> Result<Vec<MrrLeaderboardEntry>> {
        Ok(self.db.mrr_leaderboard(community_id, limit).await?)
    }

    /// Combined latest MRR of the community's public members, in cents.
    pub async fn community_mrr(&self, community_id: &str) -> Result<i64> {
        Ok(self.db.community_mrr(community_id).await?)
    }
}
