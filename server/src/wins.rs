use shared::{WinCategory, WIN_POINTS};
use tracing::instrument;

use crate::{
    db::{types::WinRecord, DB},
    error::{Error, Result},
    ledger, Context,
};

impl Context {
    /// Stores a win and credits the fixed win reward, counted towards the
    /// member's active period when there is one.
    #[instrument(skip(self, message))]
    pub async fn share_win(
        &self,
        account_id: &str,
        community_id: &str,
        message: &str,
        category: Option<&str>,
    ) -> Result<WinRecord> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::InvalidState("a win needs a description"));
        }
        let category = WinCategory::parse_lenient(category);
        let now = self.now();

        let mut tx = self.db.begin().await?;
        let user_id = DB::upsert_user(&mut tx, account_id, community_id, None, now).await?;
        let win_id = DB::insert_win(&mut tx, user_id, message, category, now).await?;
        let sprint = DB::active_period_in_tx(&mut tx, user_id, now)
            .await?
            .map(|period| period.sprint());
        ledger::award(&mut tx, user_id, sprint, WIN_POINTS, now).await?;
        let win = DB::get_win_in_tx(&mut tx, win_id).await?;
        tx.commit().await?;

        Ok(win)
    }
}
