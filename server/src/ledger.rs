use chrono::NaiveDateTime;
use shared::Points;
use sqlx::{Sqlite, Transaction};
use tracing::instrument;

use crate::{
    db::{types::SprintScope, DB},
    error::Result,
    Context,
};

impl Context {
    /// Credits `amount` points in a transaction of its own. Returns the new
    /// lifetime total.
    #[instrument(skip(self))]
    pub async fn add_points(
        &self,
        user_id: i64,
        sprint: Option<SprintScope>,
        amount: Points,
    ) -> Result<i64> {
        let mut tx = self.db.begin().await?;
        let total = award(&mut tx, user_id, sprint, amount, self.now()).await?;
        tx.commit().await?;
        Ok(total)
    }

    pub async fn lifetime_points(&self, account_id: &str, community_id: &str) -> Result<i64> {
        Ok(self
            .db
            .get_user(account_id, community_id)
            .await?
            .map(|user| user.total_points)
            .unwrap_or_default())
    }
}

/// Ledger write for callers that already hold a transaction, so the award
/// commits together with the action that earned it.
pub(crate) async fn award(
    tx: &mut Transaction<'static, Sqlite>,
    user_id: i64,
    sprint: Option<SprintScope>,
    amount: Points,
    at: NaiveDateTime,
) -> Result<i64> {
    Ok(DB::add_points(tx, user_id, sprint, amount, at).await?)
}
