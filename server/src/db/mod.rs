use chrono::NaiveDateTime;
use rocket::{
    fairing::{self, AdHoc},
    Build, Rocket,
};
use rocket_db_pools::Database;
use sqlx::{sqlite::SqlitePoolOptions, Sqlite, SqlitePool, Transaction};
use tracing::instrument;

#[derive(Database, Clone, Debug)]
#[database("focus-sprints")]
pub struct DB(SqlitePool);

mod challenges;
mod leaderboard;
mod ledger;
mod mrr;
mod periods;
mod streaks;
pub mod types;
mod wins;

use self::types::{CommunityConfig, UserRecord};

pub(crate) const USER_COLUMNS: &str = r#"
    id, account_id, community_id, display_name, total_points, last_awarded_at, created_at
"#;

impl DB {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self(pool)
    }

    /// Fresh, migrated database that lives as long as the returned handle.
    pub async fn in_memory() -> anyhow::Result<Self> {
        // A single connection that never expires, otherwise the database is
        // dropped together with the connection that created it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Self(pool);
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.0).await
    }

    pub async fn begin(&self) -> sqlx::Result<Transaction<'static, Sqlite>> {
        self.0.begin().await
    }

    /// Returns the user's id, creating the (account, community) row on first
    /// contact. A provided display name replaces the cached one.
    #[instrument(skip(tx))]
    pub async fn upsert_user(
        tx: &mut Transaction<'static, Sqlite>,
        account_id: &str,
        community_id: &str,
        display_name: Option<&str>,
        now: NaiveDateTime,
    ) -> sqlx::Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO users (account_id, community_id, display_name, total_points, created_at)
            VALUES ($1, $2, $3, 0, $4)
            ON CONFLICT (account_id, community_id) DO UPDATE
            SET display_name = COALESCE(excluded.display_name, users.display_name)
            RETURNING id
            "#,
        )
        .bind(account_id)
        .bind(community_id)
        .bind(display_name)
        .bind(now)
        .fetch_one(tx.as_mut())
        .await?;

        Ok(id)
    }

    pub async fn get_user(
        &self,
        account_id: &str,
        community_id: &str,
    ) -> sqlx::Result<Option<UserRecord>> {
        sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE account_id = $1 AND community_id = $2"
        ))
        .bind(account_id)
        .bind(community_id)
        .fetch_optional(&self.0)
        .await
    }

    pub async fn get_user_by_id(&self, user_id: i64) -> sqlx::Result<Option<UserRecord>> {
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.0)
            .await
    }

    pub async fn get_user_in_tx(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
    ) -> sqlx::Result<UserRecord> {
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_one(tx.as_mut())
            .await
    }

    pub async fn set_leaderboard_destination(
        tx: &mut Transaction<'static, Sqlite>,
        community_id: &str,
        destination: Option<&str>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO community_configs (community_id, leaderboard_destination)
            VALUES ($1, $2)
            ON CONFLICT (community_id) DO UPDATE
            SET leaderboard_destination = excluded.leaderboard_destination
            "#,
        )
        .bind(community_id)
        .bind(destination)
        .execute(tx.as_mut())
        .await?;
        Ok(())
    }

    pub async fn set_reminder_destination(
        tx: &mut Transaction<'static, Sqlite>,
        community_id: &str,
        destination: Option<&str>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO community_configs (community_id, reminder_destination)
            VALUES ($1, $2)
            ON CONFLICT (community_id) DO UPDATE
            SET reminder_destination = excluded.reminder_destination
            "#,
        )
        .bind(community_id)
        .bind(destination)
        .execute(tx.as_mut())
        .await?;
        Ok(())
    }

    pub async fn set_mrr_destination(
        tx: &mut Transaction<'static, Sqlite>,
        community_id: &str,
        destination: Option<&str>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO community_configs (community_id, mrr_destination)
            VALUES ($1, $2)
            ON CONFLICT (community_id) DO UPDATE
            SET mrr_destination = excluded.mrr_destination
            "#,
        )
        .bind(community_id)
        .bind(destination)
        .execute(tx.as_mut())
        .await?;
        Ok(())
    }

    /// A community without a row gets an empty config.
    pub async fn community_config(&self, community_id: &str) -> sqlx::Result<CommunityConfig> {
        let config: Option<CommunityConfig> = sqlx::query_as(
            r#"
            SELECT community_id, leaderboard_destination, reminder_destination, mrr_destination
            FROM community_configs
            WHERE community_id = $1
            "#,
        )
        .bind(community_id)
        .fetch_optional(&self.0)
        .await?;

        Ok(config.unwrap_or_else(|| CommunityConfig {
            community_id: community_id.to_string(),
            ..Default::default()
        }))
    }

    pub async fn community_configs(&self) -> sqlx::Result<Vec<CommunityConfig>> {
        sqlx::query_as(
            r#"
            SELECT community_id, leaderboard_destination, reminder_destination, mrr_destination
            FROM community_configs
            ORDER BY community_id
            "#,
        )
        .fetch_all(&self.0)
        .await
    }

    /// Pairs both users with each other. Re-pairing is a no-op.
    #[instrument(skip(tx))]
    pub async fn add_buddy_pair(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        buddy_id: i64,
        now: NaiveDateTime,
    ) -> sqlx::Result<()> {
        for (user, buddy) in [(user_id, buddy_id), (buddy_id, user_id)] {
            sqlx::query(
                r#"
                INSERT INTO buddy_pairs (user_id, buddy_id, notify_on_completion, created_at)
                VALUES ($1, $2, TRUE, $3)
                ON CONFLICT (user_id, buddy_id) DO NOTHING
                "#,
            )
            .bind(user)
            .bind(buddy)
            .bind(now)
            .execute(tx.as_mut())
            .await?;
        }
        Ok(())
    }

    pub async fn set_buddy_notifications(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        buddy_id: i64,
        enabled: bool,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE buddy_pairs
            SET notify_on_completion = $3
            WHERE user_id = $1 AND buddy_id = $2
            "#,
        )
        .bind(user_id)
        .bind(buddy_id)
        .bind(enabled)
        .execute(tx.as_mut())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Buddies of `user_id` that want to hear about their completions.
    pub async fn buddies_to_notify(&self, user_id: i64) -> sqlx::Result<Vec<UserRecord>> {
        sqlx::query_as(
            r#"
            SELECT u.id, u.account_id, u.community_id, u.display_name, u.total_points,
                   u.last_awarded_at, u.created_at
            FROM buddy_pairs b
            JOIN users u ON u.id = b.buddy_id
            WHERE b.user_id = $1 AND b.notify_on_completion = TRUE
            ORDER BY u.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.0)
        .await
    }
}

async fn run_migrations(rocket: Rocket<Build>) -> fairing::Result {
    match DB::fetch(&rocket) {
        Some(db) => match db.migrate().await {
            Ok(_) => Ok(rocket),
            Err(e) => {
                rocket::error!("Failed to initialize SQLx database: {}", e);
                Err(rocket)
            }
        },
        None => Err(rocket),
    }
}

pub fn stage() -> AdHoc {
    AdHoc::on_ignite("SQLx Stage", |rocket| async {
        rocket
            .attach(DB::init())
            .attach(AdHoc::try_on_ignite("SQLx Migrations", run_migrations))
    })
}
