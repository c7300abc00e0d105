#[macro_use]
extern crate rocket;

mod entrypoints;

use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use rocket::fairing::AdHoc;
use rocket_db_pools::Database;
use shared::{openai::OpenAiEstimator, telegram::TelegramSubscriber, Estimator, Unconfigured};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use focus_sprints_server::{
    db::{self, DB},
    events::{self, Notifier},
    scheduler::{self, SchedulerConfig},
    Context,
};

fn default_estimator_timeout_secs() -> u64 {
    10
}

#[derive(Debug, serde::Deserialize)]
pub struct Env {
    telegram_token: String,
    telegram_alert_chat_id: String,
    openai_api_key: Option<String>,
    openai_model: Option<String>,
    #[serde(default = "default_estimator_timeout_secs")]
    estimator_timeout_secs: u64,
}

#[launch]
async fn rocket() -> _ {
    dotenv::dotenv().ok();

    let env = envy::from_env::<Env>().expect("Failed to load environment variables");
    let scheduler_config =
        envy::from_env::<SchedulerConfig>().expect("Failed to load scheduler configuration");

    let telegram = Arc::new(
        TelegramSubscriber::new(env.telegram_token.clone(), env.telegram_alert_chat_id.clone())
            .await,
    );

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(telegram.as_ref().clone());
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    let estimator_timeout = Duration::from_secs(env.estimator_timeout_secs);
    let estimator: Arc<dyn Estimator> = match env.openai_api_key.clone() {
        Some(api_key) => Arc::new(
            OpenAiEstimator::new(api_key, env.openai_model.clone(), estimator_timeout)
                .expect("Failed to create estimator client"),
        ),
        None => {
            tracing::info!("OPENAI_API_KEY is not set, goals get the default points");
            Arc::new(Unconfigured)
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    rocket::build()
        .attach(db::stage())
        .attach(engine_stage(telegram, estimator, estimator_timeout))
        .attach(scheduler::stage(scheduler_config, running))
        .attach(AdHoc::on_shutdown(
            "Stop periodic sweeps",
            |_| {
                Box::pin(async move {
                    running_clone.store(false, std::sync::atomic::Ordering::Relaxed);
                })
            },
        ))
        .attach(entrypoints::stage())
}

/// Builds the engine context once the database pool exists.
fn engine_stage(
    sink: Arc<TelegramSubscriber>,
    estimator: Arc<dyn Estimator>,
    estimator_timeout: Duration,
) -> AdHoc {
    AdHoc::on_ignite("Engine stage", move |rocket| async move {
        rocket.attach(AdHoc::try_on_ignite(
            "Engine context",
            move |rocket| async move {
                let Some(db) = DB::fetch(&rocket).cloned() else {
                    rocket::error!("Engine context needs the database pool");
                    return Err(rocket);
                };
                let (notifier, receiver) = Notifier::channel();
                events::spawn_dispatcher(db.clone(), sink, receiver);
                let context =
                    Context::new(db, notifier).with_estimator(estimator, estimator_timeout);
                Ok(rocket.manage(context))
            },
        ))
    })
}
