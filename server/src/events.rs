use std::sync::Arc;

use rocket::tokio::{self, sync::mpsc, task::JoinHandle};
use shared::{telegram::TelegramSubscriber, Points};
use tracing::{instrument, warn};

use crate::db::DB;

/// Side effects emitted after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    GoalCompleted {
        user_id: i64,
        community_id: String,
        name: String,
        position: u32,
        title: String,
        points: Points,
    },
    StreakMilestone {
        community_id: String,
        name: String,
        streak: u32,
        bonus: Points,
    },
    Post {
        destination: String,
        text: String,
    },
}

/// Sending half of the notification channel. Sending never blocks and never
/// fails the caller; a closed channel only drops the notification.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn send(&self, notification: Notification) {
        if let Err(e) = self.sender.send(notification) {
            warn!("Notification dropped, dispatcher is gone: {:?}", e.0);
        }
    }

    pub fn post(&self, destination: &str, text: String) {
        self.send(Notification::Post {
            destination: destination.to_string(),
            text,
        });
    }
}

#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, destination: &str, text: &str) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl NotificationSink for TelegramSubscriber {
    async fn deliver(&self, destination: &str, text: &str) -> anyhow::Result<()> {
        self.post(destination, text);
        Ok(())
    }
}

/// Drains the channel until every [`Notifier`] is dropped.
pub fn spawn_dispatcher(
    db: DB,
    sink: Arc<dyn NotificationSink>,
    mut receiver: mpsc::UnboundedReceiver<Notification>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = receiver.recv().await {
            if let Err(e) = dispatch(&db, sink.as_ref(), notification).await {
                warn!("Failed to deliver notification: {:#}", e);
            }
        }
    })
}

#[instrument(skip(db, sink))]
pub async fn dispatch(
    db: &DB,
    sink: &dyn NotificationSink,
    notification: Notification,
) -> anyhow::Result<()> {
    match notification {
        Notification::GoalCompleted {
            user_id,
            name,
            title,
            points,
            ..
        } => {
            // Buddies are messaged directly, their account id is the chat.
            for buddy in db.buddies_to_notify(user_id).await? {
                let text = format!(
                    "🤝 {}, your accountability buddy {name} just completed \"{title}\" (+{points} pts). Cheer them on!",
                    buddy.name()
                );
                if let Err(e) = sink.deliver(&buddy.account_id, &text).await {
                    warn!("Failed to notify buddy {}: {:#}", buddy.account_id, e);
                }
            }
        }
        Notification::StreakMilestone {
            community_id,
            name,
            streak,
            bonus,
        } => {
            let config = db.community_config(&community_id).await?;
            if let Some(destination) = config.leaderboard_destination() {
                let text = format!(
                    "🔥 {name} just hit a {streak}-day check-in streak and earned {bonus} bonus points!"
                );
                sink.deliver(destination, &text).await?;
            }
        }
        Notification::Post { destination, text } => sink.deliver(&destination, &text).await?,
    }
    Ok(())
}
