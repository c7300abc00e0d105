use reqwest::{Client, Response};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{Event, Level, Subscriber};

pub enum MessageType {
    /// Operator alert, sent to the alert chat with the log level prefixed.
    Alert((String, Level)),
    /// Community-facing message, sent verbatim to the given chat.
    Post { chat_id: String, text: String },
}

/// Fire-and-forget Telegram client.
///
/// Messages are queued and delivered by a background task, so callers never
/// wait on (or fail because of) the Telegram API.
#[derive(Clone)]
pub struct TelegramSubscriber {
    sender: mpsc::UnboundedSender<MessageType>,
}

fn escape_markdown(message: &str) -> String {
    const SPECIAL: &[char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    ];
    let mut escaped = String::with_capacity(message.len());
    for c in message.chars() {
        if SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

async fn send_message(
    client: &Client,
    bot_token: &str,
    chat_id: &str,
    text: &str,
    parse_mode: Option<&str>,
) -> anyhow::Result<Response> {
    let url = format!("https://api.telegram.org/bot{}/sendMessage", bot_token);

    let mut params = vec![("chat_id", chat_id), ("text", text)];
    if let Some(parse_mode) = parse_mode {
        params.push(("parse_mode", parse_mode));
    }

    Ok(client.post(&url).form(&params).send().await?)
}

async fn sender_task(
    mut reader: mpsc::UnboundedReceiver<MessageType>,
    client: Client,
    bot_token: String,
    alert_chat_id: String,
) {
    while let Some(msg) = reader.recv().await {
        let result = match msg {
            MessageType::Alert((message, level)) => {
                let text = format!("*{}*: `{}`", level.as_str(), escape_markdown(&message));
                send_message(&client, &bot_token, &alert_chat_id, &text, Some("MarkdownV2")).await
            }
            MessageType::Post { chat_id, text } => {
                send_message(&client, &bot_token, &chat_id, &text, None).await
            }
        };

        match result {
            Ok(response) if response.status().is_success() => {}
            // eprintln! because a tracing event here would loop back into this sender
            Ok(response) => eprintln!(
                "Failed to send message: Received HTTP {}:",
                response.status()
            ),
            Err(e) => eprintln!("Failed to send message: {}", e),
        }
    }
}

impl TelegramSubscriber {
    pub async fn new(bot_token: String, alert_chat_id: String) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(sender_task(receiver, Client::new(), bot_token, alert_chat_id));
        Self { sender }
    }

    pub fn send_alert(&self, message: &str, level: &Level) {
        let _ = self
            .sender
            .send(MessageType::Alert((message.to_string(), *level)));
    }

    pub fn post(&self, chat_id: &str, text: &str) {
        let _ = self.sender.send(MessageType::Post {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
        });
    }
}

impl<S: Subscriber> tracing_subscriber::Layer<S> for TelegramSubscriber {
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let message = format!("{}", visitor);

        // Logs are not persisted anywhere, so warnings and errors go to the
        // operators' chat where someone can react on them
        let level = event.metadata().level();
        if level <= &Level::WARN {
            self.send_alert(&message, level);
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl fmt::Display for MessageVisitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}
