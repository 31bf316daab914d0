use std::fmt;

use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::errors::AppError;

/// Session key for the queued flash messages.
const MESSAGES_KEY: &str = "_messages";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Success,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Success => "success",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A one-shot notification queued in the session and rendered at the top
/// of the next page the browser loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub level: Level,
    pub text: String,
}

/// Queues a message for the next rendered page.
pub async fn push(session: &Session, level: Level, text: impl Into<String>) -> Result<(), AppError> {
    let mut queued: Vec<Message> = session.get(MESSAGES_KEY).await?.unwrap_or_default();
    queued.push(Message {
        level,
        text: text.into(),
    });
    session.insert(MESSAGES_KEY, queued).await?;
    Ok(())
}

/// Drains the queued messages; each message renders on exactly one page.
pub async fn take(session: &Session) -> Result<Vec<Message>, AppError> {
    Ok(session
        .remove::<Vec<Message>>(MESSAGES_KEY)
        .await?
        .unwrap_or_default())
}
