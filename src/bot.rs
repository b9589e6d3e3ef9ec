//! Subject-scoped automated replies to `@chatBot` mentions.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    completion::{Completion, FALLBACK_REPLY},
    db::{Conversation, UserId},
};

pub const DEFAULT_TRIGGER: &str = "@chatBot";
pub const DEFAULT_BOT_NAME: &str = "chatBot";
pub const DEFAULT_BOT_ID: Uuid = Uuid::from_u128(0x0195_2b1c_7d3e_7a00_8000_c4a7_b07d_0001);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The reserved author of every automated reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: UserId,
    /// Shown when the store has no user record for `id`.
    pub name: String,
}

impl Default for BotIdentity {
    fn default() -> Self {
        Self {
            id: DEFAULT_BOT_ID,
            name: DEFAULT_BOT_NAME.to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub identity: BotIdentity,
    pub trigger: String,
    pub timeout: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            identity: BotIdentity::default(),
            trigger: DEFAULT_TRIGGER.to_owned(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct BotAdapter {
    completion: Arc<dyn Completion>,
    config: BotConfig,
}

impl BotAdapter {
    pub fn new(completion: Arc<dyn Completion>, config: BotConfig) -> Self {
        Self { completion, config }
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.config.identity
    }

    /// The question behind a leading, case-sensitive mention.
    pub fn question<'a>(&self, text: &'a str) -> Option<&'a str> {
        text.strip_prefix(self.config.trigger.as_str()).map(str::trim)
    }

    /// `None` means no reply should be posted: the conversation has no
    /// subject, or the server is shutting down.
    pub async fn reply(
        &self,
        conversation: &Conversation,
        question: &str,
        shutdown: &CancellationToken,
    ) -> Option<String> {
        let Some(subject) = conversation.subject() else {
            warn!(conversation = %conversation.id, "bot mentioned in a conversation without subject");
            return None;
        };

        let prompt = prompt(subject, question);
        let answer = tokio::select! {
            _ = shutdown.cancelled() => {
                info!(conversation = %conversation.id, "bot reply abandoned on shutdown");
                return None;
            }
            answer = tokio::time::timeout(self.config.timeout, self.completion.complete(&prompt)) => answer,
        };

        Some(answer.unwrap_or_else(|_| {
            warn!(
                conversation = %conversation.id,
                timeout = ?self.config.timeout,
                "completion timed out"
            );
            FALLBACK_REPLY.to_owned()
        }))
    }
}

fn prompt(subject: &str, question: &str) -> String {
    format!(
        r#"Answer like you are a "{subject}" bot, so don't answer if the question is about a different field. {question}"#
    )
}
