use std::{str::FromStr, time::Duration};

use anyhow::Context;

use crate::{
    bot::{self, BotConfig, BotIdentity},
    completion::CompletionConfig,
};

const DEFAULT_DATABASE_URL: &str = "sqlite://relay.db?mode=rwc";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_CLIENT_ORIGIN: &str = "http://localhost:5173";
const DEFAULT_COMPLETION_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-lite-preview-02-05:free";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub client_origin: String,
    pub completion: CompletionConfig,
    pub bot: BotConfig,
}

impl Config {
    /// Reads the environment, after loading `.env` if there is one.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bot_timeout = parse_or(&var, "BOT_TIMEOUT_SECS", bot::DEFAULT_TIMEOUT.as_secs())?;

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned()),
            port: parse_or(&var, "PORT", DEFAULT_PORT)?,
            client_origin: var("CLIENT_ORIGIN").unwrap_or_else(|| DEFAULT_CLIENT_ORIGIN.to_owned()),
            completion: CompletionConfig {
                api_url: var("OPENROUTER_URL").unwrap_or_else(|| DEFAULT_COMPLETION_URL.to_owned()),
                api_key: var("OPENROUTER_API_KEY"),
                model: var("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
            },
            bot: BotConfig {
                identity: BotIdentity {
                    id: parse_or(&var, "BOT_USER_ID", bot::DEFAULT_BOT_ID)?,
                    name: var("BOT_NAME").unwrap_or_else(|| bot::DEFAULT_BOT_NAME.to_owned()),
                },
                trigger: var("BOT_TRIGGER").unwrap_or_else(|| bot::DEFAULT_TRIGGER.to_owned()),
                timeout: Duration::from_secs(bot_timeout),
            },
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}
