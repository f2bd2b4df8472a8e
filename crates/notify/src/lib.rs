//! Chat Port notifier: a send-only Telegram client. Unlike a full operator
//! console, this crate never reads updates or dispatches commands — the
//! fabric only ever pushes alerts outward.

use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::warn;

use common::{ChatPort, Error, Result};

pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self { bot: Bot::new(token.into()) }
    }
}

#[async_trait]
impl ChatPort for TelegramNotifier {
    async fn send(&self, channel: &str, text: &str) -> Result<()> {
        let chat_id: i64 = channel
            .parse()
            .map_err(|_| Error::Config(format!("invalid chat channel id: {channel}")))?;

        if let Err(err) = self.bot.send_message(ChatId(chat_id), text).await {
            warn!(channel, %err, "failed to deliver chat notification");
            return Err(Error::Other(err.to_string()));
        }
        Ok(())
    }
}
