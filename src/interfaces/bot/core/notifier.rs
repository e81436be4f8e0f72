use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;

use crate::application::payments::{DepositEvent, Notifier};
use crate::interfaces::bot::ui::menu::deposit_event_text;

/// Delivers background notifications through the bot.
pub struct BotNotifier {
    bot: Bot,
}

impl BotNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for BotNotifier {
    async fn deposit_event(&self, event: DepositEvent) {
        let user_id = match &event {
            DepositEvent::Credited { invoice, .. }
            | DepositEvent::Closed { invoice }
            | DepositEvent::Lapsed { invoice } => invoice.user_id,
        };
        if let Err(e) = self
            .bot
            .send_message(ChatId(user_id), deposit_event_text(&event))
            .parse_mode(ParseMode::MarkdownV2)
            .await
        {
            log::warn!("Failed to notify user {} about a deposit: {}", user_id, e);
        }
    }
}
