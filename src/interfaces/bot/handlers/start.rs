use chrono::Utc;
use std::sync::Arc;
use teloxide::{prelude::*, utils::command::BotCommands};

use crate::application::Services;
use crate::application::ledger::types::UserId;
use crate::interfaces::bot::core::flow::Input;
use crate::interfaces::bot::ui::keyboards::main_menu_keyboard;
use crate::interfaces::bot::ui::menu::{referral_bonus_text, welcome_text};
use crate::interfaces::bot::utils::describe_error;

use super::menu;
use super::reply::{HandlerResult, MyDialogue, send_md, sender_id};
use super::text::drive;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "Start the bot. An invite link carries the inviter's id.")]
    Start(String),
    #[command(description = "Stop the current step.")]
    Cancel,
    #[command(description = "Show what the bot can do.")]
    Help,
}

/// The `/start` payload of an invite link is the inviter's user id.
pub fn parse_referrer(payload: &str) -> Option<UserId> {
    payload.trim().parse::<UserId>().ok().filter(|id| *id > 0)
}

pub async fn command_handler(
    bot: Bot,
    dialogue: MyDialogue,
    msg: Message,
    cmd: Command,
    services: Arc<Services>,
) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    match cmd {
        Command::Start(payload) => start(bot, dialogue, msg, payload, services).await,
        Command::Cancel => drive(&bot, &dialogue, &services, msg.chat.id, user_id, Input::Cancel).await,
        Command::Help => {
            menu::ensure_registered(&services, &msg).await;
            menu::help(&bot, &services, msg.chat.id, user_id).await
        }
    }
}

async fn start(
    bot: Bot,
    dialogue: MyDialogue,
    msg: Message,
    payload: String,
    services: Arc<Services>,
) -> HandlerResult {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let user_id = from.id.0 as UserId;
    let referrer = parse_referrer(&payload);
    dialogue.reset().await?;

    let registration = match services
        .engine
        .register(user_id, from.username.clone(), referrer, Utc::now())
        .await
    {
        Ok(registration) => registration,
        Err(err) => {
            log::error!("Failed to register user {}: {}", user_id, err);
            send_md(&bot, msg.chat.id, describe_error(&err, services.engine.config()), None).await?;
            return Ok(());
        }
    };

    if let Some((referrer_id, bonus)) = registration.referral_bonus {
        if let Err(e) = send_md(
            &bot,
            ChatId(referrer_id),
            referral_bonus_text(&registration.user, bonus),
            None,
        )
        .await
        {
            log::warn!("Failed to notify referrer {}: {}", referrer_id, e);
        }
    }

    send_md(
        &bot,
        msg.chat.id,
        welcome_text(&registration.user, registration.referral_bonus.is_some()),
        Some(main_menu_keyboard(services.is_admin(user_id)).into()),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referrer_comes_from_numeric_payload() {
        assert_eq!(parse_referrer("12345"), Some(12345));
        assert_eq!(parse_referrer(" 77 "), Some(77));
        assert_eq!(parse_referrer(""), None);
        assert_eq!(parse_referrer("abc"), None);
        assert_eq!(parse_referrer("-5"), None);
    }

    #[test]
    fn start_command_keeps_its_payload() {
        let parsed = Command::parse("/start 42", "zebranium_bot").ok();
        assert!(matches!(parsed, Some(Command::Start(payload)) if payload == "42"));
        let bare = Command::parse("/start", "zebranium_bot").ok();
        assert!(matches!(bare, Some(Command::Start(payload)) if payload.is_empty()));
    }
}
