use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::InputFile;

use crate::application::Services;
use crate::application::error::LedgerError;
use crate::application::ledger::types::UserId;
use crate::application::tasks::types::TaskId;
use crate::interfaces::bot::ui::keyboards::{
    profile_keyboard, task_detail_keyboard, tasks_keyboard, tops_keyboard,
};
use crate::interfaces::bot::ui::menu::{
    escape_markdown, help_text, mining_cooldown_text, mining_success_text, profile_text,
    referrals_text, task_detail_text, tasks_list_text,
};
use crate::interfaces::bot::utils::describe_error;

use super::reply::{HandlerResult, send_md};

/// Registers the sender on first contact so every other handler can rely on the record.
pub async fn ensure_registered(services: &Services, msg: &Message) {
    let Some(user) = msg.from() else {
        return;
    };
    let user_id = user.id.0 as UserId;
    match services.store.get_user(user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            if let Err(e) = services
                .engine
                .register(user_id, user.username.clone(), None, Utc::now())
                .await
            {
                log::error!("Failed to register user {}: {}", user_id, e);
            }
        }
        Err(e) => log::error!("Failed to load user {}: {}", user_id, e),
    }
}

pub async fn profile(bot: &Bot, services: &Services, chat_id: ChatId, user_id: UserId) -> HandlerResult {
    let rewards = services.engine.config();
    match services.engine.user(user_id).await {
        Ok(user) => {
            let can_withdraw = user.balance >= rewards.min_withdrawal;
            send_md(
                bot,
                chat_id,
                profile_text(&user, rewards),
                Some(profile_keyboard(can_withdraw).into()),
            )
            .await?;
        }
        Err(err) => {
            send_md(bot, chat_id, describe_error(&err, rewards), None).await?;
        }
    }
    Ok(())
}

pub async fn referrals(bot: &Bot, services: &Services, chat_id: ChatId, user_id: UserId) -> HandlerResult {
    let me = bot.get_me().await?;
    let bot_name = me.username.clone().unwrap_or_default();
    let link = format!("https://t.me/{}?start={}", bot_name, user_id);
    let count = services
        .engine
        .user(user_id)
        .await
        .map(|user| user.referrals.len())
        .unwrap_or(0);
    send_md(
        bot,
        chat_id,
        referrals_text(&link, count, services.engine.config().referral_bonus),
        None,
    )
    .await?;
    Ok(())
}

pub async fn tasks(bot: &Bot, services: &Services, chat_id: ChatId) -> HandlerResult {
    match services.tasks.list_active().await {
        Ok(tasks) => {
            let markup = (!tasks.is_empty()).then(|| tasks_keyboard(&tasks).into());
            send_md(bot, chat_id, tasks_list_text(&tasks), markup).await?;
        }
        Err(err) => {
            send_md(bot, chat_id, describe_error(&err, services.engine.config()), None).await?;
        }
    }
    Ok(())
}

/// Shows one task, with its image when the admin attached one.
pub async fn task_detail(
    bot: &Bot,
    services: &Services,
    chat_id: ChatId,
    user_id: UserId,
    task_id: TaskId,
) -> HandlerResult {
    let task = match services.tasks.get_task(task_id).await {
        Ok(Some(task)) if task.is_active() => task,
        Ok(_) => {
            let err = LedgerError::task_not_found(task_id);
            send_md(bot, chat_id, describe_error(&err, services.engine.config()), None).await?;
            return Ok(());
        }
        Err(err) => {
            send_md(bot, chat_id, describe_error(&err, services.engine.config()), None).await?;
            return Ok(());
        }
    };
    let already_done = services
        .store
        .get_user(user_id)
        .await
        .ok()
        .flatten()
        .map(|user| user.completed_tasks.contains_key(&task_id))
        .unwrap_or(false);
    let text = task_detail_text(&task, already_done);
    let markup = (!already_done).then(|| task_detail_keyboard(task_id));

    if let Some(image) = &task.image {
        let mut request = bot
            .send_photo(chat_id, InputFile::file_id(image.clone()))
            .caption(text)
            .parse_mode(teloxide::types::ParseMode::MarkdownV2);
        if let Some(markup) = markup {
            request = request.reply_markup(markup);
        }
        request.await?;
    } else {
        send_md(bot, chat_id, text, markup.map(Into::into)).await?;
    }
    Ok(())
}

pub async fn mining(bot: &Bot, services: &Services, chat_id: ChatId, user_id: UserId) -> HandlerResult {
    let rewards = services.engine.config();
    let text = match services.engine.claim_mining(user_id, Utc::now()).await {
        Ok(claim) => mining_success_text(&claim, rewards.mining_cooldown),
        Err(LedgerError::Cooldown { remaining }) => {
            let balance = services
                .engine
                .user(user_id)
                .await
                .map(|user| user.balance)
                .unwrap_or(0);
            mining_cooldown_text(remaining, balance)
        }
        Err(err) => describe_error(&err, rewards),
    };
    send_md(bot, chat_id, text, None).await?;
    Ok(())
}

pub async fn tops(bot: &Bot, chat_id: ChatId) -> HandlerResult {
    send_md(
        bot,
        chat_id,
        escape_markdown("📈 Which leaderboard?"),
        Some(tops_keyboard().into()),
    )
    .await?;
    Ok(())
}

pub async fn help(bot: &Bot, services: &Services, chat_id: ChatId, user_id: UserId) -> HandlerResult {
    let mut text = help_text();
    if services.is_admin(user_id) {
        text.push_str(&format!("\n{}", escape_markdown("👑 Admin tools are under the Admin button.")));
    }
    send_md(bot, chat_id, text, None).await?;
    Ok(())
}

