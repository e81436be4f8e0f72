use chrono::Utc;
use std::sync::Arc;
use teloxide::prelude::*;

use crate::application::Services;
use crate::application::error::LedgerError;
use crate::application::ledger::types::UserId;
use crate::application::tasks::types::TaskId;
use crate::interfaces::bot::core::flow::Input;
use crate::interfaces::bot::ui::keyboards::{Callback, period_keyboard};
use crate::interfaces::bot::ui::menu::{escape_markdown, tops_text};
use crate::interfaces::bot::ui::states::State;
use crate::interfaces::bot::utils::describe_error;

use super::reply::{HandlerResult, MyDialogue, enter_state, send_md};
use super::{admin, menu, text};

pub async fn callback_handler(
    q: CallbackQuery,
    bot: Bot,
    dialogue: MyDialogue,
    services: Arc<Services>,
) -> HandlerResult {
    let user_id = q.from.id.0 as UserId;
    let chat_id = q
        .message
        .as_ref()
        .map(|message| message.chat.id)
        .unwrap_or(ChatId(user_id));
    let data = q.data.clone().unwrap_or_default();
    log::info!("[CALLBACK] Data: '{}' from ChatID: {}", data, chat_id);

    let Some(callback) = Callback::parse(&data) else {
        log::warn!("unknown callback data '{}' from {}", data, user_id);
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    bot.answer_callback_query(q.id.clone()).await?;

    match callback {
        Callback::Deposit => {
            dialogue.reset().await?;
            enter_state(&bot, &dialogue, &services, chat_id, user_id, State::AwaitingDepositAmount)
                .await?;
        }
        Callback::Withdraw => {
            dialogue.reset().await?;
            start_withdrawal(&bot, &dialogue, &services, chat_id, user_id).await?;
        }
        Callback::ConfirmWithdrawal => {
            clear_buttons(&bot, &q).await;
            text::drive(&bot, &dialogue, &services, chat_id, user_id, Input::Confirm).await?;
        }
        Callback::Cancel => {
            clear_buttons(&bot, &q).await;
            text::drive(&bot, &dialogue, &services, chat_id, user_id, Input::Cancel).await?;
        }
        Callback::ShowTask(task_id) => {
            menu::task_detail(&bot, &services, chat_id, user_id, task_id).await?;
        }
        Callback::StartProof(task_id) => {
            start_proof(&bot, &dialogue, &services, chat_id, user_id, task_id).await?;
        }
        Callback::PickPeriod(board) => {
            send_md(
                &bot,
                chat_id,
                escape_markdown("📅 Which period?"),
                Some(period_keyboard(board).into()),
            )
            .await?;
        }
        Callback::ShowTop(board, period) => {
            let text = match services.leaderboards.top(board, period, Utc::now()).await {
                Ok(entries) => tops_text(board, period, &entries),
                Err(err) => describe_error(&err, services.engine.config()),
            };
            send_md(&bot, chat_id, text, None).await?;
        }
        Callback::ResolveProof(proof_id, decision) => {
            let report = admin::resolve_proof(&bot, &services, user_id, proof_id, decision).await;
            clear_buttons(&bot, &q).await;
            send_md(&bot, chat_id, report, None).await?;
        }
        Callback::ResolveWithdrawal(withdrawal_id, decision) => {
            let report =
                admin::resolve_withdrawal(&bot, &services, user_id, withdrawal_id, decision).await;
            clear_buttons(&bot, &q).await;
            send_md(&bot, chat_id, report, None).await?;
        }
    }
    Ok(())
}

async fn start_withdrawal(
    bot: &Bot,
    dialogue: &MyDialogue,
    services: &Services,
    chat_id: ChatId,
    user_id: UserId,
) -> HandlerResult {
    let rewards = services.engine.config();
    let balance = match services.engine.user(user_id).await {
        Ok(user) => user.balance,
        Err(err) => {
            send_md(bot, chat_id, describe_error(&err, rewards), None).await?;
            return Ok(());
        }
    };
    if balance < rewards.min_withdrawal {
        let err = LedgerError::BelowMinimum {
            amount: balance,
            minimum: rewards.min_withdrawal,
        };
        send_md(bot, chat_id, describe_error(&err, rewards), None).await?;
        return Ok(());
    }
    enter_state(bot, dialogue, services, chat_id, user_id, State::AwaitingWithdrawAmount).await
}

/// Refuses up front what `submit_proof` would refuse, so the user is not asked for a photo in vain.
async fn start_proof(
    bot: &Bot,
    dialogue: &MyDialogue,
    services: &Services,
    chat_id: ChatId,
    user_id: UserId,
    task_id: TaskId,
) -> HandlerResult {
    let rewards = services.engine.config();
    let refusal = match services.tasks.require_task(task_id).await {
        Err(err) => Some(err),
        Ok(task) if !task.is_active() || !task.has_free_slot() => Some(LedgerError::TaskClosed(task_id)),
        Ok(_) => match services.engine.user(user_id).await {
            Err(err) => Some(err),
            Ok(user) if user.completed_tasks.contains_key(&task_id) => {
                Some(LedgerError::AlreadyCompleted { user_id, task_id })
            }
            Ok(_) => None,
        },
    };
    match refusal {
        Some(err) => {
            send_md(bot, chat_id, describe_error(&err, rewards), None).await?;
            Ok(())
        }
        None => {
            dialogue.reset().await?;
            enter_state(bot, dialogue, services, chat_id, user_id, State::AwaitingTaskProof { task_id })
                .await
        }
    }
}

async fn clear_buttons(bot: &Bot, q: &CallbackQuery) {
    if let Some(message) = &q.message {
        if let Err(e) = bot.edit_message_reply_markup(message.chat.id, message.id).await {
            log::debug!("Failed to clear buttons on message {}: {}", message.id.0, e);
        }
    }
}
