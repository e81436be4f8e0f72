use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{InputFile, ParseMode};

use crate::application::Services;
use crate::application::error::{LedgerError, LedgerResult};
use crate::application::ledger::types::UserId;
use crate::application::tasks::types::NewTask;
use crate::interfaces::bot::core::flow::{self, Action, Input};
use crate::interfaces::bot::ui::keyboards::*;
use crate::interfaces::bot::ui::menu::{
    broadcast_report_text, cancelled_text, invoice_text, main_menu_text, proof_review_caption,
    proof_submitted_text, reprompt_text, task_created_text, task_deleted_text,
    unknown_input_text, user_updated_text, withdrawal_review_text, withdrawal_submitted_text,
};
use crate::interfaces::bot::ui::states::State;
use crate::interfaces::bot::utils::describe_error;

use super::reply::{HandlerResult, MyDialogue, keyboard_for, prompt_for, send_md, sender_id};
use super::{admin, menu};

/// Pause between broadcast messages to stay under Telegram's flood limits.
const BROADCAST_DELAY: Duration = Duration::from_millis(50);

pub async fn text_handler(
    bot: Bot,
    dialogue: MyDialogue,
    msg: Message,
    services: Arc<Services>,
) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    let chat_id = msg.chat.id;
    menu::ensure_registered(&services, &msg).await;

    if let Some(text) = msg.text() {
        if route_menu_button(&bot, &dialogue, &services, chat_id, user_id, text.trim()).await? {
            return Ok(());
        }
    }

    match classify(&msg) {
        Some(input) => drive(&bot, &dialogue, &services, chat_id, user_id, input).await,
        None => Ok(()),
    }
}

fn classify(msg: &Message) -> Option<Input> {
    if let Some(photos) = msg.photo() {
        return photos
            .iter()
            .max_by_key(|photo| photo.width * photo.height)
            .map(|photo| Input::Photo(photo.file.id.clone()));
    }
    let text = msg.text()?;
    Some(match text.trim() {
        BTN_CANCEL | "/cancel" => Input::Cancel,
        BTN_SKIP | "/skip" => Input::Skip,
        BTN_CONFIRM => Input::Confirm,
        _ => Input::Text(text.to_string()),
    })
}

/// Top-level buttons always win over a pending conversation step.
async fn route_menu_button(
    bot: &Bot,
    dialogue: &MyDialogue,
    services: &Services,
    chat_id: ChatId,
    user_id: UserId,
    text: &str,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let is_admin = services.is_admin(user_id);
    let known = matches!(
        text,
        BTN_PROFILE | BTN_REFERRALS | BTN_TASKS | BTN_MINING | BTN_TOPS | BTN_HELP
    ) || (is_admin
        && matches!(
            text,
            BTN_ADMIN
                | BTN_BACK
                | BTN_STATS
                | BTN_USERS
                | BTN_BROADCAST
                | BTN_NEW_TASK
                | BTN_DELETE_TASK
                | BTN_REVIEW
                | BTN_EDIT_USER
                | BTN_EXPORT
                | BTN_MAINTENANCE_ON
                | BTN_MAINTENANCE_OFF
        ));
    if !known {
        return Ok(false);
    }
    dialogue.reset().await?;

    match text {
        BTN_PROFILE => menu::profile(bot, services, chat_id, user_id).await?,
        BTN_REFERRALS => menu::referrals(bot, services, chat_id, user_id).await?,
        BTN_TASKS => menu::tasks(bot, services, chat_id).await?,
        BTN_MINING => menu::mining(bot, services, chat_id, user_id).await?,
        BTN_TOPS => menu::tops(bot, chat_id).await?,
        BTN_HELP => menu::help(bot, services, chat_id, user_id).await?,
        BTN_ADMIN => admin::panel(bot, services, chat_id).await?,
        BTN_BACK => {
            send_md(
                bot,
                chat_id,
                main_menu_text(),
                Some(main_menu_keyboard(true).into()),
            )
            .await?;
        }
        BTN_STATS => admin::stats(bot, services, chat_id).await?,
        BTN_USERS => admin::user_list(bot, services, chat_id).await?,
        BTN_EXPORT => admin::export(bot, services, chat_id).await?,
        BTN_REVIEW => admin::review_queue(bot, services, chat_id).await?,
        BTN_MAINTENANCE_ON | BTN_MAINTENANCE_OFF => {
            admin::toggle_maintenance(bot, services, chat_id, user_id).await?
        }
        BTN_BROADCAST => {
            admin::begin(bot, dialogue, services, chat_id, user_id, State::AwaitingBroadcastText)
                .await?
        }
        BTN_NEW_TASK => {
            admin::begin(bot, dialogue, services, chat_id, user_id, State::AwaitingTaskFieldNumber)
                .await?
        }
        BTN_DELETE_TASK => {
            admin::begin(bot, dialogue, services, chat_id, user_id, State::AwaitingTaskDeleteNumber)
                .await?
        }
        BTN_EDIT_USER => {
            admin::begin(bot, dialogue, services, chat_id, user_id, State::AwaitingAdminTargetId)
                .await?
        }
        _ => {}
    }
    Ok(true)
}

/// Feeds one classified input through the dispatch table and carries out the resulting action.
pub async fn drive(
    bot: &Bot,
    dialogue: &MyDialogue,
    services: &Services,
    chat_id: ChatId,
    user_id: UserId,
    input: Input,
) -> HandlerResult {
    let state = dialogue.get().await?.unwrap_or_default();
    let step = flow::advance(&state, input);
    let is_admin = services.is_admin(user_id);

    match step.action {
        Action::Ignore => {
            send_md(
                bot,
                chat_id,
                unknown_input_text(),
                Some(main_menu_keyboard(is_admin).into()),
            )
            .await?;
        }
        Action::Cancelled => {
            dialogue.reset().await?;
            send_md(
                bot,
                chat_id,
                cancelled_text(),
                Some(main_menu_keyboard(is_admin).into()),
            )
            .await?;
        }
        Action::Reprompt(hint) => {
            let balance = match state {
                State::AwaitingWithdrawAmount => services.engine.user(user_id).await.ok().map(|u| u.balance),
                _ => None,
            };
            let text = reprompt_text(hint, &state, services.engine.config(), balance);
            send_md(bot, chat_id, text, Some(keyboard_for(&state, is_admin))).await?;
        }
        Action::Prompt => {
            let text = prompt_for(services, user_id, &step.next).await;
            let markup = keyboard_for(&step.next, is_admin);
            dialogue.update(step.next).await?;
            send_md(bot, chat_id, text, Some(markup)).await?;
        }
        action => {
            let outcome = if state.is_admin_flow() && !is_admin {
                Err(LedgerError::Unauthorized(user_id))
            } else {
                execute(bot, services, user_id, action).await
            };
            match outcome {
                Ok(done) => {
                    let markup = keyboard_for(&step.next, is_admin);
                    if step.next.is_idle() {
                        dialogue.reset().await?;
                    } else {
                        let prompt = prompt_for(services, user_id, &step.next).await;
                        dialogue.update(step.next).await?;
                        send_md(bot, chat_id, prompt, Some(markup.clone())).await?;
                    }
                    if let Some(text) = done {
                        send_md(bot, chat_id, text, Some(markup)).await?;
                    }
                }
                Err(err) if err.is_retryable_input() => {
                    let prompt = prompt_for(services, user_id, &state).await;
                    let text = format!("{}\n{}", describe_error(&err, services.engine.config()), prompt);
                    send_md(bot, chat_id, text, Some(keyboard_for(&state, is_admin))).await?;
                }
                Err(err) => {
                    log::info!("step failed for user {} in {:?}: {}", user_id, state, err);
                    dialogue.reset().await?;
                    send_md(
                        bot,
                        chat_id,
                        describe_error(&err, services.engine.config()),
                        Some(main_menu_keyboard(is_admin).into()),
                    )
                    .await?;
                }
            }
        }
    }
    Ok(())
}

/// Runs a terminal action. `Ok(Some(text))` is the confirmation for the user.
async fn execute(
    bot: &Bot,
    services: &Services,
    user_id: UserId,
    action: Action,
) -> LedgerResult<Option<String>> {
    let now = Utc::now();
    let rewards = services.engine.config();
    match action {
        Action::OpenInvoice { amount } => {
            let invoice = services.deposits.open_invoice(user_id, &amount, now).await?;
            Ok(Some(invoice_text(&invoice)))
        }
        Action::SubmitWithdrawal { amount } => {
            let request = services
                .approvals
                .submit_withdrawal(user_id, amount, format!("check:{}", user_id), now)
                .await?;
            let user = services.store.get_user(user_id).await.ok().flatten();
            let text = withdrawal_review_text(&request, user.as_ref(), rewards);
            for admin_id in &services.config.admin_ids {
                if let Err(e) = send_md(
                    bot,
                    ChatId(*admin_id),
                    text.clone(),
                    Some(withdrawal_review_keyboard(request.id).into()),
                )
                .await
                {
                    log::warn!("Failed to notify admin {} of withdrawal {}: {}", admin_id, request.id, e);
                }
            }
            Ok(Some(withdrawal_submitted_text(&request, rewards)))
        }
        Action::SubmitProof { task_id, image_ref } => {
            let proof_id = services
                .approvals
                .submit_proof(user_id, task_id, image_ref, now)
                .await?;
            let proof = services.approvals.get_proof(proof_id).await?;
            let user = services.store.get_user(user_id).await.ok().flatten();
            let task = services.tasks.get_task(task_id).await.ok().flatten();
            let caption = proof_review_caption(&proof, user.as_ref(), task.as_ref());
            for admin_id in &services.config.admin_ids {
                if let Err(e) = bot
                    .send_photo(ChatId(*admin_id), InputFile::file_id(proof.image_ref.clone()))
                    .caption(caption.clone())
                    .parse_mode(ParseMode::MarkdownV2)
                    .reply_markup(proof_review_keyboard(proof.id))
                    .await
                {
                    log::warn!("Failed to notify admin {} of proof {}: {}", admin_id, proof.id, e);
                }
            }
            Ok(Some(proof_submitted_text(task_id)))
        }
        Action::CreateTask { draft, image } => {
            let new_task = NewTask {
                id: draft.number,
                description: draft.description,
                image,
                reward: draft.reward.unwrap_or(rewards.task_reward),
                max_performers: draft.max_performers,
            };
            let task_id = services.tasks.create_task(new_task, now).await?;
            Ok(Some(task_created_text(task_id)))
        }
        Action::DeleteTask(task_id) => {
            let deleted = services.tasks.delete_task(task_id).await?;
            Ok(Some(task_deleted_text(task_id, deleted.dropped_proofs)))
        }
        Action::Broadcast(text) => {
            let (sent, failed) = broadcast(bot, services, &text).await?;
            Ok(Some(broadcast_report_text(sent, failed)))
        }
        Action::SelectAdminTarget(target) => {
            services.engine.user(target).await?;
            Ok(None)
        }
        Action::EditUser {
            target,
            field,
            value,
        } => {
            let change = services.admin.edit_user(user_id, target, field, &value).await?;
            Ok(Some(user_updated_text(target, &change)))
        }
        Action::Ignore | Action::Cancelled | Action::Reprompt(_) | Action::Prompt => Ok(None),
    }
}

/// Sends plain text to every unblocked user. Returns (delivered, failed).
async fn broadcast(bot: &Bot, services: &Services, text: &str) -> LedgerResult<(usize, usize)> {
    let targets = services.admin.broadcast_targets().await?;
    log::info!("broadcast to {} users started", targets.len());
    let (mut sent, mut failed) = (0, 0);
    for target in targets {
        match bot.send_message(ChatId(target), text).await {
            Ok(_) => sent += 1,
            Err(e) => {
                failed += 1;
                log::debug!("broadcast to {} failed: {}", target, e);
            }
        }
        tokio::time::sleep(BROADCAST_DELAY).await;
    }
    log::info!("broadcast finished sent={} failed={}", sent, failed);
    Ok((sent, failed))
}
