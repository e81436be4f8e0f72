use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{InputFile, ParseMode};

use crate::application::Services;
use crate::application::approvals::types::{Decision, ProofId, ProofOutcome, WithdrawalId, WithdrawalOutcome};
use crate::application::error::LedgerError;
use crate::application::export::{EXPORT_FILE_NAME, export_users};
use crate::application::ledger::types::UserId;
use crate::interfaces::bot::ui::keyboards::{
    admin_menu_keyboard, proof_review_keyboard, withdrawal_review_keyboard,
};
use crate::interfaces::bot::ui::menu::{
    admin_menu_text, escape_markdown, maintenance_toggled_text, proof_approved_user_text,
    proof_rejected_user_text, proof_review_caption, review_queue_empty_text, stats_text,
    withdrawal_approved_user_text, withdrawal_rejected_user_text, withdrawal_review_text,
};
use crate::interfaces::bot::ui::states::State;
use crate::interfaces::bot::utils::describe_error;

use super::reply::{HandlerResult, MyDialogue, enter_state, send_md};

pub async fn panel(bot: &Bot, services: &Services, chat_id: ChatId) -> HandlerResult {
    let maintenance = services.admin.maintenance_mode().await.unwrap_or(false);
    send_md(
        bot,
        chat_id,
        admin_menu_text(maintenance),
        Some(admin_menu_keyboard(maintenance).into()),
    )
    .await?;
    Ok(())
}

pub async fn stats(bot: &Bot, services: &Services, chat_id: ChatId) -> HandlerResult {
    let text = match services.admin.stats().await {
        Ok(stats) => stats_text(&stats, services.deposits.tracked_count()),
        Err(err) => describe_error(&err, services.engine.config()),
    };
    send_md(bot, chat_id, text, None).await?;
    Ok(())
}

/// The list is plain text split into message-sized chunks.
pub async fn user_list(bot: &Bot, services: &Services, chat_id: ChatId) -> HandlerResult {
    match services.admin.user_list().await {
        Ok(chunks) if chunks.is_empty() => {
            bot.send_message(chat_id, "No users yet.").await?;
        }
        Ok(chunks) => {
            for chunk in chunks {
                bot.send_message(chat_id, chunk).await?;
            }
        }
        Err(err) => {
            send_md(bot, chat_id, describe_error(&err, services.engine.config()), None).await?;
        }
    }
    Ok(())
}

pub async fn export(bot: &Bot, services: &Services, chat_id: ChatId) -> HandlerResult {
    match export_users(&services.store).await {
        Ok(export) => {
            log::info!("exporting {} users to chat {}", export.rows, chat_id);
            bot.send_document(
                chat_id,
                InputFile::memory(export.csv.into_bytes()).file_name(EXPORT_FILE_NAME),
            )
            .caption(format!("{} users", export.rows))
            .await?;
        }
        Err(err) => {
            send_md(bot, chat_id, describe_error(&err, services.engine.config()), None).await?;
        }
    }
    Ok(())
}

pub async fn toggle_maintenance(
    bot: &Bot,
    services: &Services,
    chat_id: ChatId,
    admin_id: UserId,
) -> HandlerResult {
    match services.admin.toggle_maintenance(admin_id).await {
        Ok(enabled) => {
            send_md(
                bot,
                chat_id,
                maintenance_toggled_text(enabled),
                Some(admin_menu_keyboard(enabled).into()),
            )
            .await?;
        }
        Err(err) => {
            send_md(bot, chat_id, describe_error(&err, services.engine.config()), None).await?;
        }
    }
    Ok(())
}

/// Re-sends every pending proof and withdrawal with its review buttons.
pub async fn review_queue(bot: &Bot, services: &Services, chat_id: ChatId) -> HandlerResult {
    let proofs = services.approvals.pending_proofs().await.unwrap_or_else(|e| {
        log::error!("Failed to list pending proofs: {}", e);
        Vec::new()
    });
    let withdrawals = services.approvals.pending_withdrawals().await.unwrap_or_else(|e| {
        log::error!("Failed to list pending withdrawals: {}", e);
        Vec::new()
    });
    if proofs.is_empty() && withdrawals.is_empty() {
        send_md(bot, chat_id, review_queue_empty_text(), None).await?;
        return Ok(());
    }

    for proof in proofs {
        let user = services.store.get_user(proof.user_id).await.ok().flatten();
        let task = services.tasks.get_task(proof.task_id).await.ok().flatten();
        bot.send_photo(chat_id, InputFile::file_id(proof.image_ref.clone()))
            .caption(proof_review_caption(&proof, user.as_ref(), task.as_ref()))
            .parse_mode(ParseMode::MarkdownV2)
            .reply_markup(proof_review_keyboard(proof.id))
            .await?;
    }
    for request in withdrawals {
        let user = services.store.get_user(request.user_id).await.ok().flatten();
        send_md(
            bot,
            chat_id,
            withdrawal_review_text(&request, user.as_ref(), services.engine.config()),
            Some(withdrawal_review_keyboard(request.id).into()),
        )
        .await?;
    }
    Ok(())
}

/// Starts an admin conversation after re-checking the allow-list.
pub async fn begin(
    bot: &Bot,
    dialogue: &MyDialogue,
    services: &Services,
    chat_id: ChatId,
    user_id: UserId,
    state: State,
) -> HandlerResult {
    if !services.is_admin(user_id) {
        let err = LedgerError::Unauthorized(user_id);
        send_md(bot, chat_id, describe_error(&err, services.engine.config()), None).await?;
        return Ok(());
    }
    enter_state(bot, dialogue, services, chat_id, user_id, state).await
}

/// Applies a review decision. Returns the line the reviewing admin sees.
pub async fn resolve_proof(
    bot: &Bot,
    services: &Services,
    admin_id: UserId,
    proof_id: ProofId,
    decision: Decision,
) -> String {
    if !services.is_admin(admin_id) {
        return describe_error(&LedgerError::Unauthorized(admin_id), services.engine.config());
    }
    match services.approvals.resolve_proof(proof_id, decision, Utc::now()).await {
        Ok(ProofOutcome::Approved { proof, reward }) => {
            log::info!("admin {} approved proof {}", admin_id, proof.id);
            notify_user(bot, proof.user_id, proof_approved_user_text(proof.task_id, reward)).await;
            escape_markdown(&format!(
                "✅ Proof #{} approved{}.",
                proof.id,
                reward.map(|r| format!(", +{} ZB paid", r)).unwrap_or_default()
            ))
        }
        Ok(ProofOutcome::Rejected { proof }) => {
            log::info!("admin {} rejected proof {}", admin_id, proof.id);
            notify_user(bot, proof.user_id, proof_rejected_user_text(proof.task_id)).await;
            escape_markdown(&format!("❌ Proof #{} rejected.", proof.id))
        }
        Err(err) => describe_error(&err, services.engine.config()),
    }
}

pub async fn resolve_withdrawal(
    bot: &Bot,
    services: &Services,
    admin_id: UserId,
    withdrawal_id: WithdrawalId,
    decision: Decision,
) -> String {
    if !services.is_admin(admin_id) {
        return describe_error(&LedgerError::Unauthorized(admin_id), services.engine.config());
    }
    match services
        .approvals
        .resolve_withdrawal(withdrawal_id, decision, Utc::now())
        .await
    {
        Ok(WithdrawalOutcome::Approved { request }) => {
            log::info!("admin {} approved withdrawal {}", admin_id, request.id);
            notify_user(bot, request.user_id, withdrawal_approved_user_text(&request)).await;
            let payout = match &request.check_url {
                Some(_) => "check issued",
                None => "pay out manually",
            };
            escape_markdown(&format!("✅ Withdrawal #{} approved, {}.", request.id, payout))
        }
        Ok(WithdrawalOutcome::Rejected { request, balance }) => {
            log::info!("admin {} rejected withdrawal {}", admin_id, request.id);
            notify_user(
                bot,
                request.user_id,
                withdrawal_rejected_user_text(&request, balance),
            )
            .await;
            escape_markdown(&format!(
                "❌ Withdrawal #{} rejected, {} ZB refunded.",
                request.id, request.amount
            ))
        }
        Err(err) => describe_error(&err, services.engine.config()),
    }
}

async fn notify_user(bot: &Bot, user_id: UserId, text: String) {
    if let Err(e) = send_md(bot, ChatId(user_id), text, None).await {
        log::warn!("Failed to notify user {}: {}", user_id, e);
    }
}
