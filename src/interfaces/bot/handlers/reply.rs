use teloxide::prelude::*;
use teloxide::types::{Message, ParseMode, ReplyMarkup};

use crate::application::Services;
use crate::application::ledger::types::UserId;
use crate::interfaces::bot::ui::keyboards::{
    admin_field_keyboard, cancel_keyboard, main_menu_keyboard, skip_keyboard,
    withdraw_confirm_keyboard,
};
use crate::interfaces::bot::ui::menu::prompt_text;
use crate::interfaces::bot::ui::states::State;

pub type MyDialogue = Dialogue<State, teloxide::dispatching::dialogue::InMemStorage<State>>;
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub fn sender_id(msg: &Message) -> Option<UserId> {
    msg.from().map(|user| user.id.0 as UserId)
}

pub async fn send_md(
    bot: &Bot,
    chat_id: ChatId,
    text: String,
    markup: Option<ReplyMarkup>,
) -> Result<Message, teloxide::RequestError> {
    let request = bot
        .send_message(chat_id, text)
        .parse_mode(ParseMode::MarkdownV2)
        .disable_web_page_preview(true);
    match markup {
        Some(markup) => request.reply_markup(markup).await,
        None => request.await,
    }
}

/// Keyboard that matches what `state` expects next.
pub fn keyboard_for(state: &State, is_admin: bool) -> ReplyMarkup {
    match state {
        State::Idle => main_menu_keyboard(is_admin).into(),
        State::AwaitingWithdrawConfirm { .. } => withdraw_confirm_keyboard().into(),
        State::AwaitingTaskFieldNumber
        | State::AwaitingTaskFieldReward { .. }
        | State::AwaitingTaskFieldCap { .. }
        | State::AwaitingTaskFieldPhoto { .. } => skip_keyboard().into(),
        State::AwaitingAdminField { .. } => admin_field_keyboard().into(),
        _ => cancel_keyboard().into(),
    }
}

/// Prompt text for `state`, reading the balance when the prompt shows it.
pub async fn prompt_for(services: &Services, user_id: UserId, state: &State) -> String {
    let balance = match state {
        State::AwaitingWithdrawAmount => services
            .store
            .get_user(user_id)
            .await
            .ok()
            .flatten()
            .map(|user| user.balance),
        _ => None,
    };
    prompt_text(state, services.engine.config(), balance)
}

/// Moves the dialogue to `state` and asks for its input.
pub async fn enter_state(
    bot: &Bot,
    dialogue: &MyDialogue,
    services: &Services,
    chat_id: ChatId,
    user_id: UserId,
    state: State,
) -> HandlerResult {
    let text = prompt_for(services, user_id, &state).await;
    let markup = keyboard_for(&state, services.is_admin(user_id));
    dialogue.update(state).await?;
    send_md(bot, chat_id, text, Some(markup)).await?;
    Ok(())
}
