use std::sync::Arc;
use teloxide::{dispatching::dialogue::InMemStorage, prelude::*, utils::command::BotCommands};

mod application;
mod infrastructure;
mod interfaces;

use application::{AppConfig, Services, health};
use infrastructure::database::open_store;
use infrastructure::gateway::{CryptoPayClient, PaymentGateway};
use infrastructure::logging;
use interfaces::bot::State;
use interfaces::bot::core::BotNotifier;
use interfaces::bot::core::guard::{Gate, stop_reason};
use interfaces::bot::handlers::{
    callbacks::callback_handler,
    start::{Command, command_handler},
    text::text_handler,
};
use interfaces::bot::ui::menu::{blocked_text, maintenance_text};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn message_author_id(message: &Message) -> Option<i64> {
    message.from().map(|user| user.id.0 as i64)
}

fn gate_text(gate: Gate) -> String {
    match gate {
        Gate::Blocked => blocked_text(),
        _ => maintenance_text(),
    }
}

async fn stopped_message(bot: Bot, msg: Message, gate: Gate) -> HandlerResult {
    bot.send_message(msg.chat.id, gate_text(gate))
        .parse_mode(teloxide::types::ParseMode::MarkdownV2)
        .await?;
    Ok(())
}

async fn stopped_callback(bot: Bot, q: CallbackQuery, gate: Gate) -> HandlerResult {
    let text = match gate {
        Gate::Blocked => "Your account has been blocked.",
        _ => "The bot is under maintenance.",
    };
    bot.answer_callback_query(q.id)
        .text(text)
        .show_alert(true)
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    logging::init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {:#}", e);
            return;
        }
    };
    log::info!(
        "Starting with {} admins, health port {}",
        config.admin_ids.len(),
        config.port
    );

    let store = match open_store(config.redis_url.as_deref()).await {
        Ok(store) => store,
        Err(e) => {
            log::error!("Failed to open ledger store: {}", e);
            return;
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match CryptoPayClient::new(
        &config.payments.api_url,
        config.payments.token.clone(),
        config.payments.asset.clone(),
        config.payments.timeout,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::error!("Failed to build payment gateway client: {}", e);
            return;
        }
    };

    let bot = Bot::new(config.bot_token.clone());
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        log::warn!("Failed to register bot commands: {}", e);
    }

    let port = config.port;
    let notifier = Arc::new(BotNotifier::new(bot.clone()));
    let services = Arc::new(Services::new(config, store, gateway, notifier));

    let deposits = services.deposits.clone();
    tokio::spawn(async move {
        match deposits.resume().await {
            Ok(count) => log::info!("Resumed watching {} open invoices", count),
            Err(e) => log::error!("Failed to resume open invoices: {}", e),
        }
        deposits.run().await;
    });

    tokio::spawn(async move {
        if let Err(e) = health::serve(port).await {
            log::error!("Health endpoint stopped: {}", e);
        }
    });

    let stopped_message_handler = Update::filter_message()
        .filter_map_async(|msg: Message, services: Arc<Services>| async move {
            let user_id = message_author_id(&msg)?;
            stop_reason(services, user_id).await
        })
        .endpoint(stopped_message);

    let stopped_callback_handler = Update::filter_callback_query()
        .filter_map_async(|q: CallbackQuery, services: Arc<Services>| async move {
            stop_reason(services, q.from.id.0 as i64).await
        })
        .endpoint(stopped_callback);

    let command_branch = Update::filter_message()
        .filter_command::<Command>()
        .enter_dialogue::<Message, InMemStorage<State>, State>()
        .endpoint(command_handler);

    let dialogue_handler = Update::filter_message()
        .enter_dialogue::<Message, InMemStorage<State>, State>()
        .endpoint(text_handler);

    let callback_query_handler = Update::filter_callback_query()
        .enter_dialogue::<CallbackQuery, InMemStorage<State>, State>()
        .endpoint(callback_handler);

    let handler = dptree::entry()
        .branch(stopped_message_handler)
        .branch(stopped_callback_handler)
        .branch(command_branch)
        .branch(dialogue_handler)
        .branch(callback_query_handler);

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![InMemStorage::<State>::new(), services])
        .enable_ctrlc_handler()
        .build();

    dispatcher.dispatch().await;
}
