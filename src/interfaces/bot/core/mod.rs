pub mod flow;
pub mod guard;
pub mod notifier;

pub use notifier::BotNotifier;
