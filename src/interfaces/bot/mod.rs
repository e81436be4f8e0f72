pub mod core;
pub mod handlers;
pub mod ui;
pub mod utils;

pub use ui::State;
