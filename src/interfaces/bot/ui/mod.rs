pub mod keyboards;
pub mod menu;
pub mod states;

pub use states::State;
