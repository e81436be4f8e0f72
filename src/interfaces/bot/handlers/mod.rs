pub mod admin;
pub mod callbacks;
pub mod menu;
pub mod reply;
pub mod start;
pub mod text;
