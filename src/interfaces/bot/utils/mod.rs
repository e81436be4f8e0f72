pub mod messages;

pub use messages::describe_error;
