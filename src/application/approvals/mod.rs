pub mod queue;
pub mod types;

pub use queue::ApprovalQueue;
