pub mod registry;
pub mod types;

pub use registry::{DeletedTask, TaskRegistry};
