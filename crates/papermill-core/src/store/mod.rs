pub mod message_store;
pub mod task_store;

pub use message_store::MessageStore;
pub use task_store::TaskStore;
