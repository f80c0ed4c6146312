pub mod compliance;
pub mod message;
pub mod task;

pub use compliance::*;
pub use message::*;
pub use task::*;
