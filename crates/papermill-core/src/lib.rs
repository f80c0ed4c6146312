//! papermill-core: supervised multi-agent pipeline for drafting
//! compliance-checked medical research papers.
//!
//! A Supervisor routes work through four sub-agents (literature search,
//! statistical analysis, section writing, checklist compliance) along a
//! declarative workflow graph with a bounded revision loop. Every
//! invocation is recorded as a message in an append-only audit log from
//! which the task's state can be replayed.

pub mod agents;
pub mod contract;
pub mod db;
pub mod error;
pub mod graph;
pub mod models;
pub mod progress;
pub mod providers;
pub mod runner;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod templates;

pub use db::Database;
pub use error::CoreError;
pub use state::{Engine, EngineInner, NewTask};
