// Alta (intake) and Baja (decommission) batches over the record service.

pub mod error;
pub mod hooks;
pub mod models;
pub mod orchestrator;

pub use error::{BatchError, BatchStage};
pub use hooks::ArticleHooks;
pub use models::*;
pub use orchestrator::InventoryOrchestrator;
