pub mod app;
pub mod cache;
pub mod cli;
pub mod constants;
pub mod context;
pub mod diff;
pub mod runtime;
pub mod utils;

pub use app::{load_config, Config};
pub use cache::{CodeContext, RelevanceCache};
pub use diff::{DiffChange, DiffEngine, SnapshotStore};
pub use runtime::ContextService;
pub use utils::MinctxError;
