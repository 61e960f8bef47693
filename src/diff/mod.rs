// Gateway module for diff - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod engine;
mod snapshot;
mod symbols;
mod types;

// Public re-exports - the ONLY way to access diff functionality
pub use engine::{render_minimal_update, DiffEngine};
pub use snapshot::{content_hash, SnapshotStore};
pub use symbols::diff_symbol_maps;
pub use types::{ChangeKind, DiffChange, SymbolChange};
