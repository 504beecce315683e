//! Bundled extensions

mod item_limit;
mod logger;
mod removal_guard;

pub use item_limit::ItemLimitExtension;
pub use logger::{LoggedEvent, LoggerExtension};
pub use removal_guard::RemovalGuardExtension;
