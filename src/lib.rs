pub mod core;
pub mod parse;
pub mod scan;

// --- Primary core exports ---
pub use core::types;
pub use core::types::*;
pub use core::AppState;
pub use scan::{ScanError, Scanner};
