use std::sync::Arc;

use crate::scan::Scanner;

/// Shared application state for the HTTP surface. One scanner serves all
/// requests; each scan owns its own browsing session, so the only shared
/// resource is the launch path.
pub struct AppState {
    pub scanner: Arc<Scanner>,
}

impl AppState {
    pub fn new(scanner: Scanner) -> Arc<Self> {
        Arc::new(Self {
            scanner: Arc::new(scanner),
        })
    }
}
