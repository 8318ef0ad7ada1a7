// Process-wide shared state, constructed once at startup and handed by
// clone into every handler.

use std::sync::Arc;

use crate::blob::BlobStore;
use crate::persist::PersistQueue;
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub persist: PersistQueue,
    /// `None` when the blob backend failed to initialize; upload and
    /// download endpoints then answer with an explicit storage error.
    pub blobs: Option<BlobStore>,
}
