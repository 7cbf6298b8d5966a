pub mod debounce;
pub mod hub;
pub mod messages;
pub mod storage;

pub use debounce::{Debouncer, DEBOUNCE_QUIET_PERIOD};
pub use hub::{CollabHub, CollabSession, SessionKey};
pub use messages::{CollabClientEvent, CollabServerEvent};
pub use storage::{StorageClient, StoredSession};

/// Code shown to the first subscriber of a session that has no stored
/// state yet.
pub const DEFAULT_CODE_TEMPLATE: &str = "// Start coding here...";
