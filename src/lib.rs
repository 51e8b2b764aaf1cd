pub mod clock;
pub mod config;
pub mod contact;
pub mod error;
pub mod persistence;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::ContactConfig;
pub use contact::{ContactDeps, ContactManager, ContactUpdate};
pub use error::{ContactError, ContactResult};
pub use persistence::{JsonFileStore, KeyValueStore, KeyValueStoreExt, MemoryStore};
