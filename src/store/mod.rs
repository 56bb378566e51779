mod durable;
mod kv;

pub use durable::{DurableStore, StoreError, StoredPreferences};
pub use kv::{JsonFileStore, KeyValueStore, MemoryStore};
