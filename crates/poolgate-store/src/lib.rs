mod health;
mod history;
mod kv;
mod memory;

pub use health::{
    AccountRef, AccountStatus, AccountStatusView, CreditsProbe, HealthStore, cooldown_starts_key,
    status_key, usage_key,
};
pub use history::{ConversationHistory, HistoryKey, HistoryStore, Message, Role};
pub use kv::{KeyValue, SharedKeyValue, StoreError};
pub use memory::MemoryStore;
