mod in_memory;
mod store;
mod types;

pub use in_memory::InMemoryLogStore;
pub use store::LogStore;
pub use store::StoreError;
pub use types::LogEntry;
pub use types::LogIndex;
pub use types::LogPayload;
pub use types::LogTerm;
pub use types::MessageId;
pub use types::TermIndexPair;
