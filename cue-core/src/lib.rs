pub mod config;
pub mod db;
pub mod error;
pub mod http_provider;
pub mod models;
pub mod provider;
pub mod store;
pub mod stores;

pub use config::CueConfig;
pub use error::CueError;
pub use http_provider::HttpProvider;
pub use provider::{
    AgentSession, CardDraft, FactDraft, OpenedSession, ProviderError, RealtimeProvider,
    SessionEvent, SessionSpec, TokenUsage,
};
pub use store::{EventStore, MemoryStore, PgStore};
pub use stores::{CardsStore, FactsStore, RingBuffer, UpsertOutcome};
