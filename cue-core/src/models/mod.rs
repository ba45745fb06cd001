pub mod agent;
pub mod card;
pub mod checkpoint;
pub mod fact;
pub mod glossary;
pub mod session;
pub mod transcript;

pub use agent::{AgentRow, AgentStatus, AgentType};
pub use card::{CardRecord, CardRow, CardType};
pub use checkpoint::{CheckpointRow, Checkpoints};
pub use fact::{Fact, FactRecord};
pub use glossary::GlossaryTerm;
pub use session::{SessionRow, SessionState};
pub use transcript::{NewTranscript, TranscriptChunk, TranscriptRow};
