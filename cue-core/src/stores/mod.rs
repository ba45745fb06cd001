//! Bounded in-memory stores owned by one event runtime.
//!
//! All three are pure capacity/retention mechanisms: no I/O, no clocks of
//! their own. Callers pass `now_ms` in so behavior stays deterministic
//! under test.

pub mod cards;
pub mod facts;
pub mod ring;

pub use cards::CardsStore;
pub use facts::{FactsStore, UpsertOutcome};
pub use ring::RingBuffer;
