//! ICCCM selections: ownership and the conversion/retrieval engine.

mod engine;
mod ownership;

pub(crate) use engine::EngineState;
pub use ownership::{OwnerRecord, OwnershipTable};
