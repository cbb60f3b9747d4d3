//! The conversation turn pipeline.

pub mod coordinator;
pub mod messages;
pub mod orchestrator;
pub mod transcript;
pub mod turn;
