//! Phased upgrade engine.

pub mod monitor;
pub mod orchestrator;
pub mod result;
pub mod sequencer;
pub mod timings;

#[cfg(test)]
pub(crate) mod testing;

pub use orchestrator::{Orchestrator, OrchestratorPhase};
pub use result::{CheckReport, LayerCheck, SkippedLayer, UpgradeResult};
pub use timings::Timings;
