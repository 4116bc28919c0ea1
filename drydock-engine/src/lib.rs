//! Drydock orchestration engine
//!
//! Everything between the HTTP surface and the container engine: the
//! container lifecycle state machine, the build queue and pipeline, the
//! webhook trigger resolver, the artifact compiler, the runtime adapter,
//! and the event reconciler.

pub mod artifact;
pub mod callback;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod reconciler;
pub mod runtime;
pub mod store;
pub mod sweep;
pub mod webhook;
pub mod workspacefs;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
