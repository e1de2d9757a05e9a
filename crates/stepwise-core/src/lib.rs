pub mod config;
pub mod dispatch;
pub mod error;
pub mod io;
pub mod orchestrator;
pub mod paths;
pub mod runtime;
pub mod sidecar;

#[cfg(test)]
mod testing;

pub use error::{EngineError, Result};
pub use runtime::Engine;
