//! hf-core: stable foundation for herdflow.
//!
//! Contains:
//! - ids (run orders, result ids and the catalog id aliases)
//! - steps (frame rate, display/internal step conversion, step domains)
//! - error (shared error types)

pub mod error;
pub mod ids;
pub mod steps;

// Re-exports: nice ergonomics for downstream crates
pub use error::{HfError, HfResult};
pub use ids::*;
pub use steps::{FRAME_RATE, StepDomain, format_sim_time, to_display, to_internal};
