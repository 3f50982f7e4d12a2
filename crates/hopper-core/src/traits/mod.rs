//! Core trait definitions

mod registry;

pub use registry::{ProjectRegistry, ProjectTable};
