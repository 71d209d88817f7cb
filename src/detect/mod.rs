//! Detector seam.
//!
//! The object detector is an external collaborator. This module defines the
//! trait it is consumed through, a hash-based stub backend for tests and the
//! synthetic demo, a registry for selecting a backend by name, and the
//! post-detection filter chain.

mod backend;
mod backends;
mod filter;
mod registry;

pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::StubBackend;
pub use filter::{DetectionFilter, FilterChain};
pub use registry::BackendRegistry;
