//! HTTP surface of the logo detector: admission pipeline, error taxonomy
//! and the axum router.

pub mod admission;
pub mod error;
pub mod http;

pub use admission::{AdmissionGate, AdmissionLimits, AdmissionPipeline, AdmissionTicket};
pub use error::DetectError;
pub use http::{router, serve, AppState};
