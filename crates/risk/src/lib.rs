//! Portfolio Risk Gate.
//!
//! A single synchronous admission gate that every proposed trade must pass
//! before the Position Manager is allowed to create an `ActiveTrade`. All
//! checks run under one critical section so a portfolio-value update can
//! never interleave with an in-flight admission decision.

pub mod gate;
pub mod limits;

pub use gate::{AdmissionReject, RiskDiagnostics, RiskGate};
pub use limits::RiskLimits;
