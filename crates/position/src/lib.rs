//! Position State Machine: owns the lifecycle of every
//! open trade from `WAITING_FOR_ENTRY` through to a terminal status,
//! driven by price ticks and broker verification callbacks.

pub mod delay;
pub mod exits;
pub mod idempotency;
pub mod manager;

pub use exits::ExitDecision;
pub use manager::PositionManager;
