//! Concrete `BrokerPort` adapters: a signed REST client for live trading and
//! a deterministic paper broker for simulation and tests.

pub mod live;
pub mod paper;

pub use live::RestBrokerClient;
pub use paper::PaperBroker;
