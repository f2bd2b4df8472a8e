pub mod config;
pub mod error;
pub mod events;
pub mod ports;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use events::*;
pub use ports::*;
pub use types::*;
