pub mod condition;
pub mod config;
pub mod error;
pub mod path;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use error::{OptionFlowError, Result};
pub use types::*;
