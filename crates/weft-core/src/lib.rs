pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::WeftConfig;
pub use error::{Result, WeftError};
pub use event::{EventBus, EventSink, TracingSink, WorkflowEvent};
pub use types::*;
