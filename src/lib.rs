#![forbid(unsafe_code)]

pub mod beads;
pub mod cli;
pub mod config;
pub mod convoy;
pub mod daemon;
pub mod dolt;
pub mod error;
pub mod hooks;
pub mod paths;
pub mod refinery;
pub mod session;
pub mod sling;
pub mod telemetry;
pub mod tmux;
pub mod witness;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the types most callers touch at the crate root.
pub use crate::beads::{Beads, BeadsApi, Issue};
pub use crate::convoy::ConvoyInfo;
pub use crate::session::{AgentRole, SessionName};
pub use crate::sling::{QueueMetadata, SlingParams, SlingResult};
