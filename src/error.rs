use thiserror::Error;

use crate::beads::BeadsError;
use crate::config::ConfigError;
use crate::convoy::ConvoyError;
use crate::daemon::DaemonError;
use crate::dolt::DoltError;
use crate::hooks::HooksError;
use crate::sling::SlingError;
use crate::tmux::TmuxError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over canonical capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Beads(#[from] BeadsError),

    #[error(transparent)]
    Tmux(#[from] TmuxError),

    #[error(transparent)]
    Sling(#[from] SlingError),

    #[error(transparent)]
    Convoy(#[from] ConvoyError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    Dolt(#[from] DoltError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hooks(#[from] HooksError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Beads(e) => e.transience(),
            Error::Tmux(e) => e.transience(),
            Error::Sling(e) => e.transience(),
            Error::Convoy(e) => e.transience(),
            Error::Daemon(e) => e.transience(),
            Error::Dolt(e) => e.transience(),
            Error::Config(_) => Transience::Permanent,
            Error::Hooks(e) => e.transience(),
        }
    }
}
