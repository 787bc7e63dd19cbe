//! The supervisor daemon: agent lifecycles, dispatch support, and the patrol
//! registry that keeps the fleet and the store healthy.

pub mod backup;
pub mod compactor;
mod core;
pub mod doctor;
mod heartbeat;
pub mod maintenance;
pub mod patrol;
mod pidfile;
pub mod reaper;
pub mod remotes;
mod restart;
mod signals;

pub use self::core::{
    Daemon, DaemonConfig, DaemonError, ShutdownMode, SupervisedAgent, categorize_sessions,
    kill_sessions_in_order, run_graceful_shutdown,
};
pub use heartbeat::{
    HEARTBEAT_STALE_THRESHOLD, SessionHeartbeat, is_session_heartbeat_stale,
    parse_heartbeat_timestamp, read_session_heartbeat, remove_session_heartbeat,
    touch_session_heartbeat,
};
pub use pidfile::{
    PidOwnership, generate_nonce, process_alive, read_pid_file, verify_pid_ownership,
    write_pid_file,
};
pub use restart::{
    AgentRestartInfo, RestartTracker, RestartTrackerConfig, clear_agent_backoff,
};
pub use signals::{SignalFlags, install as install_signals, signal_daemon_reload};
