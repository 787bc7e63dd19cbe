//! Per-agent restart tracking with exponential backoff and crash-loop
//! detection. This is what stops a broken agent from being respawned in a
//! tight loop while still letting healthy agents recover quickly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Tracker knobs. Zero or negative values mean "use the default".
#[derive(Debug, Clone, Copy)]
pub struct RestartTrackerConfig {
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Ceiling for the backoff delay.
    pub max_backoff: Duration,
    /// Backoff scale factor per restart.
    pub backoff_multiplier: f64,
    /// Window for counting crash-loop restarts.
    pub crash_loop_window: Duration,
    /// Restarts within the window that trigger crash-loop state.
    pub crash_loop_count: u32,
    /// Run time without a restart after which backoff resets.
    pub stability_period: Duration,
}

impl Default for RestartTrackerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(10 * 60),
            backoff_multiplier: 2.0,
            crash_loop_window: Duration::from_secs(15 * 60),
            crash_loop_count: 5,
            stability_period: Duration::from_secs(30 * 60),
        }
    }
}

impl RestartTrackerConfig {
    fn with_defaults(mut self) -> Self {
        let d = Self::default();
        if self.initial_backoff.is_zero() {
            self.initial_backoff = d.initial_backoff;
        }
        if self.max_backoff.is_zero() {
            self.max_backoff = d.max_backoff;
        }
        if self.backoff_multiplier <= 0.0 {
            self.backoff_multiplier = d.backoff_multiplier;
        }
        if self.crash_loop_window.is_zero() {
            self.crash_loop_window = d.crash_loop_window;
        }
        if self.crash_loop_count == 0 {
            self.crash_loop_count = d.crash_loop_count;
        }
        if self.stability_period.is_zero() {
            self.stability_period = d.stability_period;
        }
        self
    }
}

/// Restart record for a single agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentRestartInfo {
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_restart: Option<OffsetDateTime>,
    pub restart_count: u32,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub backoff_until: Option<OffsetDateTime>,
    #[serde(
        with = "time::serde::rfc3339::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub crash_loop_since: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RestartState {
    agents: BTreeMap<String, AgentRestartInfo>,
}

/// Restart tracker for all supervised agents.
///
/// Mutations are linearizable per agent: callers hold the tracker behind a
/// lock, and every mutation persists the serialized state before returning.
/// Persistence is best-effort: a failed save is logged, never fatal.
#[derive(Debug)]
pub struct RestartTracker {
    town: PathBuf,
    config: RestartTrackerConfig,
    state: RestartState,
}

impl RestartTracker {
    pub fn new(town: &Path, config: RestartTrackerConfig) -> Self {
        Self {
            town: town.to_path_buf(),
            config: config.with_defaults(),
            state: RestartState::default(),
        }
    }

    fn state_file(&self) -> PathBuf {
        crate::paths::restart_state_path(&self.town)
    }

    /// Load persisted state; missing file is a fresh start.
    pub fn load(&mut self) -> std::io::Result<()> {
        let data = match std::fs::read(self.state_file()) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        self.state = serde_json::from_slice(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(())
    }

    pub fn save(&self) -> std::io::Result<()> {
        let path = self.state_file();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_vec_pretty(&self.state)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, data)
    }

    fn save_best_effort(&self) {
        if let Err(err) = self.save() {
            tracing::warn!("failed to persist restart state: {err}");
        }
    }

    /// True iff the agent may be restarted now: no record, or out of backoff
    /// and not crash-looping.
    pub fn can_restart(&self, agent_id: &str) -> bool {
        let Some(info) = self.state.agents.get(agent_id) else {
            return true;
        };
        if info.crash_loop_since.is_some() {
            return false;
        }
        match info.backoff_until {
            Some(until) => OffsetDateTime::now_utc() >= until,
            None => true,
        }
    }

    /// Record a restart attempt and compute the next backoff.
    pub fn record_restart(&mut self, agent_id: &str) {
        let now = OffsetDateTime::now_utc();
        let stability = self.config.stability_period;
        let info = self.state.agents.entry(agent_id.to_string()).or_default();

        // A long-stable agent starts from a clean slate.
        if let Some(last) = info.last_restart
            && now - last > stability
        {
            info.restart_count = 0;
            info.crash_loop_since = None;
        }

        info.last_restart = Some(now);
        info.restart_count += 1;

        let mut backoff = self.config.initial_backoff;
        let mut i = 1;
        while i < info.restart_count && backoff < self.config.max_backoff {
            backoff = backoff.mul_f64(self.config.backoff_multiplier);
            i += 1;
        }
        if backoff > self.config.max_backoff {
            backoff = self.config.max_backoff;
        }
        info.backoff_until = Some(now + backoff);

        if info.restart_count >= self.config.crash_loop_count {
            let window_start = now - self.config.crash_loop_window;
            if info.last_restart.is_some_and(|t| t > window_start) {
                info.crash_loop_since = Some(now);
            }
        }

        self.save_best_effort();
    }

    /// Note that an agent is running. A full stability period without a
    /// restart resets its tracking.
    pub fn record_success(&mut self, agent_id: &str) {
        let now = OffsetDateTime::now_utc();
        let stability = self.config.stability_period;
        let Some(info) = self.state.agents.get_mut(agent_id) else {
            return;
        };
        if info.last_restart.is_some_and(|last| now - last > stability) {
            info.restart_count = 0;
            info.crash_loop_since = None;
            info.backoff_until = None;
            self.save_best_effort();
        }
    }

    pub fn is_in_crash_loop(&self, agent_id: &str) -> bool {
        self.state
            .agents
            .get(agent_id)
            .is_some_and(|info| info.crash_loop_since.is_some())
    }

    /// Time until the agent leaves backoff; zero when it already has.
    pub fn backoff_remaining(&self, agent_id: &str) -> Duration {
        let Some(until) = self
            .state
            .agents
            .get(agent_id)
            .and_then(|info| info.backoff_until)
        else {
            return Duration::ZERO;
        };
        let remaining = until - OffsetDateTime::now_utc();
        remaining.try_into().unwrap_or(Duration::ZERO)
    }

    /// Manual reset of crash-loop and backoff state.
    pub fn clear_crash_loop(&mut self, agent_id: &str) {
        if let Some(info) = self.state.agents.get_mut(agent_id) {
            info.crash_loop_since = None;
            info.restart_count = 0;
            info.backoff_until = None;
            self.save_best_effort();
        }
    }

    pub fn tracked_agents(&self) -> impl Iterator<Item = &str> {
        self.state.agents.keys().map(String::as_str)
    }

    pub fn info(&self, agent_id: &str) -> Option<&AgentRestartInfo> {
        self.state.agents.get(agent_id)
    }
}

/// Clear the crash loop and backoff state for an agent on disk.
///
/// Used by `gt daemon clear-backoff` to reset an agent stuck in crash loop;
/// the daemon reloads the state on its lifecycle signal or next tick.
pub fn clear_agent_backoff(town: &Path, agent_id: &str) -> std::io::Result<()> {
    let mut tracker = RestartTracker::new(town, RestartTrackerConfig::default());
    tracker.load()?;
    tracker.clear_crash_loop(agent_id);
    tracker.save()
}
