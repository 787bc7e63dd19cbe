//! Daemon core: lifecycle, supervisor loop, patrol fan-out, escalation.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use time::OffsetDateTime;

use crate::Transience;
use crate::beads::{Beads, BeadsApi};
use crate::config::{DaemonPatrolConfig, is_patrol_enabled, load_patrol_config, load_rigs_config};
use crate::dolt::DoltClient;
use crate::paths;
use crate::session::{AgentRole, Registry, SessionName, agent_env, init_registry};
use crate::tmux::{SessionDriver, Tmux};

use super::doctor::{DoctorAction, DoctorResponder};
use super::patrol::{self, PatrolScheduler};
use super::{RestartTracker, RestartTrackerConfig, SignalFlags};

/// Town-level session prefix for the mayor/deacon pair.
const TOWN_PREFIX: &str = "gt";

/// Upper bound on the supervisor tick.
const MAX_TICK_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("failed to write PID file: {0}")]
    PidFile(#[source] std::io::Error),

    #[error("failed to install signal handler: {0}")]
    SignalInstall(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    pub fn transience(&self) -> Transience {
        match self {
            DaemonError::AlreadyRunning(_) => Transience::Permanent,
            DaemonError::PidFile(_) | DaemonError::SignalInstall(_) => Transience::Permanent,
            DaemonError::Unsupported(_) => Transience::Permanent,
            DaemonError::Io(_) => Transience::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub town_root: PathBuf,
    pub tick_period: Duration,
    /// Seconds to wait for agents during graceful shutdown.
    pub shutdown_wait: Duration,
}

impl DaemonConfig {
    pub fn new(town_root: &Path) -> Self {
        Self {
            town_root: town_root.to_path_buf(),
            tick_period: MAX_TICK_PERIOD,
            shutdown_wait: Duration::from_secs(30),
        }
    }
}

/// One agent the supervisor keeps alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedAgent {
    pub session: String,
    pub role: AgentRole,
    pub rig: String,
    pub name: String,
}

/// The supervisor daemon. One per town.
pub struct Daemon {
    config: DaemonConfig,
    flags: SignalFlags,
    driver: Arc<dyn SessionDriver>,
    beads: Arc<dyn BeadsApi>,
    dolt: DoltClient,
    registry: Mutex<Registry>,
    patrol_config: Mutex<Option<DaemonPatrolConfig>>,
    restart_tracker: Mutex<RestartTracker>,
    scheduler: PatrolScheduler,
    doctor: Mutex<DoctorResponder>,
    roster: Mutex<Vec<SupervisedAgent>>,
    last_maintenance_run: Mutex<Option<OffsetDateTime>>,
}

impl Daemon {
    /// Build a daemon against the real drivers.
    pub fn new(config: DaemonConfig) -> Result<Arc<Self>, DaemonError> {
        let town = config.town_root.clone();
        let beads = Beads::new(paths::town_beads_dir(&town));
        let dolt = DoltClient::new(&town);
        Self::with_drivers(config, Arc::new(Tmux::new()), Arc::new(beads), dolt)
    }

    /// Driver-injected constructor; the seam the tests use.
    pub fn with_drivers(
        mut config: DaemonConfig,
        driver: Arc<dyn SessionDriver>,
        beads: Arc<dyn BeadsApi>,
        dolt: DoltClient,
    ) -> Result<Arc<Self>, DaemonError> {
        if config.tick_period.is_zero() || config.tick_period > MAX_TICK_PERIOD {
            config.tick_period = MAX_TICK_PERIOD;
        }

        let registry = init_registry(&config.town_root)?;
        let patrol_config = load_patrol_config(&config.town_root);

        let mut tracker = RestartTracker::new(&config.town_root, RestartTrackerConfig::default());
        if let Err(err) = tracker.load() {
            tracing::warn!("restart state load failed, starting fresh: {err}");
        }

        let daemon = Arc::new(Self {
            config,
            flags: SignalFlags::new(),
            driver,
            beads,
            dolt,
            registry: Mutex::new(registry),
            patrol_config: Mutex::new(patrol_config),
            restart_tracker: Mutex::new(tracker),
            scheduler: PatrolScheduler::new(),
            doctor: Mutex::new(DoctorResponder::new()),
            roster: Mutex::new(Vec::new()),
            last_maintenance_run: Mutex::new(None),
        });
        daemon.rebuild_roster();
        Ok(daemon)
    }

    pub fn town_root(&self) -> &Path {
        &self.config.town_root
    }

    /// Run until a shutdown signal arrives.
    pub fn run(self: Arc<Self>) -> Result<(), DaemonError> {
        let pid_path = paths::daemon_pid_path(&self.config.town_root);
        if let Ok(Some(owned)) = super::verify_pid_ownership(&pid_path)
            && owned.alive
            && owned.pid != std::process::id()
        {
            return Err(DaemonError::AlreadyRunning(owned.pid));
        }
        super::write_pid_file(&pid_path, std::process::id()).map_err(DaemonError::PidFile)?;

        super::install_signals(&self.flags)?;

        // Later ad-hoc subprocesses inside the multiplexer must observe the
        // right town root.
        if let Err(err) = self
            .driver
            .set_global_environment("GT_TOWN_ROOT", &self.config.town_root.display().to_string())
        {
            tracing::warn!("setting GT_TOWN_ROOT in multiplexer: {err}");
        }

        tracing::info!(
            town = %self.config.town_root.display(),
            tick = ?self.config.tick_period,
            "supervisor started"
        );

        let ticker = crossbeam::channel::tick(self.config.tick_period);
        loop {
            if self.flags.shutdown.load(Ordering::Relaxed) {
                tracing::info!("shutdown signal received");
                break;
            }
            if self.flags.reload_restart.swap(false, Ordering::Relaxed) {
                self.reload(true);
            } else if self.flags.reload.swap(false, Ordering::Relaxed) {
                self.reload(false);
            }

            Self::tick(&self);

            // Block until the next tick, still waking for signals promptly.
            let _ = ticker.recv_timeout(self.config.tick_period);
        }

        let _ = std::fs::remove_file(&pid_path);
        tracing::info!("supervisor stopped");
        Ok(())
    }

    /// Reload patrol config and restart-tracker state from disk; with
    /// `with_roster`, also re-read the agent roster.
    pub fn reload(&self, with_roster: bool) {
        tracing::info!(with_roster, "reloading daemon state");
        *self.patrol_config.lock().expect("patrol config lock") =
            load_patrol_config(&self.config.town_root);

        {
            let mut tracker = self.restart_tracker.lock().expect("tracker lock");
            let mut fresh =
                RestartTracker::new(&self.config.town_root, RestartTrackerConfig::default());
            if let Err(err) = fresh.load() {
                tracing::warn!("restart state reload failed: {err}");
            } else {
                *tracker = fresh;
            }
        }

        if with_roster {
            match init_registry(&self.config.town_root) {
                Ok(registry) => {
                    *self.registry.lock().expect("registry lock") = registry;
                }
                Err(err) => tracing::warn!("route table reload failed: {err}"),
            }
            self.rebuild_roster();
        }
    }

    /// One supervisor tick: agent health plus the patrol scheduler.
    pub fn tick(daemon: &Arc<Daemon>) {
        daemon.supervise_agents();
        Self::fan_out_patrols(daemon);
    }

    fn rebuild_roster(&self) {
        let mut roster = vec![
            SupervisedAgent {
                session: format!("{TOWN_PREFIX}-mayor"),
                role: AgentRole::Mayor,
                rig: String::new(),
                name: String::new(),
            },
            SupervisedAgent {
                session: format!("{TOWN_PREFIX}-deacon"),
                role: AgentRole::Deacon,
                rig: String::new(),
                name: String::new(),
            },
        ];

        match load_rigs_config(&self.config.town_root) {
            Ok(rigs) => {
                let registry = self.registry.lock().expect("registry lock");
                for (rig_name, entry) in &rigs.rigs {
                    let prefix = entry
                        .prefix
                        .as_deref()
                        .or_else(|| registry.prefix_for_rig(rig_name))
                        .unwrap_or(TOWN_PREFIX);
                    for role in [AgentRole::Witness, AgentRole::Refinery] {
                        roster.push(SupervisedAgent {
                            session: SessionName::new(prefix, rig_name, role, "").format(),
                            role,
                            rig: rig_name.clone(),
                            name: String::new(),
                        });
                    }
                }
            }
            Err(err) => tracing::warn!("rigs config load failed: {err}"),
        }

        *self.roster.lock().expect("roster lock") = roster;
    }

    /// Check every supervised agent; respawn dead ones under backoff rules.
    fn supervise_agents(&self) {
        let roster = self.roster.lock().expect("roster lock").clone();
        for agent in &roster {
            let alive = match self.driver.has_session(&agent.session) {
                Ok(alive) => alive,
                Err(err) => {
                    tracing::warn!(session = %agent.session, "session probe failed: {err}");
                    continue;
                }
            };

            let (hb_stale, hb_exists) =
                super::is_session_heartbeat_stale(&self.config.town_root, &agent.session);
            // A recorded session PID that is no longer alive overrides an
            // alive-looking pane.
            let pid_dead = session_pid_dead(&self.config.town_root, &agent.session);
            let healthy = alive && !(hb_exists && hb_stale) && !pid_dead;

            let mut tracker = self.restart_tracker.lock().expect("tracker lock");
            if healthy {
                tracker.record_success(&agent.session);
                continue;
            }

            if !tracker.can_restart(&agent.session) {
                if tracker.is_in_crash_loop(&agent.session) {
                    tracing::warn!(session = %agent.session, "agent in crash loop, not restarting");
                }
                continue;
            }

            tracker.record_restart(&agent.session);
            drop(tracker);

            if alive {
                // Alive pane with a stale heartbeat: the agent inside is
                // gone. Replace the whole session.
                let _ = self.driver.kill_session_with_processes(&agent.session);
            }
            super::remove_session_heartbeat(&self.config.town_root, &agent.session);
            let _ = std::fs::remove_file(
                paths::session_pids_dir(&self.config.town_root)
                    .join(format!("{}.pid", agent.session)),
            );
            if let Err(err) = self.respawn(agent) {
                self.escalate(
                    "supervisor",
                    &format!("respawn of {} failed: {err}", agent.session),
                );
            } else {
                tracing::info!(session = %agent.session, "agent respawned");
            }
        }
    }

    fn respawn(&self, agent: &SupervisedAgent) -> Result<(), crate::tmux::TmuxError> {
        let env = agent_env(
            agent.role,
            &agent.rig,
            &agent.name,
            &self.config.town_root,
        );
        let env_args: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let cmd = format!("exec env {} claude", env_args.join(" "));

        let work_dir = if agent.rig.is_empty() {
            self.config.town_root.display().to_string()
        } else {
            let rig_dir = self.config.town_root.join(&agent.rig);
            if rig_dir.is_dir() {
                rig_dir.display().to_string()
            } else {
                self.config.town_root.display().to_string()
            }
        };

        self.driver
            .new_session_with_command(&agent.session, &work_dir, &cmd)
    }

    /// Select due patrols and fire each on its own worker thread.
    fn fan_out_patrols(daemon: &Arc<Daemon>) {
        let config = daemon
            .patrol_config
            .lock()
            .expect("patrol config lock")
            .clone();
        let now = Instant::now();

        let intervals: &[(&'static str, Duration)] = &[
            (patrol::PATROL_WITNESS, daemon.config.tick_period),
            (patrol::PATROL_REFINERY, daemon.config.tick_period),
            (
                patrol::PATROL_WISP_REAPER,
                patrol::wisp_reaper_interval(config.as_ref()),
            ),
            (
                patrol::PATROL_COMPACTOR_DOG,
                patrol::compactor_interval(config.as_ref()),
            ),
            (
                patrol::PATROL_DOCTOR_DOG,
                patrol::doctor_dog_interval(config.as_ref()),
            ),
            (
                patrol::PATROL_JSONL_GIT_BACKUP,
                patrol::backup_interval(config.as_ref()),
            ),
            (
                patrol::PATROL_DOLT_REMOTES,
                patrol::dolt_remotes_interval(config.as_ref()),
            ),
            (
                patrol::PATROL_SCHEDULED_MAINTENANCE,
                super::maintenance::MAINTENANCE_CHECK_INTERVAL,
            ),
        ];

        for &(name, interval) in intervals {
            if !is_patrol_enabled(config.as_ref(), name) {
                continue;
            }
            if !daemon.scheduler.try_claim(name, interval, now) {
                continue;
            }
            let worker = Arc::clone(daemon);
            let spawned = std::thread::Builder::new()
                .name(format!("patrol-{name}"))
                .spawn(move || {
                    worker.run_patrol(name);
                    worker.scheduler.finish(name, Instant::now());
                });
            if let Err(err) = spawned {
                // The claim must not leak when the thread never started.
                daemon.scheduler.finish(name, now);
                tracing::error!(patrol = name, "failed to spawn patrol thread: {err}");
            }
        }
    }

    /// Dispatch to the patrol routine. Patrol failures are logged, never
    /// propagated: a patrol must not take the daemon down.
    fn run_patrol(&self, name: &'static str) {
        tracing::debug!(patrol = name, "patrol starting");
        let config = self.patrol_config.lock().expect("patrol config lock").clone();
        match name {
            patrol::PATROL_WITNESS => self.run_witness(),
            patrol::PATROL_REFINERY => {
                crate::refinery::run_refinery_patrol(self.beads.as_ref());
            }
            patrol::PATROL_WISP_REAPER => {
                let report = super::reaper::run_wisp_reaper(
                    &self.config.town_root,
                    config.as_ref(),
                    &self.dolt,
                    self.beads.as_ref(),
                );
                tracing::info!(
                    patrol = name,
                    swept = report.databases_swept,
                    closed = report.issues_closed,
                    "reaper pass complete"
                );
            }
            patrol::PATROL_COMPACTOR_DOG => {
                let report = super::compactor::run_compactor_dog(config.as_ref(), &self.dolt);
                if !report.failed.is_empty() {
                    self.escalate(
                        "compactor_dog",
                        &format!("compaction failed for: {}", report.failed.join(", ")),
                    );
                }
            }
            patrol::PATROL_DOCTOR_DOG => self.run_doctor(config.as_ref()),
            patrol::PATROL_JSONL_GIT_BACKUP => {
                if let Err(err) = super::backup::run_jsonl_git_backup(
                    &self.config.town_root,
                    config.as_ref(),
                    &self.dolt,
                ) {
                    tracing::warn!(patrol = name, "backup failed: {err}");
                }
            }
            patrol::PATROL_DOLT_REMOTES => {
                super::remotes::run_dolt_remotes(&self.dolt);
            }
            patrol::PATROL_SCHEDULED_MAINTENANCE => self.run_scheduled_maintenance(config.as_ref()),
            other => tracing::warn!(patrol = other, "unknown patrol"),
        }
        tracing::debug!(patrol = name, "patrol finished");
    }

    fn run_witness(&self) {
        let registry = self.registry.lock().expect("registry lock").clone();
        let rigs = match load_rigs_config(&self.config.town_root) {
            Ok(rigs) => rigs,
            Err(err) => {
                tracing::warn!(patrol = "witness", "rigs config: {err}");
                return;
            }
        };
        for rig_name in rigs.rigs.keys() {
            let result = crate::witness::detect_zombie_polecats(
                &self.config.town_root,
                rig_name,
                &registry,
                self.driver.as_ref(),
                self.beads.as_ref(),
            );
            let receipts = crate::witness::build_patrol_receipts(rig_name, Some(&result));
            for receipt in &receipts {
                tracing::info!(
                    patrol = "witness",
                    rig = %receipt.rig,
                    polecat = %receipt.polecat,
                    verdict = ?receipt.verdict,
                    action = %receipt.recommended_action,
                    "patrol receipt"
                );
            }
        }
    }

    fn run_doctor(&self, config: Option<&DaemonPatrolConfig>) {
        let report = super::doctor::run_doctor_dog(&self.config.town_root, config, &self.dolt);
        let actions = self
            .doctor
            .lock()
            .expect("doctor lock")
            .respond(&report, Instant::now());
        for action in actions {
            match action {
                DoctorAction::RestartServer => match self.dolt.stop_server() {
                    Ok(_) => {
                        if let Err(err) = self.dolt.start_server() {
                            self.escalate("doctor_dog", &format!("store restart failed: {err}"));
                        }
                    }
                    Err(err) => {
                        self.escalate("doctor_dog", &format!("store stop failed: {err}"));
                    }
                },
                DoctorAction::Escalate => {
                    let latency = report
                        .latency
                        .as_ref()
                        .map(|l| l.duration_ms)
                        .unwrap_or_default();
                    self.escalate("doctor_dog", &format!("store latency {latency:.0}ms"));
                }
                DoctorAction::Janitor => {
                    tracing::warn!(patrol = "doctor_dog", "orphan database cleanup requested");
                }
                DoctorAction::Backup => {
                    if let Err(err) = super::backup::run_jsonl_git_backup(
                        &self.config.town_root,
                        config,
                        &self.dolt,
                    ) {
                        tracing::warn!(patrol = "doctor_dog", "triggered backup failed: {err}");
                    }
                }
            }
        }
    }

    /// Scheduled maintenance: only inside the configured window, at most
    /// once per interval, and only when a database is over the threshold.
    fn run_scheduled_maintenance(&self, config: Option<&DaemonPatrolConfig>) {
        use super::maintenance::*;

        let window = maintenance_window(config);
        if window.is_empty() {
            tracing::debug!(patrol = "scheduled_maintenance", "no window configured");
            return;
        }

        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        if !is_in_maintenance_window(now, &window) {
            return; // fires every five minutes; silence outside the window
        }

        let interval = maintenance_interval(config);
        let last_run = *self.last_maintenance_run.lock().expect("maintenance lock");
        if !should_run_maintenance(now, last_run, &interval) {
            return; // already ran this window
        }

        let threshold = maintenance_threshold(config);
        let databases = match self.dolt.list_databases() {
            Ok(databases) => databases,
            Err(err) => {
                tracing::warn!(patrol = "scheduled_maintenance", "listing databases: {err}");
                return;
            }
        };
        if databases.is_empty() {
            tracing::info!(patrol = "scheduled_maintenance", "no databases found");
            return;
        }

        let mut needs_maintenance = false;
        for db in &databases {
            match self.dolt.commit_count(db) {
                Ok(count) if count >= threshold => {
                    tracing::info!(
                        patrol = "scheduled_maintenance",
                        db = %db, count, threshold,
                        "over threshold, maintenance needed"
                    );
                    needs_maintenance = true;
                    break;
                }
                Ok(count) => {
                    tracing::debug!(patrol = "scheduled_maintenance", db = %db, count, "below threshold");
                }
                Err(err) => {
                    tracing::warn!(patrol = "scheduled_maintenance", db = %db, "counting commits: {err}");
                }
            }
        }

        if !needs_maintenance {
            // Do not re-check until the next interval.
            *self.last_maintenance_run.lock().expect("maintenance lock") = Some(now);
            return;
        }

        tracing::info!(patrol = "scheduled_maintenance", threshold, "running gt maintain --force");
        let gt = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("gt"));
        let output = std::process::Command::new(gt)
            .arg("maintain")
            .arg("--force")
            .arg("--threshold")
            .arg(threshold.to_string())
            .current_dir(&self.config.town_root)
            .output();
        match output {
            Ok(out) if out.status.success() => {
                tracing::info!(patrol = "scheduled_maintenance", "maintenance completed");
            }
            Ok(out) => {
                self.escalate(
                    "scheduled_maintenance",
                    &format!(
                        "gt maintain --force failed ({}): {}",
                        out.status,
                        String::from_utf8_lossy(&out.stderr).trim()
                    ),
                );
            }
            Err(err) => {
                self.escalate("scheduled_maintenance", &format!("gt maintain spawn: {err}"));
            }
        }

        *self.last_maintenance_run.lock().expect("maintenance lock") = Some(now);
    }

    /// Emit a structured escalation record. A log sink, not an exception
    /// channel: this must never panic or return an error.
    pub fn escalate(&self, source: &str, message: &str) {
        tracing::error!(escalation = true, source, "{message}");
        let record = serde_json::json!({
            "timestamp": OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            "source": source,
            "message": message,
        });
        let path = paths::escalations_path(&self.config.town_root);
        if let Some(dir) = path.parent()
            && std::fs::create_dir_all(dir).is_ok()
            && let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&path)
        {
            use std::io::Write;
            let _ = writeln!(file, "{record}");
        }
    }

    #[cfg(test)]
    pub(crate) fn roster_for_tests(&self) -> Vec<SupervisedAgent> {
        self.roster.lock().expect("roster lock").clone()
    }
}

/// True when the session has a PID file and that PID is dead. No PID file
/// means no signal either way (agents write them on startup, best-effort).
fn session_pid_dead(town: &Path, session: &str) -> bool {
    let path = paths::session_pids_dir(town).join(format!("{session}.pid"));
    match super::read_pid_file(&path) {
        Ok((pid, _nonce)) => !super::process_alive(pid),
        Err(_) => false,
    }
}

/// Which sessions a shutdown touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Stop infrastructure, preserve crew sessions.
    Default,
    /// Stop everything, crew included.
    All,
    /// Only stop polecats.
    PolecatsOnly,
}

/// Split town sessions into (to_stop, preserved) for a shutdown.
pub fn categorize_sessions(sessions: &[String], mode: ShutdownMode) -> (Vec<String>, Vec<String>) {
    let mayor = format!("{TOWN_PREFIX}-mayor");
    let deacon = format!("{TOWN_PREFIX}-deacon");

    let mut to_stop = Vec::new();
    let mut preserved = Vec::new();

    for session in sessions {
        if !session.starts_with(&format!("{TOWN_PREFIX}-")) {
            continue; // not ours
        }
        let is_crew = session.contains("-crew-");
        let is_polecat = !is_crew
            && session != &mayor
            && session != &deacon
            && session
                .split('-')
                .nth(2)
                .is_some_and(|role| !matches!(role, "witness" | "refinery" | "crew"));

        match mode {
            ShutdownMode::PolecatsOnly => {
                if is_polecat {
                    to_stop.push(session.clone());
                } else {
                    preserved.push(session.clone());
                }
            }
            ShutdownMode::All => to_stop.push(session.clone()),
            ShutdownMode::Default => {
                if is_crew {
                    preserved.push(session.clone());
                } else {
                    to_stop.push(session.clone());
                }
            }
        }
    }
    (to_stop, preserved)
}

/// Kill sessions in the safe order: deacon first (so it cannot restart the
/// others), then everything else, mayor last.
pub fn kill_sessions_in_order(driver: &dyn SessionDriver, sessions: &[String]) -> usize {
    let mayor = format!("{TOWN_PREFIX}-mayor");
    let deacon = format!("{TOWN_PREFIX}-deacon");
    let mut stopped = 0;

    let mut kill = |session: &String| {
        if driver.kill_session(session).is_ok() {
            stopped += 1;
        }
    };

    if let Some(session) = sessions.iter().find(|s| **s == deacon) {
        kill(session);
    }
    for session in sessions {
        if *session == deacon || *session == mayor {
            continue;
        }
        kill(session);
    }
    if let Some(session) = sessions.iter().find(|s| **s == mayor) {
        kill(session);
    }
    stopped
}

/// Graceful shutdown: interrupt, request handoff, wait, then kill in order.
pub fn run_graceful_shutdown(
    driver: &dyn SessionDriver,
    sessions: &[String],
    wait: Duration,
) -> usize {
    // Phase 1: interrupt whatever the agents are doing.
    for session in sessions {
        let _ = driver.send_keys_raw(session, "Escape");
    }

    // Phase 2: a human-readable handoff request.
    let message = "[SHUTDOWN] Gas Town is shutting down. Save your state and update your \
                   handoff bead, then exit or wait to be terminated.";
    for session in sessions {
        std::thread::sleep(Duration::from_millis(500));
        let _ = driver.send_keys(session, message);
    }

    // Phase 3: give them the window.
    std::thread::sleep(wait);

    // Phase 4: deacon first, mayor last.
    kill_sessions_in_order(driver, sessions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sessions(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_shutdown_preserves_crew() {
        let all = sessions(&[
            "gt-mayor",
            "gt-deacon",
            "gt-beads-witness",
            "gt-beads-polecat-jade",
            "gt-beads-crew-max",
            "unrelated",
        ]);
        let (to_stop, preserved) = categorize_sessions(&all, ShutdownMode::Default);
        assert!(to_stop.contains(&"gt-mayor".to_string()));
        assert!(to_stop.contains(&"gt-beads-polecat-jade".to_string()));
        assert_eq!(preserved, sessions(&["gt-beads-crew-max"]));
        assert!(!to_stop.contains(&"unrelated".to_string()));
    }

    #[test]
    fn all_mode_stops_crew_too() {
        let all = sessions(&["gt-mayor", "gt-beads-crew-max"]);
        let (to_stop, preserved) = categorize_sessions(&all, ShutdownMode::All);
        assert_eq!(to_stop.len(), 2);
        assert!(preserved.is_empty());
    }

    #[test]
    fn polecats_only_spares_infrastructure() {
        let all = sessions(&[
            "gt-mayor",
            "gt-deacon",
            "gt-beads-witness",
            "gt-beads-polecat-jade",
            "gt-beads-crew-max",
        ]);
        let (to_stop, preserved) = categorize_sessions(&all, ShutdownMode::PolecatsOnly);
        assert_eq!(to_stop, sessions(&["gt-beads-polecat-jade"]));
        assert_eq!(preserved.len(), 4);
    }

    #[test]
    fn kill_order_is_deacon_others_mayor() {
        use crate::tmux::TmuxError;
        use std::sync::Mutex;

        #[derive(Default)]
        struct OrderDriver {
            killed: Mutex<Vec<String>>,
        }
        impl SessionDriver for OrderDriver {
            fn list_sessions(&self) -> Result<Vec<String>, TmuxError> {
                Ok(Vec::new())
            }
            fn has_session(&self, _n: &str) -> Result<bool, TmuxError> {
                Ok(true)
            }
            fn new_session_with_command(
                &self,
                _n: &str,
                _w: &str,
                _c: &str,
            ) -> Result<(), TmuxError> {
                Ok(())
            }
            fn kill_session(&self, name: &str) -> Result<(), TmuxError> {
                self.killed.lock().unwrap().push(name.to_string());
                Ok(())
            }
            fn kill_session_with_processes(&self, name: &str) -> Result<(), TmuxError> {
                self.kill_session(name)
            }
            fn send_keys(&self, _n: &str, _m: &str) -> Result<(), TmuxError> {
                Ok(())
            }
            fn send_keys_raw(&self, _n: &str, _k: &str) -> Result<(), TmuxError> {
                Ok(())
            }
            fn capture_pane(&self, _n: &str, _l: u32) -> Result<String, TmuxError> {
                Ok(String::new())
            }
            fn get_pane_command(&self, _n: &str) -> Result<String, TmuxError> {
                Ok(String::new())
            }
            fn get_all_environment(
                &self,
                _n: &str,
            ) -> Result<Vec<(String, String)>, TmuxError> {
                Ok(Vec::new())
            }
            fn set_environment(&self, _n: &str, _k: &str, _v: &str) -> Result<(), TmuxError> {
                Ok(())
            }
            fn get_global_environment(&self, _k: &str) -> Result<Option<String>, TmuxError> {
                Ok(None)
            }
            fn set_global_environment(&self, _k: &str, _v: &str) -> Result<(), TmuxError> {
                Ok(())
            }
        }

        let driver = OrderDriver::default();
        let all = sessions(&["gt-mayor", "gt-beads-witness", "gt-deacon"]);
        let stopped = kill_sessions_in_order(&driver, &all);
        assert_eq!(stopped, 3);
        assert_eq!(
            *driver.killed.lock().unwrap(),
            sessions(&["gt-deacon", "gt-beads-witness", "gt-mayor"])
        );
    }

    #[test]
    fn roster_includes_town_and_rig_agents() {
        let town = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(town.path().join("mayor")).unwrap();
        std::fs::create_dir_all(town.path().join(".beads")).unwrap();
        std::fs::write(
            town.path().join("mayor/rigs.json"),
            r#"{"rigs":{"beads":{"prefix":"bd"}}}"#,
        )
        .unwrap();

        let daemon = Daemon::with_drivers(
            DaemonConfig::new(town.path()),
            Arc::new(NullDriver),
            Arc::new(crate::beads::testing::FakeBeads::default()),
            DoltClient::with_endpoint(town.path(), "127.0.0.1", 1),
        )
        .expect("daemon");

        let roster = daemon.roster_for_tests();
        let names: Vec<&str> = roster.iter().map(|a| a.session.as_str()).collect();
        assert!(names.contains(&"gt-mayor"));
        assert!(names.contains(&"gt-deacon"));
        assert!(names.contains(&"bd-beads-witness"));
        assert!(names.contains(&"bd-beads-refinery"));
    }

    #[test]
    fn escalate_appends_jsonl_record() {
        let town = tempfile::tempdir().expect("tempdir");
        let daemon = Daemon::with_drivers(
            DaemonConfig::new(town.path()),
            Arc::new(NullDriver),
            Arc::new(crate::beads::testing::FakeBeads::default()),
            DoltClient::with_endpoint(town.path(), "127.0.0.1", 1),
        )
        .expect("daemon");

        daemon.escalate("test", "first");
        daemon.escalate("test", "second");

        let raw =
            std::fs::read_to_string(paths::escalations_path(town.path())).expect("escalations");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let record: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(record["source"], "test");
        assert_eq!(record["message"], "first");
    }

    #[test]
    fn session_pid_file_signals_death() {
        let town = tempfile::tempdir().expect("tempdir");
        let pids = paths::session_pids_dir(town.path());
        std::fs::create_dir_all(&pids).unwrap();

        // No file: no signal.
        assert!(!session_pid_dead(town.path(), "gt-ghost"));

        // Live PID: not dead.
        std::fs::write(
            pids.join("gt-alive.pid"),
            format!("{}\n", std::process::id()),
        )
        .unwrap();
        assert!(!session_pid_dead(town.path(), "gt-alive"));

        // Dead PID: dead.
        std::fs::write(pids.join("gt-dead.pid"), "4194300\n").unwrap();
        assert!(session_pid_dead(town.path(), "gt-dead"));
    }

    #[test]
    fn tick_period_is_clamped() {
        let town = tempfile::tempdir().expect("tempdir");
        let mut config = DaemonConfig::new(town.path());
        config.tick_period = Duration::from_secs(300);
        let daemon = Daemon::with_drivers(
            config,
            Arc::new(NullDriver),
            Arc::new(crate::beads::testing::FakeBeads::default()),
            DoltClient::with_endpoint(town.path(), "127.0.0.1", 1),
        )
        .expect("daemon");
        assert_eq!(daemon.config.tick_period, MAX_TICK_PERIOD);
    }

    /// Driver that reports no sessions and accepts everything.
    struct NullDriver;
    impl SessionDriver for NullDriver {
        fn list_sessions(&self) -> Result<Vec<String>, crate::tmux::TmuxError> {
            Ok(Vec::new())
        }
        fn has_session(&self, _n: &str) -> Result<bool, crate::tmux::TmuxError> {
            Ok(false)
        }
        fn new_session_with_command(
            &self,
            _n: &str,
            _w: &str,
            _c: &str,
        ) -> Result<(), crate::tmux::TmuxError> {
            Ok(())
        }
        fn kill_session(&self, _n: &str) -> Result<(), crate::tmux::TmuxError> {
            Ok(())
        }
        fn kill_session_with_processes(&self, _n: &str) -> Result<(), crate::tmux::TmuxError> {
            Ok(())
        }
        fn send_keys(&self, _n: &str, _m: &str) -> Result<(), crate::tmux::TmuxError> {
            Ok(())
        }
        fn send_keys_raw(&self, _n: &str, _k: &str) -> Result<(), crate::tmux::TmuxError> {
            Ok(())
        }
        fn capture_pane(&self, _n: &str, _l: u32) -> Result<String, crate::tmux::TmuxError> {
            Ok(String::new())
        }
        fn get_pane_command(&self, _n: &str) -> Result<String, crate::tmux::TmuxError> {
            Ok(String::new())
        }
        fn get_all_environment(
            &self,
            _n: &str,
        ) -> Result<Vec<(String, String)>, crate::tmux::TmuxError> {
            Ok(Vec::new())
        }
        fn set_environment(
            &self,
            _n: &str,
            _k: &str,
            _v: &str,
        ) -> Result<(), crate::tmux::TmuxError> {
            Ok(())
        }
        fn get_global_environment(
            &self,
            _k: &str,
        ) -> Result<Option<String>, crate::tmux::TmuxError> {
            Ok(None)
        }
        fn set_global_environment(
            &self,
            _k: &str,
            _v: &str,
        ) -> Result<(), crate::tmux::TmuxError> {
            Ok(())
        }
    }
}
