// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The periodic poller (spec §4.4.1): four sub-polls (rigs, agents, beads,
//! hooks) run concurrently every cycle, each wrapped in a retry harness with
//! exponential backoff. On exhaustion the previously known entity set is
//! retained (graceful degradation) and a structured error is recorded.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::metrics::MetricsCollector;
use crate::model::{Agent, AgentRole, Bead, ErrorRecord, ErrorSeverity, Hook, Rig};
use crate::parse::{beads, hooks, rigs};
use crate::state::{infer_role, StateManager};

use super::probe;
use super::safety::is_safe_identifier;

const RETRY_MAX_ATTEMPTS: u32 = 3;
const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(100);
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(2);
const CLI_DEADLINE: Duration = Duration::from_secs(5);
const CLI_LIST_DEADLINE: Duration = Duration::from_secs(10);

/// One sub-poll's consecutive-failure streak (spec §4.4.1: log at most the
/// first three consecutive failures; `addError` with `severity=error` once
/// the counter reaches 3, otherwise `warning`). `error_id` names the single
/// error record that streak is folded into, so a third straight failure
/// updates the same record's `retry_count` to 3 instead of inserting a
/// second and third record (spec §8 scenario D).
#[derive(Default)]
struct FailureSlot {
    count: AtomicU32,
    error_id: Mutex<Option<String>>,
}

#[derive(Default)]
struct FailureCounters {
    rigs: FailureSlot,
    agents: FailureSlot,
    beads: FailureSlot,
    hooks: FailureSlot,
}

impl FailureCounters {
    fn slot(&self, source: &str) -> &FailureSlot {
        match source {
            "agents" => &self.agents,
            "beads" => &self.beads,
            "hooks" => &self.hooks,
            _ => &self.rigs,
        }
    }
}

pub struct Poller {
    gt_dir: PathBuf,
    interval: Duration,
    state: Arc<StateManager>,
    metrics: Arc<RwLock<MetricsCollector>>,
    failures: FailureCounters,
}

impl Poller {
    pub fn new(
        gt_dir: PathBuf,
        interval: Duration,
        state: Arc<StateManager>,
        metrics: Arc<RwLock<MetricsCollector>>,
    ) -> Self {
        Self { gt_dir, interval, state, metrics, failures: FailureCounters::default() }
    }

    /// Run the poll loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.run_cycle().await;
        }
    }

    async fn run_cycle(&self) {
        let started = crate::now_ms();

        let rig_names = self.state.rig_names().await;
        let (rigs_res, agents_res, beads_res, hooks_res) = tokio::join!(
            self.poll_rigs(),
            self.poll_all_agents(&rig_names),
            self.poll_all_beads(&rig_names),
            self.poll_all_hooks(&rig_names),
        );

        let success = rigs_res.is_ok() && agents_res.is_ok() && beads_res.is_ok() && hooks_res.is_ok();
        let duration_ms = crate::now_ms() - started;
        self.metrics.write().await.record_poll(duration_ms, success);

        tracing::debug!(duration_ms, success, "poll cycle complete");
    }

    async fn poll_rigs(&self) -> anyhow::Result<()> {
        let gt_dir = self.gt_dir.clone();
        let result = retry_with_backoff(|| run_gt_rig_list(gt_dir.clone())).await;
        self.finish_subpoll("rigs", result, |rigs_map| async move {
            self.state.update_rigs(rigs_map, crate::now_ms()).await;
        })
        .await
    }

    async fn poll_all_agents(&self, rig_names: &[String]) -> anyhow::Result<()> {
        let mut overall = Ok(());
        for rig in rig_names {
            if let Err(e) = self.poll_agents(rig).await {
                overall = Err(e);
            }
        }
        overall
    }

    async fn poll_agents(&self, rig: &str) -> anyhow::Result<()> {
        if !is_safe_identifier(rig) {
            return Ok(());
        }
        let rig_snapshot = self.state.snapshot().await;
        let Some(rig_record) = rig_snapshot.rigs.get(rig).cloned() else { return Ok(()) };
        let gt_dir = self.gt_dir.clone();
        let rig_name = rig.to_owned();
        let agent_names = rig_record.agents.clone();

        let result = retry_with_backoff(|| {
            build_agents(gt_dir.clone(), rig_name.clone(), agent_names.clone())
        })
        .await;

        self.finish_subpoll("agents", result, |agents| async move {
            self.state.update_agents(rig, agents, crate::now_ms()).await;
        })
        .await
    }

    async fn poll_all_beads(&self, rig_names: &[String]) -> anyhow::Result<()> {
        let mut overall = Ok(());
        for rig in rig_names {
            if let Err(e) = self.poll_beads(rig).await {
                overall = Err(e);
            }
        }
        overall
    }

    async fn poll_beads(&self, rig: &str) -> anyhow::Result<()> {
        if !is_safe_identifier(rig) {
            return Ok(());
        }
        let rig_dir = self.gt_dir.join(rig);
        let rig_name = rig.to_owned();
        let result = retry_with_backoff(|| run_bd_list(rig_dir.clone(), rig_name.clone())).await;
        self.finish_subpoll("beads", result, |beads_list| async move {
            self.state.update_beads(rig, beads_list, crate::now_ms()).await;
        })
        .await
    }

    async fn poll_all_hooks(&self, rig_names: &[String]) -> anyhow::Result<()> {
        let mut overall = Ok(());
        for rig in rig_names {
            if let Err(e) = self.poll_hooks(rig).await {
                overall = Err(e);
            }
        }
        overall
    }

    async fn poll_hooks(&self, rig: &str) -> anyhow::Result<()> {
        if !is_safe_identifier(rig) {
            return Ok(());
        }
        let rig_snapshot = self.state.snapshot().await;
        let Some(rig_record) = rig_snapshot.rigs.get(rig).cloned() else { return Ok(()) };
        let gt_dir = self.gt_dir.clone();
        let rig_name = rig.to_owned();
        let agent_names = rig_record.agents.clone();

        let result = retry_with_backoff(|| {
            build_hooks(gt_dir.clone(), rig_name.clone(), agent_names.clone())
        })
        .await;

        self.finish_subpoll("hooks", result, |hooks_map| async move {
            self.state.update_hooks(rig, hooks_map, crate::now_ms()).await;
        })
        .await
    }

    /// Common success/failure handling for one sub-poll: reset the failure
    /// streak and apply the result on success; on failure, fold the attempt
    /// into the streak's single error record (spec §8 scenario D — three
    /// consecutive failures must read back as one record with
    /// `retry_count=3`, not three), escalating to `severity=error` once the
    /// streak reaches 3. The state manager's previous entity set is left
    /// untouched either way.
    async fn finish_subpoll<T, F, Fut>(
        &self,
        source: &str,
        result: anyhow::Result<T>,
        apply: F,
    ) -> anyhow::Result<()>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let slot = self.failures.slot(source);
        match result {
            Ok(value) => {
                slot.count.store(0, Ordering::SeqCst);
                *slot.error_id.lock().await = None;
                apply(value).await;
                Ok(())
            }
            Err(e) => {
                let count = slot.count.fetch_add(1, Ordering::SeqCst) + 1;
                if count <= 3 {
                    tracing::warn!(source, attempt = count, err = %e, "sub-poll failed");
                }
                let severity = if count >= 3 { ErrorSeverity::Error } else { ErrorSeverity::Warning };
                let now = crate::now_ms();
                let mut error_id = slot.error_id.lock().await;
                let updated = match error_id.as_deref() {
                    Some(id) => self.state.update_error(id, severity, e.to_string(), count, now).await,
                    None => false,
                };
                if !updated {
                    let id = self
                        .state
                        .add_error(
                            ErrorRecord {
                                id: String::new(),
                                severity,
                                source: source.to_owned(),
                                message: e.to_string(),
                                retry_count: count,
                                timestamp: 0,
                            },
                            now,
                        )
                        .await;
                    *error_id = Some(id);
                }
                Err(e)
            }
        }
    }
}

/// Generic retry harness: exponential backoff starting at
/// [`RETRY_INITIAL_DELAY`], doubling each attempt, capped at
/// [`RETRY_BACKOFF_CAP`], for at most [`RETRY_MAX_ATTEMPTS`] attempts.
async fn retry_with_backoff<T, F, Fut>(mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut delay = RETRY_INITIAL_DELAY;
    let mut last_err = None;
    for attempt in 0..RETRY_MAX_ATTEMPTS {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < RETRY_MAX_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RETRY_BACKOFF_CAP);
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("retry exhausted with no recorded error")))
}

/// Spawn `gt rig list --json` with an explicit deadline (list commands get
/// the longer [`CLI_LIST_DEADLINE`] per spec §5).
async fn run_gt_rig_list(gt_dir: PathBuf) -> anyhow::Result<HashMap<String, Rig>> {
    let output = timeout(
        CLI_LIST_DEADLINE,
        tokio::process::Command::new("gt")
            .arg("rig")
            .arg("list")
            .arg("--json")
            .current_dir(&gt_dir)
            .output(),
    )
    .await??;
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(rigs::parse_rig_list(&text))
}

/// `bd list --json`, invoked with cwd set to the rig's working tree (`bd`
/// operates relative to the current directory the way `gt` does).
async fn run_bd_list(rig_dir: PathBuf, rig_name: String) -> anyhow::Result<Vec<Bead>> {
    let output = timeout(
        CLI_LIST_DEADLINE,
        tokio::process::Command::new("bd").arg("list").arg("--json").current_dir(&rig_dir).output(),
    )
    .await??;
    let text = String::from_utf8_lossy(&output.stdout);
    let mut parsed = beads::parse_beads(&text);
    for bead in &mut parsed {
        if bead.rig.is_empty() {
            bead.rig = rig_name.clone();
        }
    }
    Ok(parsed)
}

/// Resolve an agent's working directory under the standard layout (spec
/// §6): `mayor`/`witness`/`refinery` are singleton role directories;
/// `crew/<name>` and `polecats/<name>` hold one directory per instance.
pub fn agent_dir(gt_dir: &Path, rig: &str, role: AgentRole, name: &str) -> PathBuf {
    match role {
        AgentRole::Mayor => gt_dir.join(rig).join("mayor"),
        AgentRole::Witness => gt_dir.join(rig).join("witness"),
        AgentRole::Refinery => gt_dir.join(rig).join("refinery"),
        AgentRole::Crew => gt_dir.join(rig).join("crew").join(name),
        AgentRole::Polecat => gt_dir.join(rig).join("polecats").join(name),
    }
}

async fn build_agents(gt_dir: PathBuf, rig: String, agent_names: Vec<String>) -> anyhow::Result<Vec<Agent>> {
    let mut agents = Vec::with_capacity(agent_names.len());
    let now = crate::now_ms();
    for name in agent_names {
        if !is_safe_identifier(&name) {
            continue;
        }
        let role = infer_role(&name);
        let dir = agent_dir(&gt_dir, &rig, role, &name);

        let (has_process, has_session, has_activity) = tokio::join!(
            probe::process_present(&rig, &name),
            probe::session_present(&rig, &name),
            probe::recent_activity(&dir, now),
        );
        let status = probe::derive_status(has_process, has_session, has_activity);

        agents.push(Agent {
            rig: rig.clone(),
            name,
            role,
            status,
            has_work: false,
            current_bead: None,
            session_running: has_session,
        });
    }
    Ok(agents)
}

async fn build_hooks(
    gt_dir: PathBuf,
    rig: String,
    agent_names: Vec<String>,
) -> anyhow::Result<HashMap<String, Hook>> {
    let mut hooks_map = HashMap::new();
    for name in agent_names {
        if !is_safe_identifier(&name) {
            continue;
        }
        let role = infer_role(&name);
        let dir = agent_dir(&gt_dir, &rig, role, &name);
        let output = timeout(
            CLI_DEADLINE,
            tokio::process::Command::new("gt").arg("hook").arg("--json").current_dir(&dir).output(),
        )
        .await;
        let Ok(Ok(output)) = output else { continue };
        let text = String::from_utf8_lossy(&output.stdout);
        if let Some(hook) = hooks::parse_hook_output(&text, &rig, &name) {
            hooks_map.insert(name.clone(), hook);
        }
    }
    Ok(hooks_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_exhausts_after_three_attempts() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: anyhow::Result<()> = retry_with_backoff(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("boom")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), RETRY_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn retry_succeeds_on_second_attempt() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = retry_with_backoff(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move { if n == 0 { Err(anyhow::anyhow!("first try fails")) } else { Ok(42) } }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn three_consecutive_failures_collapse_into_one_error_record() {
        // Spec §8 scenario D.
        let bus = Arc::new(crate::bus::Bus::new());
        let state = Arc::new(StateManager::new(bus, 10_800_000, 10_000));
        let poller = Poller::new(
            PathBuf::from("/tmp/gt"),
            Duration::from_secs(5),
            Arc::clone(&state),
            Arc::new(RwLock::new(MetricsCollector::new(60, 0))),
        );

        for _ in 0..3 {
            let result: anyhow::Result<()> = Err(anyhow::anyhow!("rigs unreachable"));
            let _ = poller.finish_subpoll("rigs", result, |_: ()| async {}).await;
        }

        let errors = state.snapshot().await.errors;
        assert_eq!(errors.len(), 1, "three consecutive failures must fold into a single record");
        assert_eq!(errors[0].retry_count, 3);
        assert_eq!(errors[0].severity, ErrorSeverity::Error);
    }

    #[tokio::test]
    async fn a_success_after_failures_resets_the_streak() {
        let bus = Arc::new(crate::bus::Bus::new());
        let state = Arc::new(StateManager::new(bus, 10_800_000, 10_000));
        let poller = Poller::new(
            PathBuf::from("/tmp/gt"),
            Duration::from_secs(5),
            Arc::clone(&state),
            Arc::new(RwLock::new(MetricsCollector::new(60, 0))),
        );

        let failure: anyhow::Result<()> = Err(anyhow::anyhow!("rigs unreachable"));
        let _ = poller.finish_subpoll("rigs", failure, |_: ()| async {}).await;
        let success: anyhow::Result<()> = Ok(());
        let _ = poller.finish_subpoll("rigs", success, |_: ()| async {}).await;

        let failure_again: anyhow::Result<()> = Err(anyhow::anyhow!("rigs unreachable again"));
        let _ = poller.finish_subpoll("rigs", failure_again, |_: ()| async {}).await;

        let errors = state.snapshot().await.errors;
        assert_eq!(errors.len(), 2, "the reset streak starts a fresh record rather than reusing the resolved one");
        assert_eq!(errors[0].retry_count, 1);
    }

    #[test]
    fn agent_dir_layout_matches_spec_filesystem_shape() {
        let gt_dir = Path::new("/home/u/gt");
        assert_eq!(agent_dir(gt_dir, "r1", AgentRole::Mayor, "mayor"), gt_dir.join("r1/mayor"));
        assert_eq!(agent_dir(gt_dir, "r1", AgentRole::Crew, "crew-1"), gt_dir.join("r1/crew/crew-1"));
        assert_eq!(
            agent_dir(gt_dir, "r1", AgentRole::Polecat, "polecat-3"),
            gt_dir.join("r1/polecats/polecat-3")
        );
    }
}
