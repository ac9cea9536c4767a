use crate::{
    config::Config,
    errors::{Error, Result},
    load::{LoadScheduler, Shooter},
    pipeline::PipelineBuilder,
    process_control::ManagedProcess,
    profiler::ProfilerController,
};
use chrono::Utc;
use colored::*;
use std::{fmt, path::{Path, PathBuf}, time::Duration};
use tracing::{debug, info, warn};

/// Phases of a profiling run, in the order a successful run passes through
/// them. `Aborted` is terminal and reachable from any phase on a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    TargetStarting,
    TargetReady,
    ProfilingActive,
    LoadRunning,
    ProfilingStopped,
    TargetStopped,
    PipelineRunning,
    Done,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::TargetStarting => "target starting",
            RunState::TargetReady => "target ready",
            RunState::ProfilingActive => "profiling active",
            RunState::LoadRunning => "load running",
            RunState::ProfilingStopped => "profiling stopped",
            RunState::TargetStopped => "target stopped",
            RunState::PipelineRunning => "pipeline running",
            RunState::Done => "done",
            RunState::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// Record of when each phase was entered, UTC milliseconds. The ordering
/// guarantees the run makes (profiler inside the target's lifetime, pipeline
/// after teardown) are visible here.
#[derive(Debug, Default)]
pub struct Timeline {
    entries: Vec<(RunState, i64)>,
}

impl Timeline {
    fn mark(&mut self, state: RunState) {
        self.entries.push((state, Utc::now().timestamp_millis()));
    }

    pub fn entries(&self) -> &[(RunState, i64)] {
        &self.entries
    }

    /// Timestamp at which the given phase was entered, if it was reached.
    pub fn when(&self, state: RunState) -> Option<i64> {
        self.entries
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, t)| *t)
    }
}

/// What a completed run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub shots_fired: u32,
    pub shots_ok: u32,
    pub trace_file: PathBuf,
    pub artifact: PathBuf,
    pub duration_secs: f64,
}

/// Drives a full profiling run: start the target, wait until it accepts
/// requests, attach the profiler, fire the load session, stop the profiler,
/// stop the target, then stream the trace through the transformation
/// pipeline.
///
/// A single control flow sequences everything; the only concurrency is
/// between the external processes themselves, coordinated by start/stop
/// ordering. On a fatal error the orchestrator terminates whatever it
/// started before surfacing the error.
pub struct Orchestrator {
    config: Config,
    state: RunState,
    timeline: Timeline,
    target: Option<ManagedProcess>,
    profiler: Option<ManagedProcess>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Orchestrator {
            config,
            state: RunState::Init,
            timeline: Timeline::default(),
            target: None,
            profiler: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub async fn run(&mut self, server_command: &str) -> Result<RunSummary> {
        match self.sequence(server_command).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    async fn sequence(&mut self, server_command: &str) -> Result<RunSummary> {
        // ---- start the target server ----
        self.transition(RunState::TargetStarting);
        println!("> starting target server");
        println!("\t{}", format!("- {}", server_command).bright_black());
        let mut target = ManagedProcess::new("target", server_command, self.config.target.redirect);
        target.start()?;
        let pid = target.pid().ok_or_else(|| Error::Process(
            "target has no PID".to_string(),
        ))?;
        self.target = Some(target);

        // ---- wait for it to accept requests ----
        let ready_url = self.config.ready_url();
        let ready_timeout = Duration::from_secs(self.config.target.ready_timeout_secs);
        if let Some(target) = self.target.as_mut() {
            wait_until_ready(&ready_url, ready_timeout, target).await?;
        }
        self.transition(RunState::TargetReady);
        println!("> target ready at {}\t{}", ready_url.green(), "✓".green());

        // ---- attach the profiler ----
        let profiler_ctl = ProfilerController::new(&self.config.profiler);
        self.profiler = Some(profiler_ctl.attach(pid)?);
        self.transition(RunState::ProfilingActive);
        println!("> profiler attached to pid {}\t{}", pid, "✓".green());

        // ---- run the load session ----
        self.transition(RunState::LoadRunning);
        let seed = self.config.load.seed;
        let shots = self.config.load.shots;
        let cooldown = Duration::from_millis(self.config.load.cooldown_ms);
        let ammunition = self.config.load.ammunition.clone();
        println!(
            "> firing {} shots at {} targets (seed {})",
            shots,
            ammunition.len(),
            seed
        );
        let scheduler = LoadScheduler::new(seed, shots, ammunition.len());
        let shooter = Shooter::new(&self.config.load.client, cooldown);
        let mut shots_ok = 0u32;
        for index in scheduler {
            if shooter.fire(&ammunition[index]).await {
                shots_ok += 1;
            }
        }
        if shots_ok < shots {
            warn!("{} of {} shots failed", shots - shots_ok, shots);
        }
        println!("> shooting complete ({}/{} ok)\t{}", shots_ok, shots, "✓".green());

        // ---- stop the profiler, then the target, in that order ----
        if let Some(profiler) = self.profiler.as_mut() {
            profiler_ctl.stop(profiler)?;
        }
        self.transition(RunState::ProfilingStopped);
        println!("> profiler stopped\t{}", "✓".green());

        if let Some(target) = self.target.as_mut() {
            target.terminate(true)?;
        }
        self.transition(RunState::TargetStopped);
        println!("> target stopped\t{}", "✓".green());

        // ---- transform the trace into the artifact ----
        self.transition(RunState::PipelineRunning);
        println!("> rendering flamegraph");
        let pipeline = PipelineBuilder::new(
            &self.config.pipeline.stages,
            &self.config.profiler.trace_file,
            Path::new(&self.config.pipeline.artifact),
        );
        let artifact = pipeline.run()?;

        self.transition(RunState::Done);
        info!("run complete, artifact at {}", artifact.display());

        let duration_secs = match (
            self.timeline.when(RunState::TargetStarting),
            self.timeline.when(RunState::Done),
        ) {
            (Some(start), Some(stop)) => (stop - start) as f64 / 1000.0,
            _ => 0.0,
        };

        Ok(RunSummary {
            shots_fired: shots,
            shots_ok,
            trace_file: PathBuf::from(&self.config.profiler.trace_file),
            artifact,
            duration_secs,
        })
    }

    /// Best-effort cleanup on a fatal error: stop whatever is still running,
    /// profiler first. Cleanup failures are logged but never mask the
    /// original error.
    fn abort(&mut self) {
        for proc in [self.profiler.as_mut(), self.target.as_mut()]
            .into_iter()
            .flatten()
        {
            if !proc.is_alive() {
                continue;
            }
            warn!("cleaning up still-running process `{}`", proc.name());
            if let Err(err) = proc.terminate(true) {
                warn!("failed to stop `{}` during abort: {}", proc.name(), err);
            }
        }
        self.transition(RunState::Aborted);
    }

    fn transition(&mut self, next: RunState) {
        debug!("{} -> {}", self.state, next);
        self.timeline.mark(next);
        self.state = next;
    }
}

/// Polls the target until it answers an HTTP request. Any response counts:
/// the contract is "accepting connections", not business-level health. A
/// target that dies while we are waiting fails immediately instead of
/// burning the whole timeout.
async fn wait_until_ready(
    url: &str,
    timeout: Duration,
    target: &mut ManagedProcess,
) -> Result<()> {
    const POLL_INTERVAL: Duration = Duration::from_millis(200);

    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if !target.is_alive() {
            return Err(Error::Process(
                "target exited before becoming ready".to_string(),
            ));
        }

        if client.get(url).send().await.is_ok() {
            return Ok(());
        }

        if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
            return Err(Error::ReadinessTimeout {
                url: url.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
