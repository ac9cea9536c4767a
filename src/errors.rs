use thiserror::Error;

/// Everything that can go wrong during a profiling run.
///
/// Only `LoadRequest` is recoverable: a single dropped shot is logged and the
/// session carries on, since the profiling data is aggregate. Every other
/// variant aborts the run after best-effort cleanup.
#[derive(Error, Debug)]
pub enum Error {
    /// A process could not be created at all.
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// One synthetic request failed. Absorbed by the shooter.
    #[error("request to {target} failed: {reason}")]
    LoadRequest { target: String, reason: String },

    /// The profiler did not exit after the interrupt within the bound, so the
    /// trace file cannot be trusted.
    #[error("profiler did not flush its trace within {timeout_secs}s of the interrupt")]
    ProfilerFlush { timeout_secs: u64 },

    /// A transformation stage exited non-zero. `stage` carries the 1-based
    /// position and the stage name.
    #[error("pipeline stage {stage} exited with code {code}")]
    PipelineStage { stage: String, code: i32 },

    /// The target server never accepted a request before the probe expired.
    #[error("target at {url} did not become ready within {timeout_secs}s")]
    ReadinessTimeout { url: String, timeout_secs: u64 },

    /// A signal was requested for a process that has already exited.
    #[error("process `{0}` has already exited")]
    ProcessExited(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Process-table operations (poll, wait, signal delivery) that failed for
    /// a process we did manage to spawn.
    #[error("process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
