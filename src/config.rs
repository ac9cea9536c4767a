use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fs, io::Read, path::Path};

// ******** ******** ********
// **    CONFIGURATION     **
// ******** ******** ********
#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub profiler: ProfilerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}
impl Config {
    pub fn try_from_path(path: &Path) -> Result<Config> {
        let mut config_str = String::new();
        fs::File::open(path)?.read_to_string(&mut config_str)?;
        Config::try_from_str(&config_str)
    }

    pub fn try_from_str(conf_str: &str) -> Result<Config> {
        let config = toml::from_str::<Config>(conf_str)
            .map_err(|e| Error::Config(format!("TOML parsing error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the parts of the config the harness cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.load.ammunition.is_empty() {
            return Err(Error::Config(
                "ammunition catalog must contain at least one target".to_string(),
            ));
        }
        if self.load.shots == 0 {
            return Err(Error::Config("shot count must be greater than 0".to_string()));
        }
        if self.pipeline.stages.is_empty() {
            return Err(Error::Config(
                "pipeline must contain at least one stage".to_string(),
            ));
        }
        Ok(())
    }

    /// The URL polled by the readiness probe. Falls back to the first
    /// ammunition target when none is configured explicitly.
    pub fn ready_url(&self) -> String {
        match &self.target.ready_url {
            Some(url) => url.clone(),
            None => ensure_scheme(&self.load.ammunition[0]),
        }
    }
}

/// Ammunition targets are curl-style and may omit the scheme; reqwest needs one.
fn ensure_scheme(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone, Copy, Serialize)]
#[serde(tag = "to", rename_all = "lowercase")]
pub enum Redirect {
    Null,
    Parent,
    File,
}

#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct TargetConfig {
    /// URL the readiness probe polls until the server accepts a request.
    pub ready_url: Option<String>,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    pub redirect: Option<Redirect>,
}
impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            ready_url: None,
            ready_timeout_secs: default_ready_timeout_secs(),
            redirect: None,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct LoadConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_shots")]
    pub shots: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Client command template. `{target}` is replaced with the ammunition
    /// target for each shot.
    #[serde(default = "default_client")]
    pub client: String,
    #[serde(default = "default_ammunition")]
    pub ammunition: Vec<String>,
}
impl Default for LoadConfig {
    fn default() -> Self {
        LoadConfig {
            seed: default_seed(),
            shots: default_shots(),
            cooldown_ms: default_cooldown_ms(),
            client: default_client(),
            ammunition: default_ammunition(),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct ProfilerConfig {
    /// Profiler command template. `{pid}` is replaced with the target's PID
    /// and `{trace}` with the trace file path.
    #[serde(default = "default_profiler_command")]
    pub command: String,
    #[serde(default = "default_trace_file")]
    pub trace_file: String,
    /// How long to wait for the profiler to flush and exit after SIGINT.
    #[serde(default = "default_flush_timeout_secs")]
    pub flush_timeout_secs: u64,
}
impl Default for ProfilerConfig {
    fn default() -> Self {
        ProfilerConfig {
            command: default_profiler_command(),
            trace_file: default_trace_file(),
            flush_timeout_secs: default_flush_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct PipelineConfig {
    /// Stage command templates, left to right. `{trace}` is replaced with the
    /// trace file path.
    #[serde(default = "default_stages")]
    pub stages: Vec<String>,
    #[serde(default = "default_artifact")]
    pub artifact: String,
}
impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            stages: default_stages(),
            artifact: default_artifact(),
        }
    }
}

fn default_ready_timeout_secs() -> u64 {
    10
}
fn default_seed() -> u64 {
    123456789
}
fn default_shots() -> u32 {
    100
}
fn default_cooldown_ms() -> u64 {
    100
}
fn default_client() -> String {
    "curl {target}".to_string()
}
fn default_ammunition() -> Vec<String> {
    vec![
        "localhost:8080/api/v1/maps/map1".to_string(),
        "localhost:8080/api/v1/maps".to_string(),
    ]
}
fn default_profiler_command() -> String {
    "perf record -g -o {trace} -p {pid}".to_string()
}
fn default_trace_file() -> String {
    "perf.data".to_string()
}
fn default_flush_timeout_secs() -> u64 {
    10
}
fn default_stages() -> Vec<String> {
    vec![
        "perf script -i {trace}".to_string(),
        "stackcollapse-perf.pl".to_string(),
        "flamegraph.pl".to_string(),
    ]
}
fn default_artifact() -> String {
    "graph.svg".to_string()
}
