use crate::errors::{Error, Result};
use itertools::Itertools;
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    process::{Child, ChildStdout, Command, Stdio},
};
use tracing::{debug, warn};

/// One stage of the transformation chain. `{trace}` in the command template
/// is replaced with the trace file path before spawning.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub command: String,
}

impl StageSpec {
    pub fn new(command: &str) -> Self {
        StageSpec {
            command: command.to_string(),
        }
    }

    /// The stage's display name: its program word.
    pub fn name(&self) -> String {
        shlex::split(&self.command)
            .and_then(|words| words.first().cloned())
            .unwrap_or_else(|| self.command.clone())
    }
}

/// Wires a chain of subprocesses together, stdout to stdin, and collects the
/// final stage's output in the artifact file.
///
/// Stages are spawned left to right. Once a stage's output stream has been
/// handed to its successor the builder's own handle to it is dropped;
/// holding it open would keep the write end of the pipe alive and the
/// downstream stage would never see end-of-input. The artifact file is opened
/// before the last stage is spawned and is owned by that stage until it
/// exits. Data streams process-to-process, so the trace never has to fit in
/// this program's memory.
pub struct PipelineBuilder {
    stages: Vec<StageSpec>,
    artifact: PathBuf,
}

impl PipelineBuilder {
    pub fn new(stage_commands: &[String], trace_file: &str, artifact: &Path) -> Self {
        let stages = stage_commands
            .iter()
            .map(|command| StageSpec::new(&command.replace("{trace}", trace_file)))
            .collect();
        PipelineBuilder {
            stages,
            artifact: artifact.to_path_buf(),
        }
    }

    /// Runs the whole chain and blocks until every stage has exited. Succeeds
    /// only when all stages exit zero; any failure removes the artifact so no
    /// partial output survives.
    pub fn run(&self) -> Result<PathBuf> {
        if self.stages.is_empty() {
            return Err(Error::Config("pipeline has no stages".to_string()));
        }

        debug!(
            "running pipeline {} -> {}",
            self.stages.iter().map(|s| s.name()).join(" | "),
            self.artifact.display()
        );

        let mut children: Vec<(String, Child)> = Vec::with_capacity(self.stages.len());
        let mut upstream: Option<ChildStdout> = None;
        let last = self.stages.len() - 1;

        for (i, stage) in self.stages.iter().enumerate() {
            let child = match self.spawn_stage(stage, i == last, upstream.take()) {
                Ok(child) => child,
                Err(err) => {
                    // a stage that never started means the chain can't
                    // complete; reap what was already running
                    for (_, child) in children.iter_mut() {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                    self.discard_artifact();
                    return Err(err);
                }
            };
            children.push((stage.name(), child));
            if i != last {
                upstream = children
                    .last_mut()
                    .and_then(|(_, child)| child.stdout.take());
            }
        }

        // Wait on the stages back to front (the artifact writer first), but
        // report the earliest failure in pipeline order.
        let mut statuses = Vec::with_capacity(children.len());
        for (name, mut child) in children.into_iter().rev() {
            let status = child.wait()?;
            statuses.push((name, status));
        }
        statuses.reverse();

        for (i, (name, status)) in statuses.iter().enumerate() {
            if !status.success() {
                self.discard_artifact();
                return Err(Error::PipelineStage {
                    stage: format!("{} ({})", i + 1, name),
                    // signal deaths carry no exit code
                    code: status.code().unwrap_or(-1),
                });
            }
        }

        Ok(self.artifact.clone())
    }

    fn spawn_stage(
        &self,
        stage: &StageSpec,
        is_last: bool,
        upstream: Option<ChildStdout>,
    ) -> Result<Child> {
        let words = shlex::split(&stage.command).ok_or_else(|| {
            Error::Config(format!(
                "stage command is not POSIX compliant: {}",
                stage.command
            ))
        })?;
        let (program, args) = words
            .split_first()
            .ok_or_else(|| Error::Config("empty stage command".to_string()))?;

        let mut command = Command::new(program);
        command.args(args).stderr(Stdio::null());

        // Taking ownership of the upstream handle here is the handoff: the
        // descriptor moves into the child and our copy is closed when
        // `command` goes out of scope, letting EOF propagate down the chain.
        match upstream {
            Some(output) => command.stdin(Stdio::from(output)),
            None => command.stdin(Stdio::null()),
        };

        if is_last {
            let artifact = File::create(&self.artifact)?;
            command.stdout(Stdio::from(artifact));
        } else {
            command.stdout(Stdio::piped());
        }

        command.spawn().map_err(|e| Error::Spawn {
            command: stage.command.clone(),
            reason: e.to_string(),
        })
    }

    fn discard_artifact(&self) {
        match fs::remove_file(&self.artifact) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "failed to remove incomplete artifact {}: {}",
                self.artifact.display(),
                err
            ),
        }
    }
}
