use crate::{
    config::Redirect,
    errors::{Error, Result},
};
use std::{fs::OpenOptions, time::Duration};
use subprocess::{Exec, ExitStatus, NullFile, Popen, Redirection};
#[cfg(target_family = "unix")]
use subprocess::unix::PopenExt;
use tracing::debug;

/// Lifecycle of a [`ManagedProcess`]. Transitions are monotonic: once a
/// process has been observed to exit it never comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Terminated,
}

#[derive(Debug, Clone, Copy)]
pub enum SignalKind {
    Interrupt,
    Terminate,
}

/// A single OS process owned by the harness.
///
/// The process runs detached and is managed by the OS; this wrapper only
/// holds the handle needed to poll, signal and reap it. Exactly one
/// `ManagedProcess` exists per spawned process and dropping it does not stop
/// the child, so callers are expected to terminate what they start.
pub struct ManagedProcess {
    name: String,
    command: String,
    redirect: Redirect,
    popen: Option<Popen>,
    state: ProcessState,
}

impl ManagedProcess {
    pub fn new(name: &str, command: &str, redirect: Option<Redirect>) -> Self {
        ManagedProcess {
            name: name.to_string(),
            command: command.to_string(),
            redirect: redirect.unwrap_or(Redirect::File),
            popen: None,
            state: ProcessState::NotStarted,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// The PID returned by the operating system. None until started.
    pub fn pid(&self) -> Option<u32> {
        self.popen.as_ref().and_then(|p| p.pid())
    }

    /// Spawns the process as a detached child. This function does not block
    /// because the process is managed by the OS and running separately from
    /// this thread.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ProcessState::NotStarted {
            return Err(Error::Process(format!(
                "process `{}` has already been started",
                self.name
            )));
        }

        // break command string into POSIX words
        let words = shlex::split(&self.command).ok_or_else(|| {
            Error::Config(format!("command string is not POSIX compliant: {}", self.command))
        })?;

        // split command string into command and args
        match &words[..] {
            [command, args @ ..] => {
                let exec = Exec::cmd(command).args(args);

                let exec = match self.redirect {
                    Redirect::Null => exec.stdout(NullFile).stderr(NullFile),
                    Redirect::Parent => exec,
                    Redirect::File => {
                        let out_file = OpenOptions::new()
                            .append(true)
                            .create(true)
                            .open("./.stdout")?;
                        let err_file = OpenOptions::new()
                            .append(true)
                            .create(true)
                            .open("./.stderr")?;
                        exec.stdout(Redirection::File(out_file))
                            .stderr(Redirection::File(err_file))
                    }
                };

                let popen = exec.detached().popen().map_err(|e| Error::Spawn {
                    command: self.command.clone(),
                    reason: e.to_string(),
                })?;

                if popen.pid().is_none() {
                    return Err(Error::Spawn {
                        command: self.command.clone(),
                        reason: "process has no PID".to_string(),
                    });
                }

                debug!("started `{}` with pid {:?}", self.name, popen.pid());
                self.popen = Some(popen);
                self.state = ProcessState::Running;
                Ok(())
            }
            _ => Err(Error::Config(format!("empty command for process `{}`", self.name))),
        }
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&mut self) -> bool {
        match self.state {
            ProcessState::Running => match self.popen_mut().poll() {
                None => true,
                Some(_) => {
                    self.state = ProcessState::Terminated;
                    false
                }
            },
            _ => false,
        }
    }

    /// Delivers a signal to the process. Signalling a process that has
    /// already exited is an explicit error so callers can decide whether
    /// that matters.
    #[cfg(target_family = "unix")]
    pub fn signal(&mut self, kind: SignalKind) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::ProcessExited(self.name.clone()));
        }

        let signal = match kind {
            SignalKind::Interrupt => libc::SIGINT,
            SignalKind::Terminate => libc::SIGTERM,
        };
        self.popen_mut()
            .send_signal(signal)
            .map_err(|e| Error::Process(format!("failed to signal `{}`: {}", self.name, e)))
    }

    /// On platforms without POSIX signals an interrupt degrades to the
    /// platform's termination request.
    #[cfg(not(target_family = "unix"))]
    pub fn signal(&mut self, _kind: SignalKind) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::ProcessExited(self.name.clone()));
        }
        self.popen_mut()
            .terminate()
            .map_err(|e| Error::Process(format!("failed to signal `{}`: {}", self.name, e)))
    }

    /// Requests termination. With `wait_for_exit` the call blocks until the
    /// OS has reaped the process, guaranteeing no orphan remains on return.
    pub fn terminate(&mut self, wait_for_exit: bool) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }

        self.popen_mut()
            .terminate()
            .map_err(|e| Error::Process(format!("failed to terminate `{}`: {}", self.name, e)))?;

        if wait_for_exit {
            self.wait()?;
        }
        Ok(())
    }

    /// Forceful stop for processes that ignore SIGTERM/SIGINT.
    pub fn kill(&mut self, wait_for_exit: bool) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }

        self.popen_mut()
            .kill()
            .map_err(|e| Error::Process(format!("failed to kill `{}`: {}", self.name, e)))?;

        if wait_for_exit {
            self.wait()?;
        }
        Ok(())
    }

    /// Blocks until the process exits and reaps it.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        let name = self.name.clone();
        let status = self
            .popen_mut()
            .wait()
            .map_err(|e| Error::Process(format!("failed to wait for `{}`: {}", name, e)))?;
        self.state = ProcessState::Terminated;
        Ok(status)
    }

    /// Waits up to `timeout` for the process to exit. Returns None if it is
    /// still running when the timeout expires.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let name = self.name.clone();
        let status = self
            .popen_mut()
            .wait_timeout(timeout)
            .map_err(|e| Error::Process(format!("failed to wait for `{}`: {}", name, e)))?;
        if status.is_some() {
            self.state = ProcessState::Terminated;
        }
        Ok(status)
    }

    fn popen_mut(&mut self) -> &mut Popen {
        // invariant: state == Running implies popen is Some
        self.popen
            .as_mut()
            .expect("a running ManagedProcess must hold its Popen handle")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_family = "unix")]
    mod unix {
        use super::*;
        use sysinfo::{Pid, System};

        #[test]
        fn can_run_a_managed_process() -> crate::errors::Result<()> {
            let mut proc = ManagedProcess::new("sleep", "sleep 15", Some(Redirect::Null));
            assert_eq!(proc.state(), ProcessState::NotStarted);

            proc.start()?;
            assert_eq!(proc.state(), ProcessState::Running);
            assert!(proc.is_alive());

            let pid = proc.pid().expect("running process should have a PID");
            let mut system = System::new();
            system.refresh_all();
            assert!(system.process(Pid::from_u32(pid)).is_some());

            proc.terminate(true)?;
            Ok(())
        }

        #[test]
        fn terminate_with_wait_reaps_the_process() -> crate::errors::Result<()> {
            let mut proc = ManagedProcess::new("sleep", "sleep 15", Some(Redirect::Null));
            proc.start()?;
            let pid = proc.pid().expect("running process should have a PID");

            proc.terminate(true)?;

            // terminate(wait_for_exit = true) must not return while the OS
            // still reports the process as alive
            assert_eq!(proc.state(), ProcessState::Terminated);
            assert!(!proc.is_alive());
            let mut system = System::new();
            system.refresh_all();
            assert!(system.process(Pid::from_u32(pid)).is_none());
            Ok(())
        }

        #[test]
        fn starting_twice_is_an_error() -> crate::errors::Result<()> {
            let mut proc = ManagedProcess::new("sleep", "sleep 15", Some(Redirect::Null));
            proc.start()?;

            assert!(matches!(proc.start(), Err(Error::Process(_))));

            proc.terminate(true)?;
            Ok(())
        }

        #[test]
        fn signalling_an_exited_process_is_an_error() -> crate::errors::Result<()> {
            let mut proc = ManagedProcess::new("true", "true", Some(Redirect::Null));
            proc.start()?;
            proc.wait()?;

            let res = proc.signal(SignalKind::Interrupt);
            assert!(matches!(res, Err(Error::ProcessExited(_))));
            Ok(())
        }

        #[test]
        fn interrupt_stops_a_sleeping_process() -> crate::errors::Result<()> {
            let mut proc = ManagedProcess::new("sleep", "sleep 15", Some(Redirect::Null));
            proc.start()?;

            proc.signal(SignalKind::Interrupt)?;
            let status = proc
                .wait_timeout(Duration::from_secs(5))?
                .expect("process should exit promptly after SIGINT");
            assert!(!status.success());
            Ok(())
        }
    }

    #[test]
    fn spawn_failure_is_reported_as_spawn_error() {
        let mut proc = ManagedProcess::new(
            "missing",
            "definitely-not-a-real-binary-1c4b",
            Some(Redirect::Null),
        );
        assert!(matches!(proc.start(), Err(Error::Spawn { .. })));
        assert_eq!(proc.state(), ProcessState::NotStarted);
    }
}
