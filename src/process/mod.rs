use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use log::{debug, error, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, ChildStdout, Command};

pub mod commands;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unable to start {name} ({program}): {source}")]
    Spawn { name: String, program: String, source: std::io::Error },
    #[error("{0} is already running")]
    AlreadyRunning(String),
    #[error("{0} has no output stream")]
    NoStdout(String),
}

/// Program and arguments of one external process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Pipe stdout to us instead of inheriting it
    pub capture_stdout: bool,
}

impl CommandSpec {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        return CommandSpec { program: program.to_string(), args, capture_stdout: false };
    }

    pub fn with_stdout(mut self) -> Self {
        self.capture_stdout = true;
        return self;
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        return parts.join(" ");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Exited,
}

/// Owns one external process from spawn to reap
pub struct ChildProcessHandle {
    name: String,
    state: ProcessState,
    child: Option<Child>,
    exit_status: Option<ExitStatus>,
}

impl ChildProcessHandle {
    pub fn new(name: &str) -> Self {
        return ChildProcessHandle {
            name: name.to_string(),
            state: ProcessState::NotStarted,
            child: None,
            exit_status: None,
        }
    }

    pub fn name(&self) -> &str {
        return &self.name;
    }

    pub fn state(&self) -> ProcessState {
        return self.state;
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        return self.exit_status;
    }

    pub fn pid(&self) -> Option<u32> {
        return self.child.as_ref().and_then(|c| c.id());
    }

    pub fn start(&mut self, spec: &CommandSpec) -> Result<(), ProcessError> {
        if self.is_alive() {
            return Err(ProcessError::AlreadyRunning(self.name.clone()));
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(if spec.capture_stdout { Stdio::piped() } else { Stdio::inherit() })
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            name: self.name.clone(),
            program: spec.program.clone(),
            source,
        })?;

        info!("Started {} with pid {:?}: {}", self.name, child.id(), spec.command_line());
        self.child = Some(child);
        self.exit_status = None;
        self.state = ProcessState::Running;
        return Ok(());
    }

    /// Hands out the piped stdout, only once per started process
    pub fn take_stdout(&mut self) -> Result<ChildStdout, ProcessError> {
        return self.child.as_mut()
            .and_then(|c| c.stdout.take())
            .ok_or_else(|| ProcessError::NoStdout(self.name.clone()));
    }

    pub fn is_alive(&mut self) -> bool {
        let child = match self.child.as_mut() {
            Some(c) => c,
            None => return false,
        };

        match child.try_wait() {
            Ok(None) => return true,
            Ok(Some(status)) => {
                debug!("{} exited with {status}", self.name);
                self.exit_status = Some(status);
            }
            Err(e) => {
                error!("Unable to query {}: {e}", self.name);
            }
        }

        self.child = None;
        self.state = ProcessState::Exited;
        return false;
    }

    /// Asks the process to terminate, kills it after `grace` and reaps it.
    ///
    /// Stopping a handle that never started or already exited does nothing.
    pub async fn stop(&mut self, grace: Duration) {
        if !self.is_alive() {
            return;
        }

        /* the child stays in the handle until reaped, an interrupted stop can be repeated */
        let child = match self.child.as_mut() {
            Some(c) => c,
            None => return,
        };

        if let Some(pid) = child.id() {
            debug!("Sending SIGTERM to {} ({pid})", self.name);
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Unable to send SIGTERM to {}: {e}", self.name);
            }
        }

        let status = match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                error!("Waiting for {} failed: {e}", self.name);
                None
            }
            Err(_) => {
                warn!("{} did not exit within {grace:?}, killing it", self.name);
                None
            }
        };

        let status = match status {
            Some(s) => Some(s),
            None => {
                if let Err(e) = child.start_kill() {
                    debug!("Kill of {} failed: {e}", self.name);
                }
                match child.wait().await {
                    Ok(s) => Some(s),
                    Err(e) => {
                        error!("Unable to reap {}: {e}", self.name);
                        None
                    }
                }
            }
        };

        self.child = None;
        info!("Stopped {} ({:?})", self.name, status);
        self.exit_status = status;
        self.state = ProcessState::Exited;
    }
}
