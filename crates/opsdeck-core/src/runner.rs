//! External command execution.
//!
//! Every data source in opsdeck is the stdout of some OS utility (`git`, `ps`,
//! `netstat`, `lsof`, `uptime`). `CommandRunner` is the seam all of them go
//! through: `SystemRunner` spawns real processes with a hard timeout,
//! `ScriptedRunner` serves canned output to tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{OpsError, Result};

/// Captured result of one command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub stdout: String,
    pub success: bool,
}

impl Captured {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            success: true,
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }
}

pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> Result<Captured>;

    /// Run and return stdout, or an empty string on spawn failure, timeout or
    /// non-zero exit. Samplers use this: a failed tick is an empty tick.
    fn stdout_or_empty(&self, program: &str, args: &[&str]) -> String {
        match self.run(program, args, None) {
            Ok(c) if c.success => c.stdout,
            Ok(_) => {
                tracing::debug!(program, "command exited non-zero; treating sample as empty");
                String::new()
            }
            Err(e) => {
                tracing::debug!(program, error = %e, "command failed; treating sample as empty");
                String::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SystemRunner
// ---------------------------------------------------------------------------

/// Spawns real processes. The child is killed once `timeout` elapses.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> Result<Captured> {
        let spawn_err = |reason: String| OpsError::Spawn {
            program: program.to_string(),
            reason,
        };

        if which::which(program).is_err() {
            return Err(spawn_err("not found on PATH".into()));
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| spawn_err(e.to_string()))?;

        // Drain stdout on a separate thread so a chatty child can't block on a
        // full pipe while we poll for exit.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err("stdout not captured".into()))?;
        let reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = reader.join();
                    return Err(OpsError::Timeout {
                        program: program.to_string(),
                        secs: self.timeout.as_secs(),
                    });
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(10)),
                Err(e) => return Err(spawn_err(e.to_string())),
            }
        };

        let bytes = reader.join().unwrap_or_default();
        Ok(Captured {
            stdout: String::from_utf8_lossy(&bytes).into_owned(),
            success: status.success(),
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// Test double keyed by the full command line (`"git status --porcelain"`).
/// Unknown commands fail as if the program were missing.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: HashMap<String, Captured>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, command_line: &str, stdout: &str) -> Self {
        self.responses
            .insert(command_line.to_string(), Captured::ok(stdout));
        self
    }

    pub fn with_failure(mut self, command_line: &str) -> Self {
        self.responses
            .insert(command_line.to_string(), Captured::failed());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str], _cwd: Option<&Path>) -> Result<Captured> {
        let mut line = program.to_string();
        for a in args {
            line.push(' ');
            line.push_str(a);
        }
        self.calls.borrow_mut().push(line.clone());
        self.responses
            .get(&line)
            .cloned()
            .ok_or_else(|| OpsError::Spawn {
                program: program.to_string(),
                reason: "no scripted response".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_runner_captures_stdout() {
        let runner = SystemRunner::default();
        let out = runner.run("echo", &["hello"], None).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn system_runner_reports_nonzero_exit() {
        let runner = SystemRunner::default();
        let out = runner.run("false", &[], None).unwrap();
        assert!(!out.success);
        assert_eq!(runner.stdout_or_empty("false", &[]), "");
    }

    #[test]
    fn system_runner_times_out() {
        let runner = SystemRunner::new(Duration::from_millis(100));
        let err = runner.run("sleep", &["5"], None).unwrap_err();
        assert!(matches!(err, OpsError::Timeout { .. }));
    }

    #[test]
    fn missing_program_is_empty_sample() {
        let runner = SystemRunner::default();
        assert_eq!(
            runner.stdout_or_empty("definitely-not-a-real-binary-opsdeck", &[]),
            ""
        );
    }

    #[test]
    fn scripted_runner_records_calls() {
        let runner = ScriptedRunner::new()
            .with("ps aux", "USER PID\n")
            .with_failure("uptime");
        assert_eq!(runner.stdout_or_empty("ps", &["aux"]), "USER PID\n");
        assert_eq!(runner.stdout_or_empty("uptime", &[]), "");
        assert_eq!(runner.stdout_or_empty("lsof", &["-i"]), "");
        assert_eq!(runner.calls(), vec!["ps aux", "uptime", "lsof -i"]);
    }
}
