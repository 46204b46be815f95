// Privileged command execution seam.
//
// Every external invocation (ip, iptables, mount, lxc-*, mknod, chroot)
// goes through the Executor trait so the whole stack can be driven against
// a scripted executor in tests.

use crate::error::{Error, Result};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Captured result of an external command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandResult {
    /// Combined stdout+stderr, trimmed, for error reporting.
    pub fn output(&self) -> String {
        let mut out = self.stdout.trim().to_string();
        let err = self.stderr.trim();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }
}

/// Synchronous, privileged command executor.
pub trait Executor {
    /// Run an argv-style command and capture its output. A nonzero exit
    /// code is reported through `CommandResult::success`, not as an `Err`;
    /// `Err` is reserved for spawn failures and timeouts.
    fn run(&self, argv: &[&str]) -> Result<CommandResult>;

    /// Run an argv-style command and fail with `CommandFailed` on a
    /// nonzero exit code, carrying the captured output for diagnosis.
    fn run_checked(&self, argv: &[&str]) -> Result<CommandResult> {
        let result = self.run(argv)?;
        if !result.success {
            return Err(Error::CommandFailed {
                cmd: argv.join(" "),
                code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }

    /// Run a command, ignoring failure. Used for idempotent cleanup such
    /// as deleting an interface that may not exist.
    fn run_quietly(&self, argv: &[&str]) {
        let _ = self.run(argv);
    }
}

/// Executor backed by real subprocesses, with a per-command timeout.
pub struct ShellExecutor {
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Executor for ShellExecutor {
    fn run(&self, argv: &[&str]) -> Result<CommandResult> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Validation("empty command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // std::process has no wait-with-timeout, so poll the child. The
        // commands issued here are short-lived; 20ms granularity is plenty.
        let started = Instant::now();
        loop {
            if child.try_wait()?.is_some() {
                break;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::CommandTimeout {
                    cmd: argv.join(" "),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        let output = child.wait_with_output()?;
        Ok(CommandResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted executor for tests: records every command issued and
    //! replays canned results keyed by substring match.

    use super::{CommandResult, Executor};
    use crate::error::Result;
    use std::cell::RefCell;
    use std::rc::Rc;

    pub fn ok_result() -> CommandResult {
        CommandResult {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn ok_with_stdout(stdout: &str) -> CommandResult {
        CommandResult {
            success: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn failed_result(stderr: &str) -> CommandResult {
        CommandResult {
            success: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: Some(1),
        }
    }

    pub struct ScriptedExecutor {
        calls: Rc<RefCell<Vec<String>>>,
        responses: Vec<(String, CommandResult)>,
    }

    impl ScriptedExecutor {
        pub fn new() -> Self {
            Self {
                calls: Rc::new(RefCell::new(Vec::new())),
                responses: Vec::new(),
            }
        }

        /// Commands containing `pattern` get `result` instead of success.
        pub fn respond(mut self, pattern: &str, result: CommandResult) -> Self {
            self.responses.push((pattern.to_string(), result));
            self
        }

        /// Handle for inspecting issued commands after the executor has
        /// been moved into a session.
        pub fn call_log(&self) -> Rc<RefCell<Vec<String>>> {
            Rc::clone(&self.calls)
        }
    }

    impl Executor for ScriptedExecutor {
        fn run(&self, argv: &[&str]) -> Result<CommandResult> {
            let cmd = argv.join(" ");
            self.calls.borrow_mut().push(cmd.clone());
            for (pattern, result) in &self.responses {
                if cmd.contains(pattern.as_str()) {
                    return Ok(result.clone());
                }
            }
            Ok(ok_result())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_exit_code_and_output() {
        let exec = ShellExecutor::new(Duration::from_secs(5));
        let result = exec.run(&["sh", "-c", "echo out; echo err >&2"]).unwrap();
        assert!(result.success);
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert_eq!(result.exit_code, Some(0));
    }

    #[test]
    fn nonzero_exit_is_not_an_err() {
        let exec = ShellExecutor::new(Duration::from_secs(5));
        let result = exec.run(&["sh", "-c", "exit 3"]).unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
    }

    #[test]
    fn run_checked_fails_on_nonzero_exit() {
        let exec = ShellExecutor::new(Duration::from_secs(5));
        let err = exec.run_checked(&["sh", "-c", "echo bad >&2; exit 1"]);
        match err {
            Err(Error::CommandFailed { stderr, code, .. }) => {
                assert_eq!(stderr.trim(), "bad");
                assert_eq!(code, Some(1));
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[test]
    fn slow_command_times_out() {
        let exec = ShellExecutor::new(Duration::from_millis(100));
        let err = exec.run(&["sleep", "5"]);
        assert!(matches!(err, Err(Error::CommandTimeout { .. })));
    }
}
