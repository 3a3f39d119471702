//! Action executor - runs a resolved script and captures its output

use std::{
    ffi::OsString,
    io::{self, Read},
    process::{Command, ExitStatus, Stdio},
};

use crate::dispatcher::ResolvedAction;

/// Interpreter scripts are handed to when none is configured
pub const DEFAULT_SHELL: &str = "sh";

/// What a script run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// stdout and stderr interleaved in the order the child wrote them
    pub combined_output: String,
    /// True iff the child exited with status zero
    pub succeeded:       bool,
}

impl ExecutionResult {
    fn failed(combined_output: String) -> Self {
        Self {
            combined_output,
            succeeded: false,
        }
    }
}

/// Runs scripts synchronously, one at a time
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    /// Interpreter prepended to every invocation; `None` executes the script directly
    shell: Option<OsString>,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::with_shell(DEFAULT_SHELL)
    }
}

impl ActionExecutor {
    /// Executor that runs scripts through `shell`
    pub fn with_shell<S: Into<OsString>>(shell: S) -> Self {
        let shell = shell.into();
        Self {
            shell: (!shell.is_empty()).then_some(shell),
        }
    }

    /// Executor that spawns the script path itself
    pub fn direct() -> Self {
        Self { shell: None }
    }

    /// Run the action to completion.
    ///
    /// Never fails: a script that cannot be started is reported like a
    /// non-zero exit, with the spawn error as its output.
    pub fn execute(&self, action: &ResolvedAction) -> ExecutionResult {
        match self.run(action) {
            Ok((output, status)) => {
                let mut combined_output = String::from_utf8_lossy(&output).into_owned();
                let succeeded = status.success();
                if !succeeded && combined_output.is_empty() {
                    combined_output = status.to_string();
                }
                ExecutionResult {
                    combined_output,
                    succeeded,
                }
            }
            Err(e) => {
                tracing::error!(
                    "Failed to run {}: {}",
                    action.executable_path.display(),
                    e
                );
                ExecutionResult::failed(format!(
                    "failed to run {}: {}",
                    action.executable_path.display(),
                    e
                ))
            }
        }
    }

    fn command_for(&self, action: &ResolvedAction) -> Command {
        let mut command = match &self.shell {
            Some(shell) => {
                let mut command = Command::new(shell);
                command.arg(&action.executable_path);
                command
            }
            None => Command::new(&action.executable_path),
        };
        command.args(&action.arguments);
        command
    }

    fn run(&self, action: &ResolvedAction) -> io::Result<(Vec<u8>, ExitStatus)> {
        // One pipe for both streams keeps their relative order.
        let (mut reader, writer) = io::pipe()?;

        let mut command = self.command_for(action);
        command
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);

        let mut child = command.spawn()?;
        // The command still owns write ends; reading would never see EOF.
        drop(command);

        let mut output = Vec::new();
        let read = reader.read_to_end(&mut output);
        let status = child.wait()?;
        read?;

        Ok((output, status))
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use super::*;

    fn script(dir: &Path, name: &str, body: &str) -> ResolvedAction {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        ResolvedAction {
            executable_path: path,
            arguments:       Vec::new(),
        }
    }

    #[test]
    fn captures_stdout_of_successful_script() {
        let dir = tempfile::tempdir().unwrap();
        let action = script(dir.path(), "ok.sh", "echo hello\n");

        let result = ActionExecutor::default().execute(&action);
        assert_eq!(
            result,
            ExecutionResult {
                combined_output: "hello\n".to_string(),
                succeeded:       true,
            }
        );
    }

    #[test]
    fn passes_arguments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut action = script(dir.path(), "args.sh", "for a in \"$@\"; do echo \"[$a]\"; done\n");
        action.arguments = vec!["a.conf".into(), "x = 1".into(), "".into()];

        let result = ActionExecutor::default().execute(&action);
        assert!(result.succeeded);
        assert_eq!(result.combined_output, "[a.conf]\n[x = 1]\n[]\n");
    }

    #[test]
    fn interleaves_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let action = script(
            dir.path(),
            "mixed.sh",
            "echo one\necho two >&2\necho three\necho four >&2\n",
        );

        let result = ActionExecutor::default().execute(&action);
        assert!(result.succeeded);
        assert_eq!(result.combined_output, "one\ntwo\nthree\nfour\n");
    }

    #[test]
    fn non_zero_exit_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let action = script(dir.path(), "fail.sh", "echo broken >&2\nexit 3\n");

        let result = ActionExecutor::default().execute(&action);
        assert!(!result.succeeded);
        assert_eq!(result.combined_output, "broken\n");
    }

    #[test]
    fn silent_failure_still_carries_a_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let action = script(dir.path(), "quiet.sh", "exit 7\n");

        let result = ActionExecutor::default().execute(&action);
        assert!(!result.succeeded);
        assert!(result.combined_output.contains('7'), "{}", result.combined_output);
    }

    #[test]
    fn missing_script_fails_through_the_shell() {
        let dir = tempfile::tempdir().unwrap();
        let action = ResolvedAction {
            executable_path: dir.path().join("absent.sh"),
            arguments:       Vec::new(),
        };

        let result = ActionExecutor::default().execute(&action);
        assert!(!result.succeeded);
        assert!(!result.combined_output.is_empty());
    }

    #[test]
    fn spawn_failure_becomes_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let action = ResolvedAction {
            executable_path: dir.path().join("absent.sh"),
            arguments:       Vec::new(),
        };

        let result = ActionExecutor::direct().execute(&action);
        assert!(!result.succeeded);
        assert!(result.combined_output.contains("absent.sh"), "{}", result.combined_output);
    }

    #[test]
    fn empty_shell_means_direct_execution() {
        let executor = ActionExecutor::with_shell("");
        assert!(executor.shell.is_none());
    }

    #[test]
    fn invalid_utf8_output_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let action = script(dir.path(), "bytes.sh", "printf 'ok\\377\\n'\n");

        let result = ActionExecutor::default().execute(&action);
        assert!(result.succeeded);
        assert_eq!(result.combined_output, "ok\u{FFFD}\n");
    }
}
