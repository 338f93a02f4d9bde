use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Commands permitted for sandboxed deployment operations.
const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "git", "composer", "npm", "npx", "yarn", "pnpm", "php", "pm2", "node", "python", "python3",
    "pip", "pip3", "bundle", "rake", "rails", "artisan", "make", "cargo", "go", "docker", "rsync",
    "cp", "mv", "ln", "chmod", "chown",
];

/// Characters that enable shell injection when they reach a shell. Commands
/// are never run through a shell here, but arguments are rejected anyway so a
/// hostile value cannot survive into operator tooling that might re-quote it.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '|', '&', '$', '`', '\n', '>', '<', '(', ')', '{', '}', '*', '?', '[', ']', '\\', '\'',
    '"',
];

/// Output captured per command, stdout and stderr combined (1 MiB cap).
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,
    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),
    #[error("argument {index} contains shell metacharacters: {arg}")]
    ShellMetacharacter { index: usize, arg: String },
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("command '{command}' exited with code {code}")]
    NonZeroExit {
        command: String,
        code: i32,
        output: String,
    },
    #[error("command '{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Result of running a subprocess to completion.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: i32,
    /// Combined stdout and stderr.
    pub output: String,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes subprocesses without a shell, restricted to an allowlist and
/// with shell metacharacters rejected in every argument.
#[derive(Debug, Clone)]
pub struct SandboxedExecutor {
    allowed_commands: HashSet<String>,
    work_dir: PathBuf,
}

impl SandboxedExecutor {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            allowed_commands: DEFAULT_ALLOWED_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            work_dir: work_dir.into(),
        }
    }

    pub fn add_allowed_command(&mut self, command: &str) {
        self.allowed_commands.insert(command.to_string());
    }

    pub fn remove_allowed_command(&mut self, command: &str) {
        self.allowed_commands.remove(command);
    }

    pub fn is_command_allowed(&self, command: &str) -> bool {
        self.allowed_commands.contains(command)
    }

    /// Pre-flight validation without execution: allowlist plus the
    /// metacharacter check on every argument.
    pub fn validate_command(&self, argv: &[String]) -> Result<(), ExecError> {
        let base = argv.first().ok_or(ExecError::EmptyCommand)?;

        if !self.allowed_commands.contains(base) {
            return Err(ExecError::CommandNotAllowed(base.clone()));
        }

        for (i, arg) in argv.iter().enumerate().skip(1) {
            if contains_shell_metachars(arg) {
                return Err(ExecError::ShellMetacharacter {
                    index: i,
                    arg: arg.clone(),
                });
            }
        }

        Ok(())
    }

    /// Validates and runs `argv` in the executor's working directory,
    /// killing the child when `timeout` expires.
    pub async fn execute(
        &self,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecError> {
        self.validate_command(argv)?;
        run_command(argv, &self.work_dir, timeout).await
    }
}

/// Runs `argv` without allowlist restrictions. Used for hook commands from
/// validated configuration; operators may name their own tooling there.
/// Never goes through a shell.
pub async fn run_command(
    argv: &[String],
    work_dir: &Path,
    timeout: Duration,
) -> Result<ExecutionResult, ExecError> {
    let base = argv.first().ok_or(ExecError::EmptyCommand)?;
    let display = format_command(argv);

    let mut cmd = Command::new(base);
    cmd.args(&argv[1..])
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        command: display.clone(),
        source,
    })?;

    // Read both streams in their own tasks so `child.wait()` can run
    // concurrently without deadlocking on full pipe buffers.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = tokio::spawn(async move { read_stream(stdout).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr).await });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(source)) => {
            return Err(ExecError::Spawn {
                command: display,
                source,
            });
        }
        // Dropping the child kills it via kill_on_drop.
        Err(_) => {
            return Err(ExecError::Timeout {
                command: display,
                timeout,
            });
        }
    };

    let mut output = stdout_task.await.unwrap_or_default();
    output.extend(stderr_task.await.unwrap_or_default());

    Ok(ExecutionResult {
        exit_code: status.code().unwrap_or(-1),
        output: String::from_utf8_lossy(&output).into_owned(),
        duration: start.elapsed(),
    })
}

async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

/// Formats argv into a readable command line for logs and error messages.
pub fn format_command(argv: &[String]) -> String {
    if argv.is_empty() {
        return "<empty command>".to_string();
    }
    argv.iter()
        .map(|part| {
            if part.contains([' ', '\t', '\n', '"', '\'']) {
                format!("'{}'", part.replace('\'', "'\\''"))
            } else {
                part.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replaces every occurrence of the given secrets in subprocess output so it
/// can be logged safely.
pub fn redact_secrets(output: &str, secrets: &[&str]) -> String {
    let mut sanitized = output.to_string();
    for secret in secrets {
        if !secret.is_empty() {
            sanitized = sanitized.replace(secret, "***REDACTED***");
        }
    }
    sanitized
}

fn contains_shell_metachars(s: &str) -> bool {
    s.contains(SHELL_METACHARACTERS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn rejects_empty_command() {
        let exec = SandboxedExecutor::new(".");
        let err = exec.execute(&[], Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ExecError::EmptyCommand));
    }

    #[tokio::test]
    async fn rejects_command_outside_allowlist() {
        let exec = SandboxedExecutor::new(".");
        let err = exec
            .execute(&argv(&["bash", "-c", "id"]), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::CommandNotAllowed(cmd) if cmd == "bash"));
    }

    #[tokio::test]
    async fn rejects_shell_metacharacters_in_arguments() {
        let exec = SandboxedExecutor::new(".");
        for bad in [";", "a|b", "x&&y", "$(id)", "`id`", "a>b", "glob*"] {
            let err = exec
                .execute(&argv(&["git", bad]), Duration::from_secs(5))
                .await
                .unwrap_err();
            assert!(
                matches!(err, ExecError::ShellMetacharacter { .. }),
                "expected metacharacter rejection for {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn plain_alphanumeric_argument_passes_validation() {
        let exec = SandboxedExecutor::new(".");
        exec.validate_command(&argv(&["git", "status"])).unwrap();
        exec.validate_command(&argv(&["git", "pull", "origin", "main"]))
            .unwrap();
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let exec = SandboxedExecutor::new(".");
        let result = exec
            .execute(&argv(&["git", "--version"]), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("git version"));
    }

    #[tokio::test]
    async fn reports_nonzero_exit_codes() {
        // `cp` with no operands fails with a usage error.
        let exec = SandboxedExecutor::new(".");
        let result = exec
            .execute(&argv(&["cp"]), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!result.ok());
    }

    #[tokio::test]
    async fn kills_command_on_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run_command(
            &argv(&["sleep", "30"]),
            tmp.path(),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[tokio::test]
    async fn spawn_error_for_missing_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run_command(
            &argv(&["definitely-not-a-real-binary-3729"]),
            tmp.path(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[test]
    fn allowlist_is_mutable() {
        let mut exec = SandboxedExecutor::new(".");
        assert!(!exec.is_command_allowed("terraform"));
        exec.add_allowed_command("terraform");
        assert!(exec.is_command_allowed("terraform"));
        exec.remove_allowed_command("terraform");
        assert!(!exec.is_command_allowed("terraform"));
    }

    #[test]
    fn formats_commands_for_logging() {
        assert_eq!(
            format_command(&argv(&["git", "commit", "-m", "my message"])),
            "git commit -m 'my message'"
        );
        assert_eq!(format_command(&[]), "<empty command>");
    }

    #[test]
    fn redacts_secrets_from_output() {
        let out = "pushing with token hunter2-hunter2";
        assert_eq!(
            redact_secrets(out, &["hunter2-hunter2"]),
            "pushing with token ***REDACTED***"
        );
    }
}
