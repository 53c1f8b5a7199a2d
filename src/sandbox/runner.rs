//! Out-of-process candidate execution
//!
//! Every run gets its own child process started from a fresh temporary
//! directory:
//!
//! - environment cleared apart from a fixed `PATH`
//! - new session, so the child leads its own process group
//! - rlimits on address space, CPU seconds, open files and file size, and
//!   core dumps disabled
//! - stdin carries the test input, stdout and stderr are read up to a cap
//!
//! Once the run ends, by exit or by timeout, the whole process group is sent
//! SIGKILL. `kill_on_drop` covers any path where the child handle is dropped
//! early.

use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::SandboxConfig;

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const CANDIDATE_FILE: &str = "candidate";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("No interpreter configured")]
    EmptyInterpreter,

    #[error("Failed to prepare sandbox: {0}")]
    Setup(#[source] io::Error),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to collect child output: {0}")]
    Wait(#[source] io::Error),
}

/// Resource caps applied in the child before exec.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub address_space_bytes: u64,
    pub cpu_seconds: u64,
    pub open_files: u64,
    pub file_size_bytes: u64,
}

/// What came back from one execution.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: f64,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout as JSON, or the trimmed text when it is not JSON.
    pub fn parsed_stdout(&self) -> Value {
        let trimmed = self.stdout.trim();
        serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
    }
}

pub struct SandboxRunner {
    interpreter: Vec<String>,
    memory_limit_mb: u64,
    max_open_files: u64,
    max_file_size_kb: u64,
    max_output_bytes: usize,
}

impl SandboxRunner {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            memory_limit_mb: config.memory_limit_mb,
            max_open_files: config.max_open_files,
            max_file_size_kb: config.max_file_size_kb,
            max_output_bytes: config.max_output_bytes,
        }
    }

    fn limits(&self, timeout: Duration) -> RunLimits {
        RunLimits {
            address_space_bytes: self.memory_limit_mb.saturating_mul(1024 * 1024),
            // wall clock is the real bound; this only stops a child that
            // escaped its process group from spinning forever
            cpu_seconds: timeout.as_secs() + 1,
            open_files: self.max_open_files,
            file_size_bytes: self.max_file_size_kb.saturating_mul(1024),
        }
    }

    /// Run `source` once with `input` on stdin, bounded by `timeout`.
    pub async fn run(
        &self,
        source: &str,
        input: &Value,
        timeout: Duration,
    ) -> Result<RunOutput, SandboxError> {
        let (program, args) = self
            .interpreter
            .split_first()
            .ok_or(SandboxError::EmptyInterpreter)?;

        let workdir = tempfile::tempdir().map_err(SandboxError::Setup)?;
        let script = workdir.path().join(CANDIDATE_FILE);
        tokio::fs::write(&script, source)
            .await
            .map_err(SandboxError::Setup)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&script)
            .current_dir(workdir.path())
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limits = self.limits(timeout);
        // SAFETY: the closure runs between fork and exec and only calls
        // async-signal-safe functions (setsid, setrlimit).
        #[allow(unsafe_code)]
        unsafe {
            cmd.pre_exec(move || confine(limits));
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        let stdin_bytes = stdin_payload(input);
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.max_output_bytes;

        let feed = async move {
            if let Some(mut pipe) = stdin {
                // a child that exits without reading closes the pipe
                let _ = pipe.write_all(&stdin_bytes).await;
            }
        };
        let execution = async {
            let (_, out, err, status) = tokio::join!(
                feed,
                read_capped(stdout, cap),
                read_capped(stderr, cap),
                child.wait()
            );
            (out, err, status)
        };

        let outcome = tokio::time::timeout(timeout, execution).await;
        match outcome {
            Ok((out, err, status)) => {
                // the group outlives its leader when something was left
                // running in the background
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                let status = status.map_err(SandboxError::Wait)?;
                Ok(RunOutput {
                    stdout: out,
                    stderr: err,
                    exit_code: status.code(),
                    timed_out: false,
                    duration_ms: elapsed_ms(started),
                })
            }
            Err(_) => {
                let duration_ms = elapsed_ms(started);
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Child already reaped after timeout");
                }
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Sandboxed run exceeded its timeout, process group killed"
                );
                Ok(RunOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                    timed_out: true,
                    duration_ms,
                })
            }
        }
    }
}

/// Strings go to stdin as a text line; any other value is written as JSON.
fn stdin_payload(input: &Value) -> Vec<u8> {
    match input {
        Value::Null => Vec::new(),
        Value::String(s) => {
            let mut bytes = s.clone().into_bytes();
            if !s.ends_with('\n') {
                bytes.push(b'\n');
            }
            bytes
        }
        other => {
            let mut bytes = other.to_string().into_bytes();
            bytes.push(b'\n');
            bytes
        }
    }
}

async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<R>, cap: usize) -> String {
    let Some(pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let mut limited = pipe.take(cap as u64);
    if let Err(e) = limited.read_to_end(&mut buf).await {
        debug!(error = %e, "Reading child output failed");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Resource = libc::c_int;

#[allow(unsafe_code)]
fn set_limit(resource: Resource, value: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    // SAFETY: plain syscall on a stack value.
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[allow(unsafe_code)]
fn confine(limits: RunLimits) -> io::Result<()> {
    // SAFETY: setsid has no preconditions in a freshly forked child.
    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }
    set_limit(libc::RLIMIT_AS, limits.address_space_bytes)?;
    set_limit(libc::RLIMIT_CPU, limits.cpu_seconds)?;
    set_limit(libc::RLIMIT_NOFILE, limits.open_files)?;
    set_limit(libc::RLIMIT_FSIZE, limits.file_size_bytes)?;
    set_limit(libc::RLIMIT_CORE, 0)?;
    Ok(())
}

#[allow(unsafe_code)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: signalling our own child's process group. The group id stays
    // reserved while any member is alive; an empty group is reported as
    // ESRCH and ignored.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn runner() -> SandboxRunner {
        SandboxRunner::new(&SandboxConfig::default())
    }

    #[test]
    fn test_stdin_payload() {
        assert_eq!(stdin_payload(&json!("abc")), b"abc\n");
        assert_eq!(stdin_payload(&json!({"a": 1})), b"{\"a\":1}\n");
        assert_eq!(stdin_payload(&Value::Null), b"");
    }

    #[test]
    fn test_parsed_stdout_falls_back_to_text() {
        let mut out = RunOutput {
            stdout: " 42\n".into(),
            stderr: String::new(),
            exit_code: Some(0),
            timed_out: false,
            duration_ms: 1.0,
        };
        assert_eq!(out.parsed_stdout(), json!(42));
        out.stdout = "hello world\n".into();
        assert_eq!(out.parsed_stdout(), json!("hello world"));
    }

    #[tokio::test]
    async fn test_runs_script_with_input() {
        let out = runner()
            .run("read x\necho $((x * 2))\n", &json!(21), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success(), "{out:?}");
        assert_eq!(out.parsed_stdout(), json!(42));
    }

    #[tokio::test]
    async fn test_timeout_kills_runaway_child() {
        let started = Instant::now();
        let out = runner()
            .run("while true; do :; done\n", &Value::Null, Duration::from_millis(300))
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let mut config = SandboxConfig::default();
        config.max_output_bytes = 16;
        let out = SandboxRunner::new(&config)
            .run(
                "i=0\nwhile [ $i -lt 100 ]; do echo line$i; i=$((i+1)); done\n",
                &Value::Null,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(out.stdout.len() <= 16);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_error() {
        let mut config = SandboxConfig::default();
        config.interpreter = vec!["/nonexistent/interpreter".into()];
        let err = SandboxRunner::new(&config)
            .run("true", &Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }
}
