use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use crate::config::{Config, SpawnStrategy};
use crate::relay::LineBuffer;

/// Retry interval when polling the temp-file output of a detached agent.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Environment passed to the agent process. Everything else from the host
/// environment is withheld.
const ALLOWED_ENV: [&str; 5] = ["HOME", "PATH", "USER", "LANG", "TERM"];

/// Fixed argument vector for one agent run: streaming JSON output, a turn
/// limit, a model, and a throwaway session ID so nothing persists across
/// requests. The trailing `-` makes the CLI read the prompt from stdin,
/// which keeps arbitrary prompt text out of the argument list entirely.
pub fn build_args(config: &Config, session_id: &str) -> Vec<String> {
    vec![
        "--print".to_string(),
        "--verbose".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--max-turns".to_string(),
        config.max_turns.to_string(),
        "--model".to_string(),
        config.model.clone(),
        "--session-id".to_string(),
        session_id.to_string(),
        "--dangerously-skip-permissions".to_string(),
        "-".to_string(),
    ]
}

enum Source {
    Pipe(ChildStdout),
    TempFile(tokio::fs::File),
}

/// A running agent subprocess plus its output source. Yields upstream lines
/// one at a time; dropping it mid-stream terminates the process and releases
/// the temp file (client-disconnect cancellation).
pub struct AgentProcess {
    child: Option<Child>,
    source: Source,
    line_buf: LineBuffer,
    pending: VecDeque<String>,
    done: bool,
    detached: bool,
    _temp: Option<NamedTempFile>,
}

impl AgentProcess {
    /// Spawn the agent for one prompt using the configured strategy.
    pub fn spawn(bin: &Path, config: &Config, prompt: &str) -> Result<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let args = build_args(config, &session_id);

        let mut cmd = Command::new(bin);
        cmd.args(&args)
            .current_dir(&config.project_dir)
            .env_clear()
            .stdin(Stdio::piped())
            .stderr(Stdio::piped());
        for key in ALLOWED_ENV {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }

        tracing::info!(
            bin = %bin.display(),
            session_id,
            strategy = config.spawn_strategy.as_str(),
            "spawning agent process"
        );

        match config.spawn_strategy {
            SpawnStrategy::Pipe => {
                cmd.stdout(Stdio::piped());
                let mut child = cmd.spawn().context("failed to spawn agent process")?;
                feed_stdin(&mut child, prompt)?;
                log_stderr(&mut child);
                Self::from_pipe(child)
            }
            SpawnStrategy::TempFile => {
                let temp = NamedTempFile::new().context("failed to create agent output file")?;
                let writer = temp.reopen().context("failed to reopen agent output file")?;
                cmd.stdout(Stdio::from(writer));
                // Own process group so cancellation can signal the whole tree.
                #[cfg(unix)]
                cmd.process_group(0);
                let mut child = cmd.spawn().context("failed to spawn agent process")?;
                feed_stdin(&mut child, prompt)?;
                log_stderr(&mut child);
                Self::from_temp_file(child, temp)
            }
        }
    }

    fn from_pipe(mut child: Child) -> Result<Self> {
        let stdout = child.stdout.take().context("agent stdout not piped")?;
        Ok(Self {
            child: Some(child),
            source: Source::Pipe(stdout),
            line_buf: LineBuffer::new(),
            pending: VecDeque::new(),
            done: false,
            detached: false,
            _temp: None,
        })
    }

    fn from_temp_file(child: Child, temp: NamedTempFile) -> Result<Self> {
        let reader = temp.reopen().context("failed to reopen agent output file")?;
        Ok(Self {
            child: Some(child),
            source: Source::TempFile(tokio::fs::File::from_std(reader)),
            line_buf: LineBuffer::new(),
            pending: VecDeque::new(),
            done: false,
            detached: true,
            _temp: Some(temp),
        })
    }

    /// Next complete upstream line, in source order. Returns the trailing
    /// partial line (if any) once the source closes, then `None`.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let mut chunk = [0u8; 8192];

        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            if self.done {
                return Ok(None);
            }

            // Sample liveness before reading: the process cannot append
            // after a check that already saw it dead.
            let exited = self.check_exited()?;

            match &mut self.source {
                Source::Pipe(stdout) => {
                    let n = stdout.read(&mut chunk).await?;
                    if n == 0 {
                        self.finish().await;
                        continue;
                    }
                    self.pending.extend(self.line_buf.push(&chunk[..n]));
                }
                Source::TempFile(file) => {
                    let n = file.read(&mut chunk).await?;
                    if n == 0 {
                        if exited {
                            self.finish().await;
                        } else {
                            tokio::time::sleep(POLL_INTERVAL).await;
                        }
                        continue;
                    }
                    self.pending.extend(self.line_buf.push(&chunk[..n]));
                }
            }
        }
    }

    fn check_exited(&mut self) -> std::io::Result<bool> {
        match &mut self.child {
            Some(child) => match child.try_wait()? {
                Some(status) => {
                    tracing::debug!(%status, "agent process exited");
                    self.child = None;
                    Ok(true)
                }
                None => Ok(false),
            },
            None => Ok(true),
        }
    }

    async fn finish(&mut self) {
        if let Some(line) = self.line_buf.flush() {
            self.pending.push_back(line);
        }
        self.done = true;
        if let Some(mut child) = self.child.take() {
            match child.wait().await {
                Ok(status) => tracing::debug!(%status, "agent process exited"),
                Err(e) => tracing::warn!(error = %e, "failed to reap agent process"),
            }
        }
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                tracing::debug!(pid, "terminating agent process on stream drop");
                terminate(pid, self.detached);
            } else {
                let _ = child.start_kill();
            }
        }
    }
}

/// SIGTERM the process, or its whole group for the detached temp-file
/// variant. No escalation to SIGKILL.
fn terminate(pid: u32, group: bool) {
    #[cfg(unix)]
    {
        let target = if group {
            format!("-{pid}")
        } else {
            pid.to_string()
        };
        let _ = std::process::Command::new("kill")
            .args(["-TERM", &target])
            .spawn();
    }
    #[cfg(not(unix))]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .spawn();
    }
}

fn feed_stdin(child: &mut Child, prompt: &str) -> Result<()> {
    let mut stdin = child.stdin.take().context("agent stdin not piped")?;
    let bytes = prompt.as_bytes().to_vec();
    // Write in the background so a large prompt never blocks the relay;
    // dropping stdin afterwards signals EOF to the CLI.
    tokio::spawn(async move {
        if let Err(e) = stdin.write_all(&bytes).await {
            tracing::error!(error = %e, "failed to write prompt to agent stdin");
        }
    });
    Ok(())
}

fn log_stderr(child: &mut Child) {
    let Some(stderr) = child.stderr.take() else {
        return;
    };
    tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.is_empty() {
                tracing::debug!(source = "agent-stderr", "{}", line);
            }
        }
    });
}
