use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::config::CodexConfig;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{debug, warn};

use crate::adapter::{AgentAdapter, AgentReply, AgentRequest, ProgressSink};
use crate::error::AgentError;
use crate::events::{parse_line, CodexEvent, TurnOutput};
use crate::progress::stage_text;

/// Agent adapter that drives the Codex CLI (`codex exec --json`).
///
/// Each turn is one child process. Its stdout is consumed as JSONL events:
/// stage texts go to the request's progress sink, the thread id and final
/// agent message are collected for the reply.
pub struct CodexRunner {
    path: String,
    model: Option<String>,
    timeout: Duration,
}

impl CodexRunner {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            model: None,
            timeout: Duration::from_secs(relay_core::config::DEFAULT_CODEX_TIMEOUT_SECS),
        }
    }

    pub fn from_config(cfg: &CodexConfig) -> Self {
        Self::new(cfg.path.clone())
            .with_model(cfg.model.clone())
            .with_timeout(Duration::from_secs(cfg.timeout_secs))
    }

    /// Blank model names leave the CLI's own default in place.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        let model = model.trim();
        self.model = (!model.is_empty()).then(|| model.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Command-line arguments for one turn, prompt last.
    pub fn args(&self, req: &AgentRequest) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if let Some(thread_id) = &req.thread_id {
            args.push("resume".to_string());
            args.push(thread_id.clone());
        }
        args.extend([
            "--skip-git-repo-check".to_string(),
            "--json".to_string(),
            "--sandbox".to_string(),
            req.sandbox.as_str().to_string(),
            "-C".to_string(),
            req.workspace.clone(),
        ]);
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.push(req.prompt.clone());
        args
    }
}

#[async_trait]
impl AgentAdapter for CodexRunner {
    async fn invoke(&self, req: AgentRequest) -> Result<AgentReply, AgentError> {
        debug!(
            command = %self.path,
            workspace = %req.workspace,
            sandbox = %req.sandbox,
            resume = req.thread_id.is_some(),
            prompt_len = req.prompt.len(),
            "starting codex turn"
        );

        let mut child = tokio::process::Command::new(&self.path)
            .args(self.args(&req))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AgentError::Spawn(format!(
                        "codex CLI not found at '{}'; install it or set codex.path",
                        self.path
                    ))
                } else {
                    AgentError::Spawn(format!("failed to spawn codex CLI: {e}"))
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("codex stdout was not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Spawn("codex stderr was not captured".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).trim().to_string()
        });

        let turn = async {
            let output = read_events(BufReader::new(stdout), req.progress.as_ref()).await?;
            let status = child.wait().await?;
            Ok::<_, AgentError>((output, status))
        };

        let (output, status) = match tokio::time::timeout(self.timeout, turn).await {
            Ok(result) => result?,
            Err(_) => {
                let ms = self.timeout.as_millis() as u64;
                warn!(timeout_ms = ms, "codex turn timed out, killing process");
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(AgentError::Timeout { ms });
            }
        };

        if !status.success() {
            let stderr = stderr_task.await.unwrap_or_default();
            return Err(AgentError::Exit {
                code: status.code().unwrap_or(-1),
                stderr: if stderr.is_empty() {
                    "(no stderr)".to_string()
                } else {
                    stderr
                },
            });
        }

        let thread_id = output.thread_id.ok_or(AgentError::MissingThreadId)?;
        let final_text = output
            .final_text
            .filter(|t| !t.is_empty())
            .ok_or(AgentError::MissingFinalMessage)?;

        debug!(thread_id = %thread_id, reply_len = final_text.len(), "codex turn finished");

        Ok(AgentReply {
            thread_id,
            final_text,
        })
    }
}

/// Consume a JSONL event stream to its end, forwarding stage texts to
/// `progress` as they arrive.
pub async fn read_events<R>(
    reader: R,
    progress: Option<&ProgressSink>,
) -> Result<TurnOutput, AgentError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut output = TurnOutput::default();
    while let Some(line) = lines.next_line().await? {
        let Some(event) = parse_line(&line) else {
            continue;
        };
        if let CodexEvent::TurnFailed { error } = &event {
            warn!(error = ?error, "codex reported a failed turn");
        }
        if let (Some(tx), Some(stage)) = (progress, stage_text(&event)) {
            let _ = tx.send(stage);
        }
        output.observe(&event);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::SandboxMode;
    use tokio::sync::mpsc;

    fn request(thread_id: Option<&str>) -> AgentRequest {
        AgentRequest {
            thread_id: thread_id.map(str::to_string),
            workspace: "/work/repo".into(),
            sandbox: SandboxMode::WorkspaceWrite,
            prompt: "[Feishu DM] ou_1: hi".into(),
            progress: None,
        }
    }

    #[test]
    fn fresh_thread_args() {
        let runner = CodexRunner::new("codex").with_model("  ");
        assert_eq!(
            runner.args(&request(None)),
            vec![
                "exec",
                "--skip-git-repo-check",
                "--json",
                "--sandbox",
                "workspace-write",
                "-C",
                "/work/repo",
                "[Feishu DM] ou_1: hi",
            ]
        );
    }

    #[test]
    fn resume_args_with_model() {
        let runner = CodexRunner::new("codex").with_model(" o4 ");
        let args = runner.args(&request(Some("t-42")));
        assert_eq!(&args[..3], &["exec", "resume", "t-42"]);
        let model_at = args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(args[model_at + 1], "o4");
        assert_eq!(args.last().map(String::as_str), Some("[Feishu DM] ou_1: hi"));
    }

    #[tokio::test]
    async fn read_events_collects_output_and_stages() {
        let jsonl = concat!(
            "{\"type\":\"thread.started\",\"thread_id\":\"t-1\"}\n",
            "garbage line\n",
            "{\"type\":\"turn.started\"}\n",
            "{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"done\"}}\n",
            "{\"type\":\"turn.completed\"}\n",
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let out = read_events(jsonl.as_bytes(), Some(&tx)).await.unwrap();
        drop(tx);

        assert_eq!(out.thread_id.as_deref(), Some("t-1"));
        assert_eq!(out.final_text.as_deref(), Some("done"));

        let mut stages = Vec::new();
        while let Some(stage) = rx.recv().await {
            stages.push(stage);
        }
        assert_eq!(
            stages,
            vec![
                "Session established",
                "Analyzing request",
                "Response draft ready",
                "Finalizing output",
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let runner = CodexRunner::new("/nonexistent/codex-binary-for-tests");
        let err = runner.invoke(request(None)).await.unwrap_err();
        assert!(matches!(err, AgentError::Spawn(ref m) if m.contains("not found")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        // `false` ignores its arguments and exits 1 without output.
        let runner = CodexRunner::new("false");
        match runner.invoke(request(None)).await {
            Err(AgentError::Exit { code, stderr }) => {
                assert_eq!(code, 1);
                assert_eq!(stderr, "(no stderr)");
            }
            other => panic!("expected exit error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_exit_without_events_is_missing_thread() {
        // `true` exits 0 and prints nothing.
        let runner = CodexRunner::new("true");
        let err = runner.invoke(request(None)).await.unwrap_err();
        assert!(matches!(err, AgentError::MissingThreadId));
    }
}
