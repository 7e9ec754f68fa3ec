use async_trait::async_trait;
use relay_core::SandboxMode;
use tokio::sync::mpsc;

use crate::error::AgentError;

/// Receives stage texts while a turn is running. Send failures are ignored.
pub type ProgressSink = mpsc::UnboundedSender<String>;

/// One agent turn.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Thread to resume; `None` starts a fresh thread.
    pub thread_id: Option<String>,
    pub workspace: String,
    pub sandbox: SandboxMode,
    pub prompt: String,
    pub progress: Option<ProgressSink>,
}

impl AgentRequest {
    pub(crate) fn report(&self, stage: impl Into<String>) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(stage.into());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub thread_id: String,
    pub final_text: String,
}

/// Runs one turn of an external agent.
///
/// Implementations must fail distinctly on timeout, non-zero exit, and
/// output that lacks a thread id or a final message.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    async fn invoke(&self, req: AgentRequest) -> Result<AgentReply, AgentError>;
}

/// Echoes the prompt back without starting a process.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunAgent;

#[async_trait]
impl AgentAdapter for DryRunAgent {
    async fn invoke(&self, req: AgentRequest) -> Result<AgentReply, AgentError> {
        req.report("DRY-RUN: codex execution skipped");
        Ok(AgentReply {
            thread_id: req
                .thread_id
                .clone()
                .unwrap_or_else(|| "dry_run_thread".to_string()),
            final_text: format!("DRY-RUN (no codex executed)\n\n```\n{}\n```", req.prompt),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(thread_id: Option<&str>, progress: Option<ProgressSink>) -> AgentRequest {
        AgentRequest {
            thread_id: thread_id.map(str::to_string),
            workspace: "/tmp".into(),
            sandbox: SandboxMode::ReadOnly,
            prompt: "[Feishu DM] ou_1: hi".into(),
            progress,
        }
    }

    #[tokio::test]
    async fn dry_run_fences_prompt() {
        let reply = DryRunAgent.invoke(request(None, None)).await.unwrap();
        assert_eq!(reply.thread_id, "dry_run_thread");
        assert!(reply.final_text.contains("```\n[Feishu DM] ou_1: hi\n```"));
    }

    #[tokio::test]
    async fn dry_run_keeps_thread_and_reports_progress() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reply = DryRunAgent
            .invoke(request(Some("t-1"), Some(tx)))
            .await
            .unwrap();
        assert_eq!(reply.thread_id, "t-1");
        assert_eq!(
            rx.recv().await.as_deref(),
            Some("DRY-RUN: codex execution skipped")
        );
    }
}
