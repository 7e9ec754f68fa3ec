use thiserror::Error;

/// Failures of a single agent invocation.
///
/// Every variant is transient from the pipeline's point of view: the message
/// stays unprocessed so it can be redelivered.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent binary could not be started.
    #[error("failed to spawn agent: {0}")]
    Spawn(String),

    /// The turn exceeded its hard timeout and the process was killed.
    #[error("agent timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The process exited unsuccessfully. `stderr` is trimmed; it reads
    /// `(no stderr)` when the process printed nothing.
    #[error("agent exited with code {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    /// The event stream never reported a thread id.
    #[error("agent output missing thread_id")]
    MissingThreadId,

    /// The event stream never produced a final agent message.
    #[error("agent output missing final agent message")]
    MissingFinalMessage,

    #[error("agent I/O error: {0}")]
    Io(#[from] std::io::Error),
}
