pub mod adapter;
pub mod error;
pub mod events;
pub mod metadata;
pub mod progress;
pub mod prompt;
pub mod runner;

pub use adapter::{AgentAdapter, AgentReply, AgentRequest, DryRunAgent, ProgressSink};
pub use error::AgentError;
pub use metadata::{CodexAppIndex, ThreadMetadataSync};
pub use runner::CodexRunner;
