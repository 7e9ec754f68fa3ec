pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod policy;
pub mod queue;
pub mod render;
pub mod workspace;

pub use dispatcher::InboundDispatcher;
pub use error::PipelineError;
pub use handle::{handle_inbound, Outcome, PipelineDeps};
pub use policy::{evaluate, AccessDecision, DenyReason};
pub use queue::{QueueError, SerialQueue};
pub use render::{render, should_use_card, RenderedReply};
