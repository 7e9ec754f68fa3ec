pub mod api;
pub mod domain;
pub mod error;
pub mod parse;
pub mod send;
pub mod types;
pub mod webhook;

pub use api::FeishuApi;
pub use domain::resolve_base_url;
pub use error::FeishuError;
pub use parse::parse_message_event;
pub use send::FeishuSender;
pub use types::{CallbackEnvelope, MessageEvent};
pub use webhook::WebhookTransport;
