use thiserror::Error;

use relay_channels::ChannelError;

#[derive(Debug, Error)]
pub enum FeishuError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform answered with a non-zero `code`.
    #[error("Feishu API error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("feishu.app_id and feishu.app_secret are required")]
    MissingCredentials,

    #[error("unexpected response: {0}")]
    Parse(String),
}

impl From<FeishuError> for ChannelError {
    fn from(e: FeishuError) -> Self {
        match e {
            FeishuError::MissingCredentials => ChannelError::ConfigError(e.to_string()),
            FeishuError::Api { code, .. } if is_auth_code(code) => {
                ChannelError::AuthFailed(e.to_string())
            }
            other => ChannelError::SendFailed(other.to_string()),
        }
    }
}

/// Tenant-token and app-credential rejections.
fn is_auth_code(code: i64) -> bool {
    matches!(code, 99991661..=99991672 | 10003 | 10014)
}
