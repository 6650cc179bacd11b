// Slack app credentials

use slackline_core::error::{BotError, Result};

use crate::client::DEFAULT_API_BASE_URL;

/// Credentials and endpoints for one Slack app installation
#[derive(Clone)]
pub struct SlackSettings {
    /// Bot token (`xoxb-...`)
    pub bot_token: String,
    /// Signing secret used to verify Events API requests
    pub signing_secret: String,
    pub api_base_url: String,
    /// The bot's user id, when known ahead of `auth.test`
    pub bot_user_id: Option<String>,
}

impl SlackSettings {
    /// Load from environment variables:
    /// - `SLACK_BOT_TOKEN` (required)
    /// - `SLACK_SIGNING_SECRET` (required)
    /// - `SLACK_API_BASE_URL` (default: https://slack.com/api)
    /// - `SLACK_BOT_USER_ID`
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bot_token: required("SLACK_BOT_TOKEN")?,
            signing_secret: required("SLACK_SIGNING_SECRET")?,
            api_base_url: optional("SLACK_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            bot_user_id: optional("SLACK_BOT_USER_ID"),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(key: &str) -> Result<String> {
    optional(key).ok_or_else(|| BotError::config(format!("{} must be set", key)))
}

impl std::fmt::Debug for SlackSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackSettings")
            .field("bot_token", &"[REDACTED]")
            .field("signing_secret", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url)
            .field("bot_user_id", &self.bot_user_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_credentials() {
        let settings = SlackSettings {
            bot_token: "xoxb-secret".to_string(),
            signing_secret: "signing-secret".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            bot_user_id: Some("UBOT".to_string()),
        };
        let debug = format!("{:?}", settings);

        assert!(!debug.contains("xoxb-secret"));
        assert!(!debug.contains("signing-secret"));
        assert!(debug.contains("UBOT"));
    }

    #[test]
    fn test_missing_required_value_is_config_error() {
        assert!(matches!(
            required("SLACKLINE_TEST_UNSET_VARIABLE"),
            Err(BotError::Configuration(_))
        ));
    }
}
