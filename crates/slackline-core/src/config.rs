// Bot configuration
//
// BotConfig is an explicit configuration struct passed into the context
// assembler, dedup coordinator and orchestrator. It can be:
// - Created directly (tests, embedding)
// - Loaded from environment variables via `from_env`

use std::time::Duration;

use crate::event::BotIdentity;
use crate::llm::{LlmCallConfig, LlmProviderKind};
use crate::retry::RetryPolicy;

/// Default number of thread messages requested from the platform
pub const DEFAULT_MAX_THREAD_FETCH: usize = 200;

/// Default lifetime of a dedup claim
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(300);

/// Shortest dedup claim lifetime; a zero TTL would expire claims on write
pub const MIN_DEDUP_TTL: Duration = Duration::from_secs(1);

/// Configuration for event handling
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// System instructions prepended to every context window
    pub system_instructions: String,

    /// Maximum thread-history entries in the context (negative = unlimited)
    pub max_history_messages: i64,

    /// Maximum number of thread messages retrieved from the platform
    pub max_thread_fetch: usize,

    /// Whether messages from third-party bots are kept as context
    pub include_other_bots: bool,

    /// Whether the bot's own prior replies survive the other-bot filter
    pub retain_own_messages: bool,

    /// Answer plain top-level messages that do not mention the bot
    pub respond_to_all_messages: bool,

    /// Answer top-level messages in a new thread instead of the channel
    pub reply_in_thread: bool,

    /// The bot's own identity on the platform
    pub identity: BotIdentity,

    /// Lifetime of a dedup claim
    pub dedup_ttl: Duration,

    /// Prefix for dedup keys in the shared store
    pub dedup_key_prefix: String,

    /// Bound on each history fetch call
    pub fetch_timeout: Duration,

    /// Retry policy for transient history fetch failures
    pub fetch_retry: RetryPolicy,

    /// Bound on the LLM call
    pub llm_timeout: Duration,

    /// LLM connection and sampling parameters
    pub llm: LlmSettings,

    /// Visual feedback in the conversation
    pub feedback: FeedbackConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            system_instructions: String::new(),
            max_history_messages: -1,
            max_thread_fetch: DEFAULT_MAX_THREAD_FETCH,
            include_other_bots: false,
            retain_own_messages: true,
            respond_to_all_messages: false,
            reply_in_thread: false,
            identity: BotIdentity::default(),
            dedup_ttl: DEFAULT_DEDUP_TTL,
            dedup_key_prefix: "slackline:event".to_string(),
            fetch_timeout: Duration::from_secs(10),
            fetch_retry: RetryPolicy::exponential(),
            llm_timeout: Duration::from_secs(60),
            llm: LlmSettings::default(),
            feedback: FeedbackConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `SYSTEM_INSTRUCTIONS`: Inline system instructions
    /// - `MAX_HISTORY_MESSAGES`: Thread-history budget, negative for unlimited (default: -1)
    /// - `MAX_THREAD_FETCH`: Thread messages to retrieve (default: 200)
    /// - `INCLUDE_OTHER_BOTS`: Keep third-party bot messages (default: false)
    /// - `RETAIN_OWN_MESSAGES`: Keep the bot's own replies (default: true)
    /// - `RESPOND_TO_ALL_MESSAGES`: Answer un-addressed top-level messages (default: false)
    /// - `REPLY_IN_THREAD`: Answer top-level messages in a new thread (default: false)
    /// - `SLACK_BOT_USER_ID`, `SLACK_BOT_ID`: The bot's own identity
    /// - `DEDUP_TTL_SECS`: Claim lifetime (default: 300)
    /// - `FETCH_TIMEOUT_SECS`, `FETCH_MAX_ATTEMPTS`: History fetch bounds (default: 10, 3)
    /// - `LLM_TIMEOUT_SECS`: LLM call bound (default: 60)
    /// - `IN_PROGRESS_REACTION`, `FAILURE_REACTION`, `FAILURE_MESSAGE`: Feedback
    ///
    /// System instructions from a file are loaded separately, see
    /// [`crate::resources::load_system_instructions`].
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let fetch_retry = RetryPolicy::exponential().with_max_attempts(env_parse(
            "FETCH_MAX_ATTEMPTS",
            defaults.fetch_retry.max_attempts,
        ));

        Self {
            system_instructions: std::env::var("SYSTEM_INSTRUCTIONS").unwrap_or_default(),
            max_history_messages: env_parse("MAX_HISTORY_MESSAGES", defaults.max_history_messages),
            max_thread_fetch: env_parse("MAX_THREAD_FETCH", defaults.max_thread_fetch),
            include_other_bots: env_flag("INCLUDE_OTHER_BOTS", defaults.include_other_bots),
            retain_own_messages: env_flag("RETAIN_OWN_MESSAGES", defaults.retain_own_messages),
            respond_to_all_messages: env_flag(
                "RESPOND_TO_ALL_MESSAGES",
                defaults.respond_to_all_messages,
            ),
            reply_in_thread: env_flag("REPLY_IN_THREAD", defaults.reply_in_thread),
            identity: BotIdentity::new(
                env_non_empty("SLACK_BOT_USER_ID"),
                env_non_empty("SLACK_BOT_ID"),
            ),
            dedup_ttl: Duration::from_secs(env_parse(
                "DEDUP_TTL_SECS",
                defaults.dedup_ttl.as_secs(),
            ))
            .max(MIN_DEDUP_TTL),
            dedup_key_prefix: std::env::var("DEDUP_KEY_PREFIX")
                .unwrap_or(defaults.dedup_key_prefix),
            fetch_timeout: Duration::from_secs(env_parse(
                "FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout.as_secs(),
            )),
            fetch_retry,
            llm_timeout: Duration::from_secs(env_parse(
                "LLM_TIMEOUT_SECS",
                defaults.llm_timeout.as_secs(),
            )),
            llm: LlmSettings::from_env(),
            feedback: FeedbackConfig::from_env(),
        }
    }

    /// Set the system instructions
    pub fn with_system_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.system_instructions = instructions.into();
        self
    }

    /// Set the thread-history budget (negative = unlimited)
    pub fn with_max_history_messages(mut self, max: i64) -> Self {
        self.max_history_messages = max;
        self
    }

    /// Set whether third-party bot messages are kept
    pub fn with_include_other_bots(mut self, include: bool) -> Self {
        self.include_other_bots = include;
        self
    }

    /// Set the bot identity
    pub fn with_identity(mut self, identity: BotIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Set the fetch retry policy
    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    /// Set the visual feedback configuration
    pub fn with_feedback(mut self, feedback: FeedbackConfig) -> Self {
        self.feedback = feedback;
        self
    }
}

/// LLM connection parameters
#[derive(Clone)]
pub struct LlmSettings {
    /// Provider kind
    pub provider: LlmProviderKind,
    /// Model name (e.g., "gpt-4o-mini")
    pub name: String,
    /// Azure deployment name
    pub deploy_name: Option<String>,
    /// Base URL (OpenAI-compatible) or Azure resource endpoint
    pub endpoint: Option<String>,
    /// API key
    pub api_key: Option<String>,
    /// Azure API version
    pub api_version: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::OpenAI,
            name: "gpt-4o-mini".to_string(),
            deploy_name: None,
            endpoint: None,
            api_key: None,
            api_version: None,
            temperature: Some(0.7),
            max_tokens: None,
        }
    }
}

impl LlmSettings {
    /// Load LLM settings from `LLM_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let provider = match std::env::var("LLM_PROVIDER") {
            Ok(raw) => LlmProviderKind::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(provider = %raw, "Unsupported LLM provider, using openai");
                LlmProviderKind::OpenAI
            }),
            Err(_) => defaults.provider,
        };

        Self {
            provider,
            name: env_non_empty("LLM_NAME").unwrap_or(defaults.name),
            deploy_name: env_non_empty("LLM_DEPLOY_NAME"),
            endpoint: env_non_empty("LLM_ENDPOINT"),
            api_key: env_non_empty("LLM_API_KEY").or_else(|| env_non_empty("OPENAI_API_KEY")),
            api_version: env_non_empty("LLM_API_VER"),
            temperature: match std::env::var("LLM_TEMPERATURE") {
                Ok(_) => Some(env_parse("LLM_TEMPERATURE", 0.7_f32)),
                Err(_) => defaults.temperature,
            },
            max_tokens: env_non_empty("LLM_MAX_TOKENS").and_then(|s| s.parse().ok()),
        }
    }

    /// Per-call parameters derived from these settings
    pub fn call_config(&self) -> LlmCallConfig {
        LlmCallConfig {
            model: self.deploy_name.clone().unwrap_or_else(|| self.name.clone()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("provider", &self.provider)
            .field("name", &self.name)
            .field("deploy_name", &self.deploy_name)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_version", &self.api_version)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Visual feedback left in the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackConfig {
    /// Reaction added while a reply is being produced
    pub in_progress_reaction: Option<String>,
    /// Reaction added when handling fails
    pub failure_reaction: Option<String>,
    /// Short message posted in-thread when handling fails
    pub failure_message: Option<String>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            in_progress_reaction: Some("eyes".to_string()),
            failure_reaction: Some("warning".to_string()),
            failure_message: None,
        }
    }
}

impl FeedbackConfig {
    /// No reactions, no messages
    pub fn silent() -> Self {
        Self {
            in_progress_reaction: None,
            failure_reaction: None,
            failure_message: None,
        }
    }

    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            in_progress_reaction: env_optional("IN_PROGRESS_REACTION", defaults.in_progress_reaction),
            failure_reaction: env_optional("FAILURE_REACTION", defaults.failure_reaction),
            failure_message: env_non_empty("FAILURE_MESSAGE"),
        }
    }
}

// ============================================================================
// Environment helpers
// ============================================================================

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Unset keeps the default, an empty value disables the option
fn env_optional(key: &str, default: Option<String>) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => None,
        Ok(v) => Some(v.trim().to_string()),
        Err(_) => default,
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.max_history_messages, -1);
        assert!(!config.include_other_bots);
        assert!(config.retain_own_messages);
        assert_eq!(config.dedup_ttl, Duration::from_secs(300));
        assert_eq!(config.feedback.failure_reaction.as_deref(), Some("warning"));
    }

    #[test]
    fn test_call_config_prefers_deployment_name() {
        let settings = LlmSettings {
            provider: LlmProviderKind::Azure,
            deploy_name: Some("prod-gpt4o".to_string()),
            ..LlmSettings::default()
        };
        assert_eq!(settings.call_config().model, "prod-gpt4o");
        assert_eq!(settings.call_config().temperature, Some(0.7));

        assert_eq!(LlmSettings::default().call_config().model, "gpt-4o-mini");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let settings = LlmSettings {
            api_key: Some("sk-secret".to_string()),
            ..LlmSettings::default()
        };
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_builder_methods() {
        let config = BotConfig::default()
            .with_system_instructions("Be brief.")
            .with_max_history_messages(5)
            .with_include_other_bots(true)
            .with_feedback(FeedbackConfig::silent());
        assert_eq!(config.system_instructions, "Be brief.");
        assert_eq!(config.max_history_messages, 5);
        assert!(config.include_other_bots);
        assert_eq!(config.feedback, FeedbackConfig::silent());
    }
}
