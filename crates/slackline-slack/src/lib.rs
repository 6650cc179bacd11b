// Slack Transport
//
// This crate connects the core to Slack:
// - SlackClient implements ChatPlatform over the Web API
// - parse_payload turns Events API bodies into IncomingEvent values
// - SignatureVerifier authenticates inbound requests

pub mod client;
pub mod error;
pub mod events;
pub mod settings;
pub mod signature;

pub use client::{SlackClient, SlackMessage, DEFAULT_API_BASE_URL};
pub use error::SlackError;
pub use events::{parse_payload, InboundPayload, PayloadError};
pub use settings::SlackSettings;
pub use signature::{SignatureError, SignatureVerifier, MAX_TIMESTAMP_SKEW_SECS};
