//! A minimal HTTP client for the one endpoint the gateway layer needs:
//! fetching the recommended shard count and connection URL.

use serde::Deserialize;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
    time::Duration,
};

const GATEWAY_BOT_URL: &str = "https://discord.com/api/v8/gateway/bot";

/// Result alias scoped to this module's [`Error`].
pub type Result<T, E = Error> = StdResult<T, E>;

/// Why the bootstrap request failed.
#[derive(Debug)]
pub enum Error {
    /// The request itself could not be sent, or the response could not be
    /// read.
    Request {
        /// The underlying `reqwest` error.
        source: reqwest::Error,
    },
    /// The bot's authorization token was rejected (HTTP 401).
    Unauthorized,
    /// The gateway responded with an unexpected status code.
    UnexpectedStatus {
        /// The status code received.
        status: u16,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Request { .. } => f.write_str("the gateway bootstrap request failed"),
            Self::Unauthorized => f.write_str("the bot's authorization token was rejected"),
            Self::UnexpectedStatus { status } => {
                write!(f, "the gateway bootstrap request returned status {status}")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Request { source } => Some(source),
            Self::Unauthorized | Self::UnexpectedStatus { .. } => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(source: reqwest::Error) -> Self {
        Self::Request { source }
    }
}

/// The gateway's recommendation for how many shards a bot should run, and
/// the remaining identify quota for the current day.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBot {
    /// The WSS URL to connect shards to.
    pub url: String,
    /// The recommended number of shards to start.
    pub shards: u64,
    /// The bot's current identify quota.
    pub session_start_limit: SessionStartLimit,
}

/// The identify quota returned alongside [`GatewayBot`].
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SessionStartLimit {
    /// The total number of identifies allowed per reset window.
    pub total: u64,
    /// The number of identifies left in the current window.
    pub remaining: u64,
    /// Milliseconds until `remaining` resets to `total`.
    pub reset_after: u64,
    /// The maximum number of shards that may identify concurrently.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u64,
}

impl SessionStartLimit {
    /// [`reset_after`](Self::reset_after) as a [`Duration`].
    #[must_use]
    pub const fn reset_after_duration(&self) -> Duration {
        Duration::from_millis(self.reset_after)
    }
}

const fn default_max_concurrency() -> u64 {
    1
}

/// Fetch gateway connection info for the bot identified by `token`.
///
/// `token` must not carry a `Bot ` prefix; it is added here.
pub async fn get_gateway_bot(token: &str) -> Result<GatewayBot> {
    let client = reqwest::Client::new();

    let response = client
        .get(GATEWAY_BOT_URL)
        .header("Authorization", format!("Bot {token}"))
        .header(
            "User-Agent",
            concat!(
                "DiscordBot (https://github.com/wayfare-rs/wayfare, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ),
        )
        .send()
        .await?;

    match response.status().as_u16() {
        200 => Ok(response.json().await?),
        401 => Err(Error::Unauthorized),
        status => Err(Error::UnexpectedStatus { status }),
    }
}

#[cfg(test)]
mod tests {
    use super::GatewayBot;

    #[test]
    fn deserializes_documented_shape() {
        let body = r#"{
            "url": "wss://gateway.discord.gg",
            "shards": 3,
            "session_start_limit": {
                "total": 1000,
                "remaining": 998,
                "reset_after": 14200000,
                "max_concurrency": 1
            }
        }"#;

        let bot: GatewayBot = serde_json::from_str(body).unwrap();
        assert_eq!(bot.shards, 3);
        assert_eq!(bot.session_start_limit.remaining, 998);
    }
}
