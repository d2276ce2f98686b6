//! Typed, validated configuration for a single [`Shard`](super::Shard).

use crate::{codec::Codec, intents::Intents};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;

/// The `properties` object sent at identify time.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct IdentifyProperties {
    #[serde(rename = "os")]
    pub(crate) os: String,
    #[serde(rename = "browser")]
    pub(crate) browser: String,
    #[serde(rename = "device")]
    pub(crate) device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            browser: "wayfare".to_owned(),
            device: "wayfare".to_owned(),
        }
    }
}

/// Why a [`Config`] could not be built.
#[derive(Debug)]
pub enum Error {
    /// `shard_count` was zero.
    ShardCountZero,
    /// `shard_id` was not less than `shard_count`.
    ShardIdOutOfRange {
        /// The offending shard id.
        shard_id: u64,
        /// The configured shard count.
        shard_count: u64,
    },
    /// `large_threshold` fell outside the accepted `50..=250` range.
    LargeThresholdOutOfRange {
        /// The value that was given.
        value: u64,
    },
    /// ETF encoding was requested, but this build was compiled without the
    /// `etf` feature.
    EtfUnsupported,
    /// An explicit set of shard ids was given without a shard count to
    /// validate them against.
    ShardIdsRequireShardCount,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::ShardCountZero => f.write_str("shard_count must be nonzero"),
            Self::ShardIdOutOfRange {
                shard_id,
                shard_count,
            } => write!(
                f,
                "shard id {shard_id} is not less than shard_count {shard_count}"
            ),
            Self::LargeThresholdOutOfRange { value } => write!(
                f,
                "large_threshold {value} is outside the accepted range 50..=250"
            ),
            Self::EtfUnsupported => {
                f.write_str("use_etf was requested but the `etf` feature is disabled")
            }
            Self::ShardIdsRequireShardCount => {
                f.write_str("an explicit shard_ids list requires shard_count to also be set")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result alias scoped to this module's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Validated, immutable configuration for one shard.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) token: Arc<str>,
    pub(crate) shard_id: u64,
    pub(crate) shard_count: u64,
    pub(crate) intents: Intents,
    pub(crate) large_threshold: u64,
    pub(crate) codec: Codec,
    pub(crate) compression: bool,
    pub(crate) gateway_url: Arc<str>,
    pub(crate) version: u64,
    pub(crate) properties: IdentifyProperties,
}

impl Config {
    /// Start building a shard configuration for the given bot token.
    ///
    /// Any leading `Bot ` prefix on the token is stripped; it is
    /// re-prefixed where a raw `Authorization` header is needed.
    #[must_use]
    pub fn builder(token: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(token.into())
    }

    /// The shard id and shard count this config connects as.
    #[must_use]
    pub const fn shard(&self) -> [u64; 2] {
        [self.shard_id, self.shard_count]
    }

    /// The intents sent at identify time.
    #[must_use]
    pub const fn intents(&self) -> Intents {
        self.intents
    }

    /// The token, without any `Bot ` prefix.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The gateway API version this shard connects with.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }
}

/// The gateway API version used when a config doesn't set one explicitly.
pub const DEFAULT_VERSION: u64 = 6;

/// Builder for [`Config`].
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    token: String,
    shard_id: u64,
    shard_count: u64,
    intents: Intents,
    large_threshold: u64,
    codec: Codec,
    compression: bool,
    gateway_url: Option<String>,
    version: u64,
    properties: IdentifyProperties,
}

impl ConfigBuilder {
    pub(crate) fn new(token: String) -> Self {
        Self {
            token: token.strip_prefix("Bot ").map_or(token.clone(), str::to_owned),
            shard_id: 0,
            shard_count: 1,
            intents: Intents::recommended(),
            large_threshold: 50,
            codec: Codec::Json,
            compression: true,
            gateway_url: None,
            version: DEFAULT_VERSION,
            properties: IdentifyProperties::default(),
        }
    }

    /// Set the shard id and total shard count this shard will connect as.
    #[must_use]
    pub const fn shard(mut self, shard_id: u64, shard_count: u64) -> Self {
        self.shard_id = shard_id;
        self.shard_count = shard_count;
        self
    }

    /// Set the intents sent at identify time.
    #[must_use]
    pub const fn intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    /// Set the large-guild member threshold, `50..=250`.
    #[must_use]
    pub const fn large_threshold(mut self, value: u64) -> Self {
        self.large_threshold = value;
        self
    }

    /// Use the ETF codec instead of JSON. Requires the `etf` feature.
    #[must_use]
    pub const fn use_etf(mut self, use_etf: bool) -> Self {
        self.codec = if use_etf { Codec::Etf } else { Codec::Json };
        self
    }

    /// Enable or disable zlib-stream compression. Enabled by default.
    #[must_use]
    pub const fn compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Override the gateway host instead of using the bootstrap-fetched
    /// one.
    #[must_use]
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    /// Set the gateway API version to connect with. Defaults to 6.
    #[must_use]
    pub const fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<Config> {
        if self.shard_count == 0 {
            return Err(Error::ShardCountZero);
        }

        if self.shard_id >= self.shard_count {
            return Err(Error::ShardIdOutOfRange {
                shard_id: self.shard_id,
                shard_count: self.shard_count,
            });
        }

        if !(50..=250).contains(&self.large_threshold) {
            return Err(Error::LargeThresholdOutOfRange {
                value: self.large_threshold,
            });
        }

        if self.codec == Codec::Etf && cfg!(not(feature = "etf")) {
            return Err(Error::EtfUnsupported);
        }

        Ok(Config {
            token: Arc::from(self.token),
            shard_id: self.shard_id,
            shard_count: self.shard_count,
            intents: self.intents,
            large_threshold: self.large_threshold,
            codec: self.codec,
            compression: self.compression,
            gateway_url: Arc::from(self.gateway_url.unwrap_or_else(|| "auto".to_owned())),
            version: self.version,
            properties: self.properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Error};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Config: Clone, Debug, Send, Sync);

    #[test]
    fn strips_bot_prefix() {
        let config = Config::builder("Bot abc123").shard(0, 1).build().unwrap();
        assert_eq!(config.token(), "abc123");
    }

    #[test]
    fn rejects_zero_shard_count() {
        let err = Config::builder("t").shard(0, 0).build().unwrap_err();
        assert!(matches!(err, Error::ShardCountZero));
    }

    #[test]
    fn rejects_out_of_range_shard_id() {
        let err = Config::builder("t").shard(2, 2).build().unwrap_err();
        assert!(matches!(err, Error::ShardIdOutOfRange { .. }));
    }

    #[test]
    fn rejects_bad_large_threshold() {
        let err = Config::builder("t")
            .shard(0, 1)
            .large_threshold(10)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::LargeThresholdOutOfRange { value: 10 }));
    }
}
