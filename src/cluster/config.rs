//! Typed, validated configuration for a [`Cluster`](super::Cluster).

use crate::intents::Intents;
use crate::shard::config as shard_config;
use std::sync::Arc;

pub use shard_config::Error;

/// Result alias scoped to this module's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Validated, immutable configuration for a cluster of shards.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) token: Arc<str>,
    pub(crate) shard_count: Option<u64>,
    pub(crate) shard_ids: Option<Vec<u64>>,
    pub(crate) intents: Intents,
    pub(crate) large_threshold: u64,
    pub(crate) use_etf: bool,
    pub(crate) compression: bool,
    pub(crate) gateway_url: Option<Arc<str>>,
    pub(crate) version: u64,
}

impl Config {
    /// Start building cluster configuration for the given bot token.
    #[must_use]
    pub fn builder(token: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(token.into())
    }

    /// The token, without any `Bot ` prefix.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The fixed shard count, if one was configured instead of relying on
    /// the gateway's recommendation.
    #[must_use]
    pub const fn shard_count(&self) -> Option<u64> {
        self.shard_count
    }

    /// The explicit set of shard ids to run, if configured instead of the
    /// contiguous `0..shard_count` range.
    #[must_use]
    pub fn shard_ids(&self) -> Option<&[u64]> {
        self.shard_ids.as_deref()
    }

    /// The gateway API version every managed shard connects with.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }
}

/// Builder for [`Config`].
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    token: String,
    shard_count: Option<u64>,
    shard_ids: Option<Vec<u64>>,
    intents: Intents,
    large_threshold: u64,
    use_etf: bool,
    compression: bool,
    gateway_url: Option<String>,
    version: u64,
}

impl ConfigBuilder {
    pub(crate) fn new(token: String) -> Self {
        Self {
            token: token.strip_prefix("Bot ").map_or(token.clone(), str::to_owned),
            shard_count: None,
            shard_ids: None,
            intents: Intents::recommended(),
            large_threshold: 50,
            use_etf: false,
            compression: true,
            gateway_url: None,
            version: shard_config::DEFAULT_VERSION,
        }
    }

    /// Fix the total shard count instead of using the gateway's
    /// recommendation fetched at [`Cluster::up`](super::Cluster::up) time.
    ///
    /// Every shard in `0..shard_count` is run. To run a subset of a larger
    /// total, use [`Self::shard_ids`] instead.
    #[must_use]
    pub const fn shard_count(mut self, shard_count: u64) -> Self {
        self.shard_count = Some(shard_count);
        self
    }

    /// Run exactly this set of shard ids instead of a contiguous range.
    /// Requires [`Self::shard_count`] to also be set, since the total is
    /// otherwise ambiguous.
    #[must_use]
    pub fn shard_ids(mut self, shard_ids: Vec<u64>) -> Self {
        self.shard_ids = Some(shard_ids);
        self
    }

    /// Set the gateway API version every managed shard connects with.
    /// Defaults to 6.
    #[must_use]
    pub const fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Set the intents every managed shard identifies with.
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
        self.use_etf = use_etf;
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

    /// Validate and build the configuration.
    pub fn build(self) -> Result<Config> {
        if let Some(0) = self.shard_count {
            return Err(Error::ShardCountZero);
        }

        if let Some(shard_ids) = &self.shard_ids {
            let shard_count = self.shard_count.ok_or(Error::ShardIdsRequireShardCount)?;

            for &shard_id in shard_ids {
                if shard_id >= shard_count {
                    return Err(Error::ShardIdOutOfRange { shard_id, shard_count });
                }
            }
        }

        if !(50..=250).contains(&self.large_threshold) {
            return Err(Error::LargeThresholdOutOfRange {
                value: self.large_threshold,
            });
        }

        if self.use_etf && cfg!(not(feature = "etf")) {
            return Err(Error::EtfUnsupported);
        }

        Ok(Config {
            token: Arc::from(self.token),
            shard_count: self.shard_count,
            shard_ids: self.shard_ids,
            intents: self.intents,
            large_threshold: self.large_threshold,
            use_etf: self.use_etf,
            compression: self.compression,
            gateway_url: self.gateway_url.map(Arc::from),
            version: self.version,
        })
    }
}
