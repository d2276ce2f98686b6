#![allow(clippy::module_name_repetitions)]
#![deny(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod cluster;
pub mod codec;
pub mod event;
pub mod intents;
pub mod shard;

#[cfg(feature = "compression")]
pub mod compression;

pub use self::{
    cluster::{Cluster, Config as ClusterConfig},
    event::{ClusterEvent, ShardEvent},
    intents::Intents,
    shard::{Config as ShardConfig, Shard},
};

/// The gateway API version shards connect with unless a config overrides
/// it with [`ShardConfig::builder().version()`](shard::config::ConfigBuilder::version).
pub const API_VERSION: u64 = shard::config::DEFAULT_VERSION;

#[cfg(not(any(feature = "native", feature = "rustls-native-roots", feature = "rustls-webpki-roots")))]
compile_error!(
    "Either the `native`, `rustls-native-roots` or `rustls-webpki-roots` feature must be enabled."
);
