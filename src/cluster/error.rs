//! The error type describing why a cluster-level operation failed.

use crate::cluster::bootstrap;
use crate::shard::config;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
};

/// A result enum with the error type being the cluster's [`Error`].
pub type Result<T, E = Error> = StdResult<T, E>;

/// Why a cluster-level operation failed.
#[derive(Debug)]
pub enum Error {
    /// The bootstrap request to fetch gateway connection info failed.
    Bootstrapping {
        /// The underlying HTTP error.
        source: bootstrap::Error,
    },
    /// The per-shard configuration built from the cluster's configuration
    /// was rejected.
    ShardConfiguration {
        /// The underlying configuration error.
        source: config::Error,
    },
    /// The bot's authorization token was rejected (HTTP 401).
    AuthorizationInvalid,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Bootstrapping { .. } => f.write_str("failed to fetch gateway connection info"),
            Self::ShardConfiguration { .. } => {
                f.write_str("could not build configuration for a managed shard")
            }
            Self::AuthorizationInvalid => f.write_str("the bot's authorization token is invalid"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Bootstrapping { source } => Some(source),
            Self::ShardConfiguration { source } => Some(source),
            Self::AuthorizationInvalid => None,
        }
    }
}

impl From<bootstrap::Error> for Error {
    fn from(source: bootstrap::Error) -> Self {
        Self::Bootstrapping { source }
    }
}

impl From<config::Error> for Error {
    fn from(source: config::Error) -> Self {
        Self::ShardConfiguration { source }
    }
}
