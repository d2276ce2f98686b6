//! The error type describing why a shard operation failed.

use crate::codec;
#[cfg(feature = "compression")]
use crate::compression;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
};
use tokio_tungstenite::tungstenite::Error as TungsteniteError;
use url::ParseError;

/// A result enum with the error type being the shard's [`Error`].
pub type Result<T, E = Error> = StdResult<T, E>;

/// Why a shard operation failed.
#[derive(Debug)]
pub enum Error {
    /// The provided authorization token is invalid (gateway close 4004).
    AuthorizationInvalid {
        /// The shard that received the close.
        shard_id: u64,
    },
    /// An error occurred establishing the WebSocket connection.
    Connecting {
        /// The error from the WebSocket client.
        source: TungsteniteError,
    },
    /// The current user isn't allowed to use at least one configured
    /// intent (gateway close 4014).
    IntentsDisallowed {
        /// The shard that received the close.
        shard_id: u64,
    },
    /// The configured intents aren't a valid combination (gateway close
    /// 4013).
    IntentsInvalid {
        /// The shard that received the close.
        shard_id: u64,
    },
    /// The gateway URL could not be parsed.
    ParsingUrl {
        /// The error from the URL parser.
        source: ParseError,
        /// The URL that failed to parse.
        url: String,
    },
    /// The payload received from the gateway was structurally invalid: no
    /// `op` field, or the body didn't match the opcode.
    PayloadInvalid,
    /// A payload could not be encoded or decoded.
    Serialization {
        /// The codec error.
        source: codec::Error,
    },
    /// A binary frame could not be decompressed.
    #[cfg(feature = "compression")]
    Decompressing {
        /// The decompression error.
        source: compression::Error,
    },
    /// `connect()` hasn't been called, or the socket has since closed, so
    /// there is no active session to operate on.
    NotConnected,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::AuthorizationInvalid { shard_id } => {
                write!(f, "the authorization token for shard {shard_id} is invalid")
            }
            Self::Connecting { .. } => f.write_str("failed to connect to the gateway"),
            Self::IntentsDisallowed { shard_id } => write!(
                f,
                "at least one configured intent is disallowed for shard {shard_id}"
            ),
            Self::IntentsInvalid { shard_id } => write!(
                f,
                "at least one configured intent is invalid for shard {shard_id}"
            ),
            Self::ParsingUrl { url, .. } => write!(f, "the gateway url `{url}` is invalid"),
            Self::PayloadInvalid => {
                f.write_str("the payload received from the gateway had an invalid structure")
            }
            Self::Serialization { .. } => f.write_str("a payload could not be (de)serialized"),
            #[cfg(feature = "compression")]
            Self::Decompressing { .. } => f.write_str("a frame could not be decompressed"),
            Self::NotConnected => f.write_str("the shard has not connected yet"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connecting { source } => Some(source),
            Self::ParsingUrl { source, .. } => Some(source),
            Self::Serialization { source } => Some(source),
            #[cfg(feature = "compression")]
            Self::Decompressing { source } => Some(source),
            Self::AuthorizationInvalid { .. }
            | Self::IntentsDisallowed { .. }
            | Self::IntentsInvalid { .. }
            | Self::PayloadInvalid
            | Self::NotConnected => None,
        }
    }
}

impl From<codec::Error> for Error {
    fn from(source: codec::Error) -> Self {
        Self::Serialization { source }
    }
}

#[cfg(feature = "compression")]
impl From<compression::Error> for Error {
    fn from(source: compression::Error) -> Self {
        Self::Decompressing { source }
    }
}
