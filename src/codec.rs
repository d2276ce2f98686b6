//! Payload serialization: JSON or, optionally, Erlang ETF.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Error produced while encoding or decoding a gateway payload.
///
/// A decode failure is never fatal to the connection: the offending frame
/// is dropped and surfaced to the caller as a shard error event.
#[derive(Debug)]
pub enum Error {
    /// `serde_json` couldn't parse or produce the payload.
    Json { source: serde_json::Error },
    /// The `eetf` codec couldn't parse the payload.
    #[cfg(feature = "etf")]
    EtfDecoding { source: eetf::DecodeError },
    /// The `eetf` codec couldn't produce the payload.
    #[cfg(feature = "etf")]
    EtfEncoding { source: eetf::EncodeError },
    /// ETF encoding was requested but this build doesn't carry the `etf`
    /// feature.
    EtfUnsupported,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Json { .. } => f.write_str("JSON payload could not be (de)serialized"),
            #[cfg(feature = "etf")]
            Self::EtfDecoding { .. } => f.write_str("ETF payload could not be decoded"),
            #[cfg(feature = "etf")]
            Self::EtfEncoding { .. } => f.write_str("ETF payload could not be encoded"),
            Self::EtfUnsupported => {
                f.write_str("ETF encoding was requested but the `etf` feature is disabled")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json { source } => Some(source),
            #[cfg(feature = "etf")]
            Self::EtfDecoding { source } => Some(source),
            #[cfg(feature = "etf")]
            Self::EtfEncoding { source } => Some(source),
            Self::EtfUnsupported => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::Json { source }
    }
}

/// Result alias scoped to this module's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A frame received over the WebSocket, in whichever shape the transport
/// library handed it to us.
pub enum Frame<'a> {
    /// A UTF-8 text frame.
    Text(&'a str),
    /// A single binary frame.
    Binary(&'a [u8]),
    /// Several binary chunks to be treated as one contiguous payload, as
    /// produced by the decompression stream when a message fragments
    /// across WebSocket frames.
    BinaryChunks(&'a [Vec<u8>]),
}

/// The two wire encodings the gateway understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Plain JSON text.
    Json,
    /// Erlang's External Term Format, binary.
    Etf,
}

impl Codec {
    /// The `encoding` query parameter value this codec connects with.
    #[must_use]
    pub const fn query_value(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Etf => "etf",
        }
    }

    /// Returns an error if ETF was requested but the `etf` feature isn't
    /// compiled in. Called at shard construction, not at first use, so a
    /// misconfiguration fails loudly and immediately.
    pub fn validate(self) -> Result<()> {
        if self == Self::Etf && cfg!(not(feature = "etf")) {
            return Err(Error::EtfUnsupported);
        }

        Ok(())
    }

    /// Serialize a payload to bytes-or-text ready to send on the socket.
    pub fn encode<T: Serialize>(self, payload: &T) -> Result<Vec<u8>> {
        match self {
            Self::Json => Ok(serde_json::to_vec(payload)?),
            Self::Etf => self.encode_etf(payload),
        }
    }

    /// Decode a frame into a typed payload.
    pub fn decode<T: DeserializeOwned>(self, frame: Frame<'_>) -> Result<T> {
        match self {
            Self::Json => self.decode_json(frame),
            Self::Etf => self.decode_etf(frame),
        }
    }

    fn decode_json<T: DeserializeOwned>(self, frame: Frame<'_>) -> Result<T> {
        match frame {
            Frame::Text(text) => Ok(serde_json::from_str(text)?),
            Frame::Binary(bytes) => Ok(serde_json::from_slice(bytes)?),
            Frame::BinaryChunks(chunks) => {
                let joined = chunks.iter().flat_map(|c| c.iter().copied()).collect::<Vec<u8>>();
                Ok(serde_json::from_slice(&joined)?)
            }
        }
    }

    #[cfg(feature = "etf")]
    fn encode_etf<T: Serialize>(self, payload: &T) -> Result<Vec<u8>> {
        let value = serde_json::to_value(payload)?;
        let term = json_to_eetf(&value);
        let mut buf = Vec::new();
        term.encode(&mut buf)
            .map_err(|source| Error::EtfEncoding { source })?;

        Ok(buf)
    }

    #[cfg(not(feature = "etf"))]
    fn encode_etf<T: Serialize>(self, _payload: &T) -> Result<Vec<u8>> {
        let _ = self;
        Err(Error::EtfUnsupported)
    }

    #[cfg(feature = "etf")]
    fn decode_etf<T: DeserializeOwned>(self, frame: Frame<'_>) -> Result<T> {
        let bytes = match frame {
            Frame::Binary(bytes) => bytes.to_vec(),
            Frame::BinaryChunks(chunks) => {
                chunks.iter().flat_map(|c| c.iter().copied()).collect()
            }
            Frame::Text(text) => text.as_bytes().to_vec(),
        };

        let term =
            eetf::Term::decode(bytes.as_slice()).map_err(|source| Error::EtfDecoding { source })?;
        let value = eetf_to_json(&term);

        Ok(serde_json::from_value(value)?)
    }

    #[cfg(not(feature = "etf"))]
    fn decode_etf<T: DeserializeOwned>(self, _frame: Frame<'_>) -> Result<T> {
        let _ = self;
        Err(Error::EtfUnsupported)
    }
}

#[cfg(feature = "etf")]
fn json_to_eetf(value: &serde_json::Value) -> eetf::Term {
    use serde_json::Value;

    match value {
        Value::Null => eetf::Atom::from("nil").into(),
        Value::Bool(b) => eetf::Atom::from(if *b { "true" } else { "false" }).into(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                eetf::FixInteger::from(i).into()
            } else {
                eetf::Float::from(n.as_f64().unwrap_or_default()).into()
            }
        }
        Value::String(s) => eetf::Binary::from(s.as_bytes().to_vec()).into(),
        Value::Array(values) => {
            eetf::List::from(values.iter().map(json_to_eetf).collect::<Vec<_>>()).into()
        }
        Value::Object(map) => {
            let entries = map
                .iter()
                .map(|(k, v)| (eetf::Atom::from(k.as_str()).into(), json_to_eetf(v)))
                .collect::<Vec<(eetf::Term, eetf::Term)>>();

            eetf::Map::from(entries).into()
        }
    }
}

#[cfg(feature = "etf")]
fn eetf_to_json(term: &eetf::Term) -> serde_json::Value {
    use serde_json::{Map, Number, Value};

    match term {
        eetf::Term::Atom(atom) if atom.name == "nil" => Value::Null,
        eetf::Term::Atom(atom) if atom.name == "true" => Value::Bool(true),
        eetf::Term::Atom(atom) if atom.name == "false" => Value::Bool(false),
        eetf::Term::Atom(atom) => Value::String(atom.name.clone()),
        eetf::Term::FixInteger(i) => Value::Number(Number::from(i.value)),
        eetf::Term::BigInteger(i) => Value::Number(
            i.value
                .to_i64()
                .map(Number::from)
                .unwrap_or_else(|| Number::from(0)),
        ),
        eetf::Term::Float(f) => {
            Number::from_f64(f.value).map_or(Value::Null, Value::Number)
        }
        eetf::Term::Binary(b) => {
            String::from_utf8(b.bytes.clone()).map_or(Value::Null, Value::String)
        }
        eetf::Term::List(list) => Value::Array(list.elements.iter().map(eetf_to_json).collect()),
        eetf::Term::Map(map) => {
            let mut out = Map::new();

            for (k, v) in &map.map {
                if let eetf::Term::Atom(atom) = k {
                    out.insert(atom.name.clone(), eetf_to_json(v));
                }
            }

            Value::Object(out)
        }
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::{Codec, Frame};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        op: u8,
        d: Option<u64>,
    }

    #[test]
    fn json_round_trips_text() {
        let payload = Ping { op: 1, d: Some(5) };
        let encoded = Codec::Json.encode(&payload).unwrap();
        let text = std::str::from_utf8(&encoded).unwrap();

        let decoded: Ping = Codec::Json.decode(Frame::Text(text)).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn json_decodes_binary() {
        let payload = Ping { op: 1, d: None };
        let encoded = Codec::Json.encode(&payload).unwrap();

        let decoded: Ping = Codec::Json.decode(Frame::Binary(&encoded)).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn json_decodes_chunked_binary() {
        let payload = Ping { op: 1, d: Some(9) };
        let encoded = Codec::Json.encode(&payload).unwrap();
        let (a, b) = encoded.split_at(encoded.len() / 2);
        let chunks = vec![a.to_vec(), b.to_vec()];

        let decoded: Ping = Codec::Json.decode(Frame::BinaryChunks(&chunks)).unwrap();
        assert_eq!(decoded, payload);
    }

    #[cfg(not(feature = "etf"))]
    #[test]
    fn etf_without_feature_is_a_configuration_error() {
        assert!(Codec::Etf.validate().is_err());
    }
}
