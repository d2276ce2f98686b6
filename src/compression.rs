//! Streaming zlib decompression for gateway connections opened with
//! `compress=zlib-stream`.
//!
//! Discord keeps one long-lived deflate stream alive for the life of a
//! shard's socket and periodically sync-flushes it; each logical message
//! ends, in the *compressed* byte stream, with the four bytes
//! `00 00 FF FF`. A single WebSocket frame may carry a partial message, one
//! complete message, or several concatenated complete messages, so the
//! suffix has to be located independently of frame boundaries.

use flate2::{Decompress, DecompressError, FlushDecompress};
use std::collections::VecDeque;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Instant;

const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
const INTERNAL_BUFFER_SIZE: usize = 32 * 1024;
const SHRINK_INTERVAL_SECS: u64 = 60;

/// Failures produced while inflating a compressed gateway stream.
#[derive(Debug)]
pub enum Error {
    /// The underlying `flate2` decompressor rejected the input.
    Decompressing { source: DecompressError },
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Decompressing { .. } => f.write_str("binary payload could not be decompressed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decompressing { source } => Some(source),
        }
    }
}

impl From<DecompressError> for Error {
    fn from(source: DecompressError) -> Self {
        Self::Decompressing { source }
    }
}

/// Result alias scoped to this module's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A streaming zlib inflater bound to one shard's socket lifetime.
///
/// Configuration values `zlib`, `zlib-stream`, `zlib-sync`, and `pako` all
/// resolve to this same implementation; the distinction between them is a
/// property of which native zlib binding a JavaScript host loads, which has
/// no equivalent once there is a single `flate2` backend.
#[derive(Debug)]
pub struct Inflater {
    decompress: Decompress,
    pending: Vec<u8>,
    internal_buffer: Vec<u8>,
    message: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
    last_resize: Instant,
    shard: [u64; 2],
}

impl Inflater {
    /// Create a new inflater for the given `[id, shard_count]` pair.
    #[must_use]
    pub fn new(shard: [u64; 2]) -> Self {
        Self {
            decompress: Decompress::new(true),
            pending: Vec::new(),
            internal_buffer: Vec::with_capacity(INTERNAL_BUFFER_SIZE),
            message: Vec::with_capacity(INTERNAL_BUFFER_SIZE),
            ready: VecDeque::new(),
            last_resize: Instant::now(),
            shard,
        }
    }

    /// Feed one binary WebSocket message into the inflater.
    ///
    /// May produce zero, one, or several decoded messages, which become
    /// available through [`next_message`]: zero if the chunk is an
    /// incomplete fragment, more than one if the chunk happens to contain
    /// several sync-flush boundaries back to back.
    ///
    /// [`next_message`]: Self::next_message
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self, buf)))]
    pub fn add(&mut self, buf: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(buf);
        self.drain_complete_messages()
    }

    /// Feed several chunks in order, as when a message arrives fragmented
    /// across multiple WebSocket continuation frames.
    pub fn add_all(&mut self, chunks: &[&[u8]]) -> Result<()> {
        for chunk in chunks {
            self.add(chunk)?;
        }

        Ok(())
    }

    /// Take the next fully decoded message, if one is ready.
    pub fn next_message(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// Clear all buffered state and shrink allocations if they've grown.
    pub fn clear(&mut self) {
        self.shrink();
        self.pending.clear();
        self.internal_buffer.clear();
        self.message.clear();
        self.ready.clear();
    }

    /// Reset the inflater to a fresh zlib stream, as required after a
    /// non-resumable close: Discord's per-connection deflate stream cannot
    /// be reused across sockets.
    pub fn reset(&mut self) {
        *self = Self::new(self.shard);
    }

    fn drain_complete_messages(&mut self) -> Result<()> {
        while let Some(end) = find_suffix(&self.pending) {
            let chunk = self.pending.drain(..end).collect::<Vec<u8>>();
            self.decode_chunk(&chunk)?;
        }

        Ok(())
    }

    fn decode_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let before_in = self.decompress.total_in();
        let mut offset = 0usize;

        loop {
            self.internal_buffer.clear();

            self.decompress.decompress_vec(
                &chunk[offset..],
                &mut self.internal_buffer,
                FlushDecompress::Sync,
            )?;

            self.message.extend_from_slice(&self.internal_buffer);

            #[allow(clippy::cast_possible_truncation)]
            let consumed = (self.decompress.total_in() - before_in) as usize;
            let not_at_capacity = self.internal_buffer.len() < self.internal_buffer.capacity();

            if not_at_capacity || consumed >= chunk.len() {
                break;
            }

            offset = consumed;
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(
            bytes_in = chunk.len(),
            bytes_out = self.message.len(),
            shard_id = self.shard[0],
            shard_total = self.shard[1],
            "inflated one gateway message",
        );

        #[cfg(feature = "metrics")]
        self.record_metrics();

        let message = std::mem::replace(&mut self.message, Vec::with_capacity(INTERNAL_BUFFER_SIZE));
        self.ready.push_back(message);

        Ok(())
    }

    #[cfg(feature = "metrics")]
    fn record_metrics(&self) {
        metrics::gauge!(
            format!("gateway_inflater_total_in_{}", self.shard[0]),
            self.decompress.total_in() as f64
        );
        metrics::gauge!(
            format!("gateway_inflater_total_out_{}", self.shard[0]),
            self.decompress.total_out() as f64
        );
    }

    fn shrink(&mut self) {
        if self.last_resize.elapsed().as_secs() < SHRINK_INTERVAL_SECS {
            return;
        }

        self.pending.shrink_to_fit();
        self.message.shrink_to_fit();
        self.last_resize = Instant::now();
    }
}

fn find_suffix(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }

    buf.windows(4).position(|w| w == ZLIB_SUFFIX).map(|i| i + 4)
}

#[cfg(test)]
mod tests {
    use super::Inflater;
    use flate2::{Compress, Compression, FlushCompress};

    fn compress_sync_flush(messages: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut compress = Compress::new(Compression::default(), true);
        let mut out = Vec::new();

        for msg in messages {
            let mut buf = Vec::new();
            compress
                .compress_vec(msg, &mut buf, FlushCompress::Sync)
                .unwrap();
            out.push(buf);
        }

        out
    }

    #[test]
    fn single_message_round_trips() {
        let frames = compress_sync_flush(&[br#"{"op":10}"#]);
        let mut inflater = Inflater::new([0, 1]);

        inflater.add(&frames[0]).unwrap();

        let decoded = inflater.next_message().expect("one message ready");
        assert_eq!(decoded, br#"{"op":10}"#);
        assert!(inflater.next_message().is_none());
    }

    #[test]
    fn incomplete_fragment_yields_no_message() {
        let frames = compress_sync_flush(&[br#"{"op":10}"#]);
        let mut inflater = Inflater::new([0, 1]);

        let (head, _tail) = frames[0].split_at(frames[0].len() - 2);
        inflater.add(head).unwrap();

        assert!(inflater.next_message().is_none());
    }

    #[test]
    fn two_messages_concatenated_in_one_add_decode_in_order() {
        let frames = compress_sync_flush(&[br#"{"op":0,"t":"A"}"#, br#"{"op":0,"t":"B"}"#]);
        let mut inflater = Inflater::new([0, 1]);

        let mut joined = frames[0].clone();
        joined.extend_from_slice(&frames[1]);
        inflater.add(&joined).unwrap();

        let first = inflater.next_message().expect("first message ready");
        let second = inflater.next_message().expect("second message ready");
        assert_eq!(first, br#"{"op":0,"t":"A"}"#);
        assert_eq!(second, br#"{"op":0,"t":"B"}"#);
    }

    #[test]
    fn chunked_across_add_calls_still_splits_correctly() {
        let frames = compress_sync_flush(&[br#"{"op":0,"t":"A"}"#, br#"{"op":0,"t":"B"}"#]);
        let mut inflater = Inflater::new([0, 1]);

        let (a1, a2) = frames[0].split_at(frames[0].len() / 2);
        let mut second_call = a2.to_vec();
        second_call.extend_from_slice(&frames[1]);

        inflater.add(a1).unwrap();
        assert!(inflater.next_message().is_none());

        inflater.add(&second_call).unwrap();

        let first = inflater.next_message().expect("first message ready");
        let second = inflater.next_message().expect("second message ready");
        assert_eq!(first, br#"{"op":0,"t":"A"}"#);
        assert_eq!(second, br#"{"op":0,"t":"B"}"#);
    }
}
