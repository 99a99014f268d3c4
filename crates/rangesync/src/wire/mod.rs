//! Encoding of transfer messages into payloads.
//!
//! A payload is the serialized message, optionally zlib compressed, followed
//! by zero bytes up to the requested block size:
//!
//! ```text
//! [message or zlib(message)][0 padding]
//! ```
//!
//! The bare payload does not say whether it is compressed. Peers agree on
//! it out of band, and [`WireCodec::decode`] retries with the opposite
//! guess when the first attempt fails. [`frame::TransferCodec`] wraps
//! payloads in a frame that carries the flag explicitly.
pub mod frame;
pub mod messages;

use std::{
    fmt,
    io::Read,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use bytes::{BufMut, Bytes, BytesMut};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use hashbrown::HashMap;
use speedy::{BigEndian, Readable, Writable};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::{error::Error, utils::format_bytes};

/// 10 MiB, the largest payload we agree to receive.
pub const MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// 128 KiB, payloads larger than this are logged.
pub const PAYLOAD_WARN_SIZE: usize = 128 * 1024;

/// Buffers that grew beyond this are not kept for the next message.
pub const MAX_CACHED_BUFFER_SIZE: usize = 256 * 1024;

const INITIAL_BUFFER_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Encode,
    Decode,
}

/// Receives timings of every encoded and decoded message.
pub trait CodecMetrics: fmt::Debug + Send + Sync {
    fn record(
        &self,
        kind: &'static str,
        direction: Direction,
        bytes: usize,
        elapsed: Duration,
    );
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KindStats {
    pub count: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// [`CodecMetrics`] that keeps totals per message type.
#[derive(Debug, Default)]
pub struct CodecStats {
    kinds: Mutex<HashMap<(&'static str, Direction), KindStats>>,
}

impl CodecStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: &'static str, direction: Direction) -> KindStats {
        self.kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(kind, direction))
            .copied()
            .unwrap_or_default()
    }

    /// Log the totals, most frequent message types first.
    pub fn summary(&self) {
        let kinds = self.kinds.lock().unwrap_or_else(PoisonError::into_inner);
        let mut sorted: Vec<_> = kinds.iter().collect();
        sorted.sort_by(|a, b| b.1.count.cmp(&a.1.count));

        let total: u64 = sorted.iter().map(|(_, s)| s.count).sum();
        let elapsed: Duration = sorted.iter().map(|(_, s)| s.elapsed).sum();
        debug!("serialization: {total} messages took {elapsed:?}");

        for ((kind, direction), stats) in sorted {
            debug!(
                " {kind} {direction:?}: {} ({})",
                stats.count,
                format_bytes(stats.bytes)
            );
        }
    }
}

impl CodecMetrics for CodecStats {
    fn record(
        &self,
        kind: &'static str,
        direction: Direction,
        bytes: usize,
        elapsed: Duration,
    ) {
        let mut kinds =
            self.kinds.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = kinds.entry((kind, direction)).or_default();
        stats.count += 1;
        stats.bytes += bytes as u64;
        stats.elapsed += elapsed;
    }
}

/// Encodes and decodes the payloads of one connection.
///
/// The scratch buffer of the encoder and the receive buffer are reused from
/// one message to the next, so a session should keep a single `WireCodec`
/// around instead of creating one per message.
#[derive(Debug, Default)]
pub struct WireCodec {
    scratch: BytesMut,
    recv: Vec<u8>,
    metrics: Option<Arc<dyn CodecMetrics>>,
}

impl WireCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: Arc<dyn CodecMetrics>) -> Self {
        Self { metrics: Some(metrics), ..Self::default() }
    }

    fn record<T>(&self, direction: Direction, bytes: usize, start: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record(
                std::any::type_name::<T>(),
                direction,
                bytes,
                start.elapsed(),
            );
        }
    }

    /// Serialize `msg` into a payload, compressed if `compress`, padded
    /// with zeros to a multiple of `pad_to_block_size` if it is not 0.
    ///
    /// The returned bytes share the scratch buffer, drop them before the
    /// next call for the allocation to be reused.
    pub fn encode<T>(
        &mut self,
        msg: &T,
        compress: bool,
        pad_to_block_size: usize,
    ) -> Result<Bytes, Error>
    where
        T: Writable<BigEndian> + fmt::Debug,
    {
        let start = Instant::now();

        self.scratch.clear();
        self.scratch.reserve(INITIAL_BUFFER_SIZE);

        let writer = (&mut self.scratch).writer();
        if compress {
            let mut encoder = ZlibEncoder::new(writer, Compression::default());
            msg.write_to_stream_with_ctx(BigEndian {}, &mut encoder)?;
            encoder.finish()?;
        } else {
            msg.write_to_stream_with_ctx(BigEndian {}, writer)?;
        }

        if pad_to_block_size > 0 {
            let modulo = self.scratch.len() % pad_to_block_size;
            if modulo != 0 {
                self.scratch.put_bytes(0, pad_to_block_size - modulo);
            }
        }

        let len = self.scratch.len();
        if len >= PAYLOAD_WARN_SIZE {
            warn!("send buffer exceeds 128 KiB! {}: {msg:?}", format_bytes(len as u64));
        }

        let payload = self.scratch.split().freeze();
        self.record::<T>(Direction::Encode, len, start);

        Ok(payload)
    }

    /// Deserialize a payload, trying `expect_compression` first and the
    /// opposite if that fails.
    pub fn decode<T>(
        &self,
        payload: &[u8],
        expect_compression: bool,
    ) -> Result<T, Error>
    where
        T: for<'a> Readable<'a, BigEndian>,
    {
        let first = match self.decode_exact::<T>(payload, expect_compression) {
            Ok(msg) => return Ok(msg),
            Err(e) => e,
        };

        match self.decode_exact::<T>(payload, !expect_compression) {
            Ok(msg) => {
                warn!(
                    "stream was not as expected, compression expected: \
                     {expect_compression}, received compressed: {}",
                    !expect_compression
                );
                Ok(msg)
            }
            Err(Error::SpeedyError(second)) => {
                warn!(
                    "while decoding (compressed: {expect_compression}): \
                     {first}"
                );
                Err(Error::Decode {
                    compressed: !expect_compression,
                    source: second,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Deserialize a payload whose compression is known.
    ///
    /// Trailing padding after the message is ignored.
    pub fn decode_exact<T>(
        &self,
        payload: &[u8],
        compressed: bool,
    ) -> Result<T, Error>
    where
        T: for<'a> Readable<'a, BigEndian>,
    {
        let start = Instant::now();

        let msg = if compressed {
            Self::read_message::<T>(ZlibDecoder::new(payload))?
        } else {
            Self::read_message::<T>(payload)?
        };

        self.record::<T>(Direction::Decode, payload.len(), start);
        Ok(msg)
    }

    fn read_message<T>(reader: impl Read) -> Result<T, speedy::Error>
    where
        T: for<'a> Readable<'a, BigEndian>,
    {
        T::read_from_stream_unbuffered_with_ctx(BigEndian {}, reader)
    }

    /// Read exactly `expected_size` bytes from `reader` into the receive
    /// buffer, growing it if needed.
    ///
    /// # Errors
    ///
    /// Sizes above [`MAX_BUFFER_SIZE`] are refused before anything is
    /// allocated or read. The connection that asked for it should not be
    /// trusted anymore.
    pub async fn read_expected<R>(
        &mut self,
        reader: &mut R,
        expected_size: usize,
    ) -> Result<&[u8], Error>
    where
        R: AsyncRead + Unpin,
    {
        if expected_size > MAX_BUFFER_SIZE {
            return Err(Error::ReceiveBufferLimit(expected_size, MAX_BUFFER_SIZE));
        }

        if self.recv.len() < expected_size {
            let action = if self.recv.is_empty() { "Creating" } else { "Extending" };
            debug!("{action} receive buffer ({})", format_bytes(expected_size as u64));
            if expected_size >= PAYLOAD_WARN_SIZE {
                warn!(
                    "receive buffer exceeds 128 KiB! {}",
                    format_bytes(expected_size as u64)
                );
            }
            self.recv.resize(expected_size, 0);
        } else if self.recv.len() > MAX_CACHED_BUFFER_SIZE
            && expected_size <= MAX_CACHED_BUFFER_SIZE
        {
            // don't hold on to the memory of a single large message
            self.recv.truncate(expected_size.max(INITIAL_BUFFER_SIZE));
            self.recv.shrink_to_fit();
        }

        reader.read_exact(&mut self.recv[..expected_size]).await?;

        Ok(&self.recv[..expected_size])
    }

    /// Capacity retained by the receive buffer.
    pub fn receive_buffer_len(&self) -> usize {
        self.recv.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        messages::{FileId, PartRecord, TransferMessage},
        *,
    };
    use crate::{parts::PartState, range::Range};

    fn messages() -> Vec<TransferMessage> {
        let file = FileId::from("docs/report.pdf");
        vec![
            TransferMessage::RequestPart {
                file: file.clone(),
                range: Range::by_length(32768, 32768),
            },
            TransferMessage::FileChunk {
                file: file.clone(),
                offset: 65536,
                data: (0..5000).map(|i| (i % 251) as u8).collect(),
            },
            TransferMessage::PartStates {
                file: file.clone(),
                parts: vec![
                    PartRecord {
                        range: Range::by_length(0, 100),
                        state: PartState::Available,
                    },
                    PartRecord {
                        range: Range::by_length(100, 900),
                        state: PartState::Needed,
                    },
                ],
            },
            TransferMessage::StopUpload { file },
        ]
    }

    #[test]
    fn round_trip_compressed() {
        let mut codec = WireCodec::new();
        for msg in messages() {
            let payload = codec.encode(&msg, true, 0).unwrap();
            let decoded: TransferMessage = codec.decode(&payload, true).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn round_trip_uncompressed() {
        let mut codec = WireCodec::new();
        for msg in messages() {
            let payload = codec.encode(&msg, false, 0).unwrap();
            let decoded: TransferMessage =
                codec.decode(&payload, false).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn padding() {
        let mut codec = WireCodec::new();
        for msg in messages() {
            for compress in [true, false] {
                let payload = codec.encode(&msg, compress, 64).unwrap();
                assert_eq!(payload.len() % 64, 0);

                // padding is ignored by the decoder
                let decoded: TransferMessage =
                    codec.decode_exact(&payload, compress).unwrap();
                assert_eq!(decoded, msg);
            }
        }
    }

    #[test]
    fn compression_shrinks_repetitive_data() {
        let mut codec = WireCodec::new();
        let msg = TransferMessage::FileChunk {
            file: FileId::from("a"),
            offset: 0,
            data: vec![7; 32 * 1024],
        };
        let plain = codec.encode(&msg, false, 0).unwrap().len();
        let compressed = codec.encode(&msg, true, 0).unwrap().len();
        assert!(compressed < plain / 10);
    }

    #[test]
    fn decode_retries_with_other_compression() {
        let mut codec = WireCodec::new();
        let msg = messages().remove(1);

        let compressed = codec.encode(&msg, true, 0).unwrap();
        let decoded: TransferMessage = codec.decode(&compressed, false).unwrap();
        assert_eq!(decoded, msg);

        let plain = codec.encode(&msg, false, 0).unwrap();
        let decoded: TransferMessage = codec.decode(&plain, true).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_garbage_fails() {
        let codec = WireCodec::new();
        let r = codec.decode::<TransferMessage>(&[0xff; 16], true);
        assert!(matches!(r, Err(Error::Decode { compressed: false, .. })));

        let r = codec.decode::<TransferMessage>(&[], false);
        assert!(matches!(r, Err(Error::Decode { compressed: true, .. })));
    }

    #[test]
    fn payloads_outlive_the_next_encode() {
        let mut codec = WireCodec::new();
        let all = messages();

        let first = codec.encode(&all[0], false, 0).unwrap();
        let second = codec.encode(&all[1], false, 0).unwrap();

        let decoded: TransferMessage = codec.decode(&first, false).unwrap();
        assert_eq!(decoded, all[0]);
        let decoded: TransferMessage = codec.decode(&second, false).unwrap();
        assert_eq!(decoded, all[1]);
    }

    #[tokio::test]
    async fn large_receive_buffer_is_released() {
        let mut codec = WireCodec::new();
        let data = vec![3; MAX_CACHED_BUFFER_SIZE * 2];
        let mut reader = &data[..];

        let got = codec.read_expected(&mut reader, data.len() - 10).await.unwrap();
        assert_eq!(got.len(), data.len() - 10);
        assert!(codec.receive_buffer_len() > MAX_CACHED_BUFFER_SIZE);

        let got = codec.read_expected(&mut reader, 10).await.unwrap();
        assert_eq!(got, &[3; 10]);
        assert!(codec.receive_buffer_len() <= MAX_CACHED_BUFFER_SIZE);
    }

    #[test]
    fn metrics_are_recorded() {
        let stats = Arc::new(CodecStats::new());
        let mut codec = WireCodec::with_metrics(stats.clone());

        for msg in messages() {
            let payload = codec.encode(&msg, true, 0).unwrap();
            let _: TransferMessage = codec.decode(&payload, true).unwrap();
        }

        let kind = std::any::type_name::<TransferMessage>();
        assert_eq!(stats.get(kind, Direction::Encode).count, 4);
        assert_eq!(stats.get(kind, Direction::Decode).count, 4);
        assert_eq!(stats.get("nothing", Direction::Decode).count, 0);
        stats.summary();
    }

    #[tokio::test]
    async fn read_expected() {
        let mut codec = WireCodec::new();
        let data: Vec<u8> = (0..=255).collect();
        let mut reader = &data[..];

        let got = codec.read_expected(&mut reader, 100).await.unwrap();
        assert_eq!(got, &data[..100]);

        let got = codec.read_expected(&mut reader, 50).await.unwrap();
        assert_eq!(got, &data[100..150]);
        // the buffer is not shrunk for smaller reads
        assert_eq!(codec.receive_buffer_len(), 100);

        // not enough bytes left
        let r = codec.read_expected(&mut reader, 200).await;
        assert!(matches!(r, Err(Error::IO(_))));
    }

    #[tokio::test]
    async fn read_expected_refuses_large_sizes() {
        let mut codec = WireCodec::new();
        let mut reader: &[u8] = &[];

        let r = codec.read_expected(&mut reader, MAX_BUFFER_SIZE + 1).await;
        assert!(matches!(r, Err(Error::ReceiveBufferLimit(_, MAX_BUFFER_SIZE))));
        assert_eq!(codec.receive_buffer_len(), 0);
    }
}
