//! Download of a single file from a single connection.
//!
//! The session decides, from the capabilities of the peer and the link it
//! is reached through, if the file is tracked part by part or requested as
//! a whole. It hands out the next request, pumps frames from the connection
//! through a ring buffer and keeps the parts state and the throughput
//! counter up to date with every chunk.
use std::{
    fmt,
    sync::{atomic::Ordering, Arc},
};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    counter::TransferCounter,
    error::Error,
    parts::{FilePartsState, PartState},
    policy::{self, Link},
    range::Range,
    ring_buffer::CircularByteBuffer,
    utils::format_bytes,
    wire::{
        frame::{self, FrameHeader, HEADER_LEN},
        messages::{FileId, PartRecord, TransferMessage},
        WireCodec, MAX_BUFFER_SIZE,
    },
};

/// Bytes read from the connection at once.
const READ_SIZE: usize = 16 * 1024;

/// Told about the outcome of a transfer.
pub trait TransferListener: fmt::Debug + Send + Sync {
    /// Bytes of the file arrived, in whatever order the sources sent them.
    fn chunk_received(&self, _file: &FileId, _offset: u64, _data: &[u8]) {}

    fn completed(&self, file: &FileId);

    fn failed(&self, file: &FileId, error: &Error);
}

/// How the file is being downloaded.
#[derive(Debug)]
enum Mode {
    /// Every byte is tracked, parts may come from many sources.
    Partial(FilePartsState),
    /// One request for everything that is left, chunks arrive in order.
    Whole { received: u64, requested: bool },
}

#[derive(Debug)]
pub struct TransferSession {
    file: FileId,
    length: u64,
    mode: Mode,
    delta_sync: bool,
    compress: bool,
    max_chunk_size: u64,
    pad_to_block_size: usize,
    counter: Arc<TransferCounter>,
    ring: CircularByteBuffer,
    wire: WireCodec,
    listener: Option<Arc<dyn TransferListener>>,
    finished: bool,
}

impl TransferSession {
    pub fn new(
        file: FileId,
        length: u64,
        peer_supports_partial: bool,
        link: Link,
        config: &Config,
    ) -> Self {
        let cfg = &config.partial_transfers;
        let partial =
            policy::use_partial_transfers(peer_supports_partial, link, cfg);
        let delta_sync = partial && policy::use_delta_sync(length, link, cfg);
        let compress = policy::use_compression(link, cfg);

        info!(
            "{file}: downloading {} ({link:?}), partial: {partial}, \
             delta-sync: {delta_sync}",
            format_bytes(length)
        );

        let mode = if partial {
            Mode::Partial(FilePartsState::new(length))
        } else {
            Mode::Whole { received: 0, requested: false }
        };

        Self {
            file,
            length,
            mode,
            delta_sync,
            compress,
            max_chunk_size: u64::from(config.max_chunk_size).max(1),
            pad_to_block_size: config.pad_to_block_size,
            counter: Arc::new(TransferCounter::new(0, length)),
            ring: CircularByteBuffer::new(config.ring_buffer_size),
            wire: WireCodec::new(),
            listener: None,
            finished: false,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TransferListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_wire(mut self, wire: WireCodec) -> Self {
        self.wire = wire;
        self
    }

    pub fn file(&self) -> &FileId {
        &self.file
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn is_partial(&self) -> bool {
        matches!(self.mode, Mode::Partial(_))
    }

    pub fn uses_delta_sync(&self) -> bool {
        self.delta_sync
    }

    /// Shared with whoever displays the progress.
    pub fn counter(&self) -> Arc<TransferCounter> {
        self.counter.clone()
    }

    /// `None` when the file is downloaded as a whole.
    pub fn parts(&self) -> Option<&FilePartsState> {
        match &self.mode {
            Mode::Partial(parts) => Some(parts),
            Mode::Whole { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        match &self.mode {
            Mode::Partial(parts) => parts.is_completed(),
            Mode::Whole { received, .. } => *received == self.length,
        }
    }

    /// Mark the parts that did not change since the previous version of the
    /// file as available, they won't be requested.
    ///
    /// Returns false, and does nothing, when delta-sync is not used for
    /// this transfer.
    pub fn reuse_parts(&mut self, unchanged: &[Range]) -> bool {
        let Mode::Partial(parts) = &mut self.mode else { return false };
        if !self.delta_sync {
            return false;
        }

        let before = parts.count_part_states(parts.range(), PartState::Available);
        for range in unchanged {
            parts.set_part_state(*range, PartState::Available);
        }
        let after = parts.count_part_states(parts.range(), PartState::Available);

        // bytes that were already received are counted by the counter
        let reused = after - before;
        debug!("{}: reusing {} of the old version", self.file, format_bytes(reused));
        self.counter.baseline_bytes.fetch_add(reused, Ordering::Relaxed);

        true
    }

    /// The next part to ask a source for, now pending.
    ///
    /// Parts are at most `max_chunk_size` long. In whole file mode the
    /// first call returns everything not received yet and later calls
    /// return `None`, until the request fails.
    pub fn next_request(&mut self) -> Option<TransferMessage> {
        let range = match &mut self.mode {
            Mode::Partial(parts) => {
                let needed = parts.find_first_part(PartState::Needed)?;
                let range = Range::by_length(
                    needed.start(),
                    needed.length().min(self.max_chunk_size),
                );
                parts.set_part_state(range, PartState::Pending);
                range
            }
            Mode::Whole { received, requested } => {
                if *requested || *received >= self.length {
                    return None;
                }
                *requested = true;
                Range::by_length(*received, self.length - *received)
            }
        };

        debug!("{}: requesting {range}", self.file);

        Some(TransferMessage::RequestPart { file: self.file.clone(), range })
    }

    /// Encode the next request as a frame and write it to `writer`.
    ///
    /// Returns the requested range, `None` if there is nothing to request.
    pub async fn send_next_request<W>(
        &mut self,
        writer: &mut W,
    ) -> Result<Option<Range>, Error>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(msg) = self.next_request() else { return Ok(None) };
        let range = msg.range();

        let payload =
            self.wire.encode(&msg, self.compress, self.pad_to_block_size)?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        frame::put_frame(&mut buf, &payload, self.compress);

        writer.write_all(&buf).await?;
        writer.flush().await?;

        Ok(range)
    }

    /// A source sent the bytes at `offset`.
    ///
    /// # Errors
    ///
    /// The chunk must be inside the file, and in whole file mode it must
    /// start where the previous one ended.
    pub fn on_chunk(&mut self, offset: u64, data: &[u8]) -> Result<(), Error> {
        let len = data.len() as u64;
        let inside = offset <= self.length
            && offset.checked_add(len).is_some_and(|limit| limit <= self.length);
        if !inside {
            return Err(Error::ChunkOutOfRange(offset));
        }
        let chunk = Range::by_length(offset, len);

        match &mut self.mode {
            Mode::Partial(parts) => {
                if !chunk.is_empty() {
                    parts.set_part_state(chunk, PartState::Available);
                }
            }
            Mode::Whole { received, .. } => {
                if offset != *received {
                    return Err(Error::ChunkOutOfRange(offset));
                }
                *received += chunk.length();
            }
        }

        if let Some(listener) = &self.listener {
            listener.chunk_received(&self.file, offset, data);
        }
        self.counter.bytes_transferred(chunk.length());

        if self.is_completed() {
            self.finish();
        }

        Ok(())
    }

    /// The source could not serve `range`, it can be requested again.
    pub fn on_request_failed(&mut self, range: Range) {
        match &mut self.mode {
            Mode::Partial(parts) => {
                for pending in parts.parts(PartState::Pending) {
                    if let Some(part) = pending.intersection(&range) {
                        parts.set_part_state(part, PartState::Needed);
                    }
                }
            }
            Mode::Whole { requested, .. } => *requested = false,
        }
    }

    /// Give back every pending request, e.g. when the connection is lost.
    pub fn purge_pending(&mut self) {
        match &mut self.mode {
            Mode::Partial(parts) => parts.purge_pending(),
            Mode::Whole { requested, .. } => *requested = false,
        }
    }

    /// What we know about the parts of the file, to tell other peers.
    pub fn part_states(&self) -> TransferMessage {
        let parts = match &self.mode {
            Mode::Partial(parts) => {
                let mut records: Vec<PartRecord> =
                    [PartState::Needed, PartState::Pending, PartState::Available]
                        .into_iter()
                        .flat_map(|state| {
                            parts
                                .parts(state)
                                .into_iter()
                                .map(move |range| PartRecord { range, state })
                        })
                        .collect();
                records.sort_by_key(|r| r.range.start());
                records
            }
            Mode::Whole { received, .. } => {
                let (done, rest) = (*received, self.length - *received);
                [
                    (Range::by_length(0, done), PartState::Available),
                    (Range::by_length(done, rest), PartState::Needed),
                ]
                .into_iter()
                .filter(|(range, _)| !range.is_empty())
                .map(|(range, state)| PartRecord { range, state })
                .collect()
            }
        };

        TransferMessage::PartStates { file: self.file.clone(), parts }
    }

    /// Read frames from `reader` until the file is complete or the
    /// connection is closed.
    ///
    /// On error the pending parts are given back and the listener is told
    /// about the failure. A connection closed between two frames is not an
    /// error, check [`Self::is_completed`] afterwards.
    pub async fn receive<R>(&mut self, reader: &mut R) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        self.counter.started_transfer();

        let r = self.pump(reader).await;

        // whatever is left belongs to a frame of this connection only
        self.ring.clear();

        if !self.finished {
            self.counter.stopped_transfer();
            self.purge_pending();
        }

        if let Err(e) = &r {
            warn!("{}: transfer failed: {e}", self.file);
            if let Some(listener) = &self.listener {
                listener.failed(&self.file, e);
            }
        }

        r
    }

    async fn pump<R>(&mut self, reader: &mut R) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut read_buf = vec![0; READ_SIZE];

        loop {
            while let Some(msg) = self.next_frame()? {
                self.dispatch(msg)?;
            }

            if self.finished || self.is_completed() {
                self.finish();
                return Ok(());
            }

            let max = self.ring.free().min(read_buf.len());
            let n = reader.read(&mut read_buf[..max]).await?;

            if n == 0 {
                if self.ring.is_empty() {
                    debug!("{}: connection closed", self.file);
                    return Ok(());
                }
                return Err(Error::ConnectionClosed);
            }

            self.ring.write(&read_buf[..n])?;
        }
    }

    /// Take the next whole frame out of the ring buffer.
    fn next_frame(&mut self) -> Result<Option<TransferMessage>, Error> {
        let mut head = [0; HEADER_LEN];
        if self.ring.peek_into(&mut head).is_err() {
            return Ok(None);
        }

        let Some(header) = FrameHeader::parse(&head, MAX_BUFFER_SIZE)? else {
            return Ok(None);
        };

        // a frame that can't fit would never be complete
        if header.frame_len() > self.ring.capacity() {
            return Err(Error::FrameTooLarge(
                header.len,
                self.ring.capacity().saturating_sub(HEADER_LEN),
            ));
        }

        if self.ring.available() < header.frame_len() {
            return Ok(None);
        }

        self.ring.skip(HEADER_LEN)?;
        let payload = self.ring.read(header.len)?;

        self.wire.decode_exact(&payload, header.is_compressed()).map(Some)
    }

    fn dispatch(&mut self, msg: TransferMessage) -> Result<(), Error> {
        if msg.file() != &self.file {
            warn!("{}: ignoring message for {}", self.file, msg.file());
            return Ok(());
        }

        match msg {
            TransferMessage::FileChunk { offset, data, .. } => {
                self.on_chunk(offset, &data)
            }
            msg => {
                debug!("{}: ignoring {msg:?}", self.file);
                Ok(())
            }
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.counter.stopped_transfer();

        info!(
            "{}: completed, average {}/s",
            self.file,
            format_bytes(self.counter.calculate_average_cps() as u64)
        );

        if let Some(listener) = &self.listener {
            listener.completed(&self.file);
        }
    }
}
