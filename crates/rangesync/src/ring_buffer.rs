//! Fixed-capacity ring buffer used to stream bytes from a connection to the
//! chunk assembler.
//!
//! The buffer is not synchronized, it is owned by the session of one
//! connection which is both the producer and the consumer.
use crate::error::Error;

/// Default capacity, enough to hold a couple of full sized chunks.
pub const DEFAULT_CAPACITY: usize = 128 * 1024;

#[derive(Debug, Clone)]
pub struct CircularByteBuffer {
    buf: Box<[u8]>,
    /// Index of the next byte to be read.
    read_pos: usize,
    /// Number of unread bytes, never larger than the capacity.
    available: usize,
}

impl Default for CircularByteBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CircularByteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            read_pos: 0,
            available: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn available(&self) -> usize {
        self.available
    }

    /// How many bytes can still be written.
    pub fn free(&self) -> usize {
        self.capacity() - self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.available = 0;
    }

    /// Append all of `data`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::BufferOverflow`] and writes nothing if `data` does
    /// not fit in the free space.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() > self.free() {
            return Err(Error::BufferOverflow {
                requested: data.len(),
                free: self.free(),
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        let cap = self.capacity();
        let write_pos = (self.read_pos + self.available) % cap;
        let first = (cap - write_pos).min(data.len());

        self.buf[write_pos..write_pos + first].copy_from_slice(&data[..first]);
        self.buf[..data.len() - first].copy_from_slice(&data[first..]);

        self.available += data.len();
        Ok(())
    }

    /// Copy the next `dst.len()` bytes into `dst` without consuming them.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::BufferUnderflow`] if fewer bytes are available.
    pub fn peek_into(&self, dst: &mut [u8]) -> Result<(), Error> {
        if dst.len() > self.available {
            return Err(Error::BufferUnderflow {
                requested: dst.len(),
                available: self.available,
            });
        }
        if dst.is_empty() {
            return Ok(());
        }

        let cap = self.capacity();
        let first = (cap - self.read_pos).min(dst.len());
        let rest = dst.len() - first;

        dst[..first]
            .copy_from_slice(&self.buf[self.read_pos..self.read_pos + first]);
        dst[first..].copy_from_slice(&self.buf[..rest]);

        Ok(())
    }

    /// Move the next `dst.len()` bytes into `dst`.
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<(), Error> {
        self.peek_into(dst)?;
        self.consume(dst.len());
        Ok(())
    }

    /// Return the next `count` bytes without consuming them.
    pub fn peek(&self, count: usize) -> Result<Vec<u8>, Error> {
        let mut dst = vec![0; count];
        self.peek_into(&mut dst)?;
        Ok(dst)
    }

    /// Consume and return the next `count` bytes.
    pub fn read(&mut self, count: usize) -> Result<Vec<u8>, Error> {
        let mut dst = vec![0; count];
        self.read_into(&mut dst)?;
        Ok(dst)
    }

    /// Drop the next `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<(), Error> {
        if count > self.available {
            return Err(Error::BufferUnderflow {
                requested: count,
                available: self.available,
            });
        }
        self.consume(count);
        Ok(())
    }

    fn consume(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.available -= count;
        self.read_pos = if self.available == 0 {
            0
        } else {
            (self.read_pos + count) % self.capacity()
        };
    }
}
