use std::io;

// Size of a single read off the socket
const READ_CHUNK: usize = 16384;

/// A growable FIFO byte queue. Data is appended at the tail and consumed from the head. The consumed
/// prefix is reclaimed lazily, once it makes up the larger part of the storage.
pub struct Buffer {
    data: Vec<u8>,
    head: usize,
    limit: usize,
}

impl Buffer {
    /// Creates a buffer that stops reading once it holds `limit` unread bytes.
    #[inline]
    pub fn new(limit: usize) -> Buffer {
        Buffer {
            data: Vec::with_capacity(READ_CHUNK),
            head: 0,
            limit,
        }
    }

    /// The number of unread bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    /// Returns true in case the buffer is empty, false otherwise.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once reads have to wait for the unread data to be consumed.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.limit
    }

    /// Remaining room before the limit is hit.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.limit.saturating_sub(self.len())
    }

    /// Slice containing unread data.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        &self.data[self.head..]
    }

    /// Mutable slice containing unread data. Used for in place decryption.
    #[inline]
    pub fn data_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.head..]
    }

    /// Advance the head, discarding `count` bytes.
    #[inline]
    pub fn move_head(&mut self, count: usize) {
        self.head = (self.head + count).min(self.data.len());

        if self.head == self.data.len() {
            self.data.clear();
            self.head = 0;
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }

    /// Appends the supplied bytes at the tail.
    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) {
        self.compact();
        self.data.extend_from_slice(bytes);
    }

    /// Write the contents of the buffer to the supplied writer, advancing the read offset. Stops early
    /// when the writer would block.
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> io::Result<usize> {
        let orig_len = self.len();

        while !self.is_empty() {
            let write_count = match writer.write(self.read_slice()) {
                Ok(count) => count,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            };

            if write_count == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }

            self.move_head(write_count);
        }

        Ok(orig_len - self.len())
    }

    /// Read in data from the supplied reader until it would block or the buffer is full. The bytes
    /// read before an end of stream are kept, the end itself is reported as `UnexpectedEof`.
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let orig_len = self.len();
        let mut chunk = [0u8; READ_CHUNK];

        self.compact();

        while self.len() < self.limit {
            let wanted = READ_CHUNK.min(self.limit - self.len());

            let read_count = match reader.read(&mut chunk[..wanted]) {
                Ok(count) => count,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(self.len() - orig_len)
                }
                Err(err) => return Err(err),
            };

            if read_count == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }

            self.data.extend_from_slice(&chunk[..read_count]);
        }

        Ok(self.len() - orig_len)
    }

    /// Drops the consumed prefix once it outweighs the unread data.
    #[inline]
    fn compact(&mut self) {
        if self.head > 0 && self.head >= self.len() {
            self.data.drain(..self.head);
            self.head = 0;
        }
    }
}
