use std::io;

/// A fixed-capacity byte ring with power-of-two masking. Data is written at
/// the rear and read from the front; the region between the masked rear and
/// the physical end of the storage is exposed as a contiguous "direct" write
/// span, the remainder (after the wrap) as a second span, so a socket read
/// can land straight in the buffer without an intermediate copy.
pub struct RingBuffer {
    data: Box<[u8]>,
    mask: usize,
    front: usize,
    rear: usize,
}

impl RingBuffer {
    #[inline]
    pub fn new(capacity: usize) -> RingBuffer {
        if !capacity.is_power_of_two() {
            panic!("Ring capacity must be a power of two, got {}", capacity);
        }

        RingBuffer {
            data: vec![0u8; capacity].into_boxed_slice(),
            mask: capacity - 1,
            front: 0,
            rear: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The number of readable bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.rear.wrapping_sub(self.front)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.front == self.rear
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Remaining free capacity in the buffer.
    #[inline]
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.front = 0;
        self.rear = 0;
    }

    /// Contiguous writable span starting at the rear. Empty when full.
    #[inline]
    pub fn direct_write(&mut self) -> &mut [u8] {
        let rear = self.rear & self.mask;
        let span = self.capacity() - rear;
        let free = self.free();
        let len = if span < free { span } else { free };
        &mut self.data[rear..rear + len]
    }

    /// Writable span after the wrap point. Empty unless the free region
    /// straddles the end of the storage.
    #[inline]
    pub fn wrap_write(&mut self) -> &mut [u8] {
        let rear = self.rear & self.mask;
        let span = self.capacity() - rear;
        let free = self.free();
        if free <= span {
            return &mut self.data[0..0];
        }
        &mut self.data[0..free - span]
    }

    /// Commits `count` bytes previously written into the write spans.
    #[inline]
    pub fn commit(&mut self, count: usize) {
        debug_assert!(count <= self.free(), "Commit beyond free capacity");
        self.rear = self.rear.wrapping_add(count);
    }

    /// Copies up to `dst.len()` bytes from the front without consuming them.
    /// Returns false if the buffer holds fewer bytes than requested.
    pub fn peek(&self, dst: &mut [u8]) -> bool {
        if dst.len() > self.len() {
            return false;
        }

        for (i, slot) in dst.iter_mut().enumerate() {
            *slot = self.data[self.front.wrapping_add(i) & self.mask];
        }

        true
    }

    /// Copies and consumes `dst.len()` bytes from the front. Returns false
    /// (consuming nothing) if the buffer holds fewer bytes than requested.
    pub fn dequeue(&mut self, dst: &mut [u8]) -> bool {
        if !self.peek(dst) {
            return false;
        }

        self.front = self.front.wrapping_add(dst.len());
        true
    }

    /// Discards `count` bytes from the front.
    #[inline]
    pub fn skip(&mut self, count: usize) {
        debug_assert!(count <= self.len(), "Skip beyond buffered data");
        self.front = self.front.wrapping_add(count);
    }

    /// Reads from the supplied reader into the ring until the reader would
    /// block, the stream ends, or the ring fills up. Returns the number of
    /// bytes read and whether end-of-stream was observed.
    pub fn read_from<R: io::Read>(&mut self, reader: &mut R) -> io::Result<(usize, bool)> {
        let mut total = 0;

        loop {
            if self.is_full() {
                return Ok((total, false));
            }

            let count = {
                let span = self.direct_write();
                match reader.read(span) {
                    Ok(0) => return Ok((total, true)),
                    Ok(count) => count,
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                        return Ok((total, false));
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err),
                }
            };

            self.commit(count);
            total += count;
        }
    }
}
