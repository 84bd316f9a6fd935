use crate::net::support::{ErrorType, NetworkError, NetworkResult};
use byteorder::{ByteOrder, LittleEndian};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::Arc;

pub const HEADER_SIZE: usize = 8;
pub const MAX_PAYLOAD_LEN: usize = 8000;

/// Full slot size of a pooled buffer: unified header plus payload.
pub const SLOT_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_LEN;

/// How many buffers a thread keeps to itself before spilling into the
/// shared backing store.
const LOCAL_FREE_LIMIT: usize = 64;

lazy_static! {
    static ref GLOBAL_POOL: Mutex<Vec<PayloadBuf>> = Mutex::new(Vec::new());
}

thread_local! {
    static LOCAL_POOL: RefCell<Vec<PayloadBuf>> = RefCell::new(Vec::new());
}

/// Preallocates `count` buffers into the shared backing store. Called once
/// at process start so steady-state traffic never allocates.
pub fn warm(count: usize) {
    let mut pool = GLOBAL_POOL.lock();
    while pool.len() < count {
        pool.push(PayloadBuf::new());
    }
}

/// Number of buffers currently parked in the shared backing store.
pub fn pooled() -> usize {
    GLOBAL_POOL.lock().len()
}

#[derive(Debug)]
struct PayloadBuf {
    data: Box<[u8]>,
    /// End of written data, measured from the start of the slot. Never
    /// below `HEADER_SIZE`: the header area is reserved on reset.
    write: usize,
    /// Read cursor for the payload accessors.
    read: usize,
}

impl PayloadBuf {
    fn new() -> PayloadBuf {
        PayloadBuf {
            data: vec![0u8; SLOT_SIZE].into_boxed_slice(),
            write: HEADER_SIZE,
            read: HEADER_SIZE,
        }
    }

    #[inline]
    fn reset(&mut self) {
        self.write = HEADER_SIZE;
        self.read = HEADER_SIZE;
    }
}

/// A pooled, reference-counted message buffer. The slot layout is the wire
/// frame itself: 8 bytes of unified header followed by up to
/// `MAX_PAYLOAD_LEN` bytes of payload, so a stamped buffer is sent verbatim.
///
/// `clone` shares the underlying buffer (one payload queued to several
/// sessions is not copied); dropping the last handle returns the buffer to
/// the pool. Writes and reads require the handle to be unique - mutating a
/// shared payload reports `Serialization` instead of corrupting a peer.
#[derive(Debug)]
pub struct Payload {
    inner: Option<Arc<PayloadBuf>>,
}

impl Payload {
    /// Fetches a buffer from the pool (thread-local free list first, then
    /// the shared store), allocating only when both are empty.
    pub fn alloc() -> Payload {
        let buf = LOCAL_POOL
            .with(|local| local.borrow_mut().pop())
            .or_else(|| GLOBAL_POOL.lock().pop())
            .map(|mut buf| {
                buf.reset();
                buf
            })
            .unwrap_or_else(PayloadBuf::new);

        Payload { inner: Some(Arc::new(buf)) }
    }

    #[inline]
    fn buf(&self) -> &PayloadBuf {
        self.inner.as_ref().expect("Payload accessed after drop")
    }

    #[inline]
    fn buf_mut(&mut self) -> NetworkResult<&mut PayloadBuf> {
        let arc = self.inner.as_mut().expect("Payload accessed after drop");
        Arc::get_mut(arc).ok_or(NetworkError::Fatal(ErrorType::Serialization))
    }

    /// Rewinds the buffer to an empty payload. Fails on a shared handle.
    pub fn reset(&mut self) -> NetworkResult<()> {
        self.buf_mut()?.reset();
        Ok(())
    }

    /// Number of payload bytes written so far.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.buf().write - HEADER_SIZE
    }

    /// Remaining free payload capacity.
    #[inline]
    pub fn remaining(&self) -> usize {
        SLOT_SIZE - self.buf().write
    }

    /// Payload bytes not yet consumed by the `get_*` accessors.
    #[inline]
    pub fn unread(&self) -> usize {
        self.buf().write - self.buf().read
    }

    /// The written payload region.
    #[inline]
    pub fn payload_bytes(&self) -> &[u8] {
        let buf = self.buf();
        &buf.data[HEADER_SIZE..buf.write]
    }

    /// The whole frame: header area plus written payload. Valid for the
    /// wire once `stamp_header` has run.
    #[inline]
    pub fn frame_bytes(&self) -> &[u8] {
        let buf = self.buf();
        &buf.data[..buf.write]
    }

    /// Total frame length (header included) as it will appear on the wire.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.buf().write
    }

    /// Writes the unified header `{length, packet_id}` over the reserved
    /// header area. The length covers the header itself.
    pub fn stamp_header(&mut self, packet_id: u32) -> NetworkResult<()> {
        let buf = self.buf_mut()?;
        let total = buf.write as u32;
        LittleEndian::write_u32(&mut buf.data[0..4], total);
        LittleEndian::write_u32(&mut buf.data[4..8], packet_id);
        Ok(())
    }

    /// Packet id previously stamped into the header area.
    #[inline]
    pub fn packet_id(&self) -> u32 {
        LittleEndian::read_u32(&self.buf().data[4..8])
    }

    pub fn put_bytes(&mut self, src: &[u8]) -> NetworkResult<()> {
        if self.remaining() < src.len() {
            return Err(NetworkError::Fatal(ErrorType::Serialization));
        }
        let buf = self.buf_mut()?;
        buf.data[buf.write..buf.write + src.len()].copy_from_slice(src);
        buf.write += src.len();
        Ok(())
    }

    pub fn get_bytes(&mut self, dst: &mut [u8]) -> NetworkResult<()> {
        if self.unread() < dst.len() {
            return Err(NetworkError::Fatal(ErrorType::Serialization));
        }
        let buf = self.buf_mut()?;
        dst.copy_from_slice(&buf.data[buf.read..buf.read + dst.len()]);
        buf.read += dst.len();
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> NetworkResult<()> {
        self.put_bytes(&[value])
    }

    pub fn get_u8(&mut self) -> NetworkResult<u8> {
        let mut raw = [0u8; 1];
        self.get_bytes(&mut raw)?;
        Ok(raw[0])
    }

    pub fn put_u16(&mut self, value: u16) -> NetworkResult<()> {
        let mut raw = [0u8; 2];
        LittleEndian::write_u16(&mut raw, value);
        self.put_bytes(&raw)
    }

    pub fn get_u16(&mut self) -> NetworkResult<u16> {
        let mut raw = [0u8; 2];
        self.get_bytes(&mut raw)?;
        Ok(LittleEndian::read_u16(&raw))
    }

    pub fn put_u32(&mut self, value: u32) -> NetworkResult<()> {
        let mut raw = [0u8; 4];
        LittleEndian::write_u32(&mut raw, value);
        self.put_bytes(&raw)
    }

    pub fn get_u32(&mut self) -> NetworkResult<u32> {
        let mut raw = [0u8; 4];
        self.get_bytes(&mut raw)?;
        Ok(LittleEndian::read_u32(&raw))
    }

    pub fn put_u64(&mut self, value: u64) -> NetworkResult<()> {
        let mut raw = [0u8; 8];
        LittleEndian::write_u64(&mut raw, value);
        self.put_bytes(&raw)
    }

    pub fn get_u64(&mut self) -> NetworkResult<u64> {
        let mut raw = [0u8; 8];
        self.get_bytes(&mut raw)?;
        Ok(LittleEndian::read_u64(&raw))
    }

    pub fn put_f32(&mut self, value: f32) -> NetworkResult<()> {
        let mut raw = [0u8; 4];
        LittleEndian::write_f32(&mut raw, value);
        self.put_bytes(&raw)
    }

    pub fn get_f32(&mut self) -> NetworkResult<f32> {
        let mut raw = [0u8; 4];
        self.get_bytes(&mut raw)?;
        Ok(LittleEndian::read_f32(&raw))
    }

    /// Exposes the raw slot for the framing path to fill header and payload
    /// in one dequeue. `len` is the total frame length.
    pub(crate) fn raw_frame_mut(&mut self, len: usize) -> NetworkResult<&mut [u8]> {
        debug_assert!(len >= HEADER_SIZE && len <= SLOT_SIZE);
        let buf = self.buf_mut()?;
        buf.write = len;
        buf.read = HEADER_SIZE;
        Ok(&mut buf.data[..len])
    }

    /// Reference count of the underlying buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(self.inner.as_ref().expect("Payload accessed after drop"))
    }
}

impl Clone for Payload {
    #[inline]
    fn clone(&self) -> Payload {
        Payload { inner: self.inner.clone() }
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        let arc = match self.inner.take() {
            Some(arc) => arc,
            None => return,
        };

        // The last handle recycles the buffer instead of freeing it.
        if let Ok(buf) = Arc::try_unwrap(arc) {
            let spill = LOCAL_POOL.with(|local| {
                let mut local = local.borrow_mut();
                if local.len() < LOCAL_FREE_LIMIT {
                    local.push(buf);
                    None
                } else {
                    Some(buf)
                }
            });

            if let Some(buf) = spill {
                GLOBAL_POOL.lock().push(buf);
            }
        }
    }
}
