use crate::net::buffer::RingBuffer;
use crate::net::payload::{self, Payload};
use crate::net::support::{ErrorType, NetworkError, NetworkResult};
use byteorder::{ByteOrder, LittleEndian};

/// Unified frame header: total length (header included) followed by the
/// packet identifier, both little-endian.
pub const HEADER_SIZE: usize = payload::HEADER_SIZE;
pub const MIN_PACKET_SIZE: usize = HEADER_SIZE;
pub const MAX_PACKET_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameHeader {
    pub length: u32,
    pub packet_id: u32,
}

impl FrameHeader {
    #[inline]
    pub fn read(raw: &[u8; HEADER_SIZE]) -> FrameHeader {
        FrameHeader {
            length: LittleEndian::read_u32(&raw[0..4]),
            packet_id: LittleEndian::read_u32(&raw[4..8]),
        }
    }

    #[inline]
    pub fn write(&self, raw: &mut [u8; HEADER_SIZE]) {
        LittleEndian::write_u32(&mut raw[0..4], self.length);
        LittleEndian::write_u32(&mut raw[4..8], self.packet_id);
    }

    /// Validates the advertised length against the protocol bounds and the
    /// payload slot the frame has to fit in.
    #[inline]
    pub fn validate(&self) -> NetworkResult<()> {
        let length = self.length as usize;

        if length < MIN_PACKET_SIZE {
            return Err(NetworkError::Fatal(ErrorType::Malformed));
        }
        if length > MAX_PACKET_SIZE || length > payload::SLOT_SIZE {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }

        Ok(())
    }
}

/// Extracts the next whole frame from the ring, if one is buffered.
///
/// Returns `Ok(None)` while the header or body is still incomplete. A frame
/// that fails validation is a protocol error and poisons the stream - the
/// caller disconnects the session, so no resynchronization is attempted.
pub fn next_frame(ring: &mut RingBuffer) -> NetworkResult<Option<(u32, Payload)>> {
    let mut raw = [0u8; HEADER_SIZE];

    if !ring.peek(&mut raw) {
        return Ok(None);
    }

    let header = FrameHeader::read(&raw);
    header.validate()?;

    let length = header.length as usize;
    if ring.len() < length {
        return Ok(None);
    }

    let mut payload = Payload::alloc();
    {
        let slot = payload.raw_frame_mut(length)?;
        let ok = ring.dequeue(slot);
        debug_assert!(ok, "Frame vanished between peek and dequeue");
    }

    Ok(Some((header.packet_id, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_frame(ring: &mut RingBuffer, packet_id: u32, body: &[u8]) {
        let mut raw = [0u8; HEADER_SIZE];
        let header = FrameHeader {
            length: (HEADER_SIZE + body.len()) as u32,
            packet_id,
        };
        header.write(&mut raw);

        let span = ring.direct_write();
        span[..HEADER_SIZE].copy_from_slice(&raw);
        span[HEADER_SIZE..HEADER_SIZE + body.len()].copy_from_slice(body);
        ring.commit(HEADER_SIZE + body.len());
    }

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader { length: 16, packet_id: 0xABCD };
        let mut raw = [0u8; HEADER_SIZE];
        header.write(&mut raw);

        assert_eq!(FrameHeader::read(&raw), header);
        // Little endian layout is part of the wire contract.
        assert_eq!(raw, [16, 0, 0, 0, 0xCD, 0xAB, 0, 0]);
    }

    #[test]
    fn test_extract_single_frame() {
        let mut ring = RingBuffer::new(1024);
        push_frame(&mut ring, 1, b"hello!!!");

        let (id, mut payload) = next_frame(&mut ring).unwrap().unwrap();
        assert_eq!(id, 1);
        assert_eq!(payload.payload_bytes(), b"hello!!!");

        let mut body = [0u8; 8];
        payload.get_bytes(&mut body).unwrap();
        assert_eq!(&body, b"hello!!!");

        assert!(ring.is_empty());
        assert!(next_frame(&mut ring).unwrap().is_none());
    }

    #[test]
    fn test_extract_back_to_back_frames_in_order() {
        let mut ring = RingBuffer::new(1024);
        push_frame(&mut ring, 1, b"aaaaaaaa");
        push_frame(&mut ring, 2, b"bbbbbbbb");
        push_frame(&mut ring, 3, b"cccccccc");

        for (expect_id, expect_body) in
            [(1u32, b"aaaaaaaa"), (2, b"bbbbbbbb"), (3, b"cccccccc")].iter()
        {
            let (id, payload) = next_frame(&mut ring).unwrap().unwrap();
            assert_eq!(id, *expect_id);
            assert_eq!(payload.payload_bytes(), &expect_body[..]);
        }

        assert!(next_frame(&mut ring).unwrap().is_none());
    }

    #[test]
    fn test_partial_header_waits() {
        let mut ring = RingBuffer::new(64);
        ring.direct_write()[..4].copy_from_slice(&[16, 0, 0, 0]);
        ring.commit(4);

        assert!(next_frame(&mut ring).unwrap().is_none());
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_partial_body_waits() {
        let mut ring = RingBuffer::new(64);
        let header = FrameHeader { length: 16, packet_id: 1 };
        let mut raw = [0u8; HEADER_SIZE];
        header.write(&mut raw);

        let span = ring.direct_write();
        span[..HEADER_SIZE].copy_from_slice(&raw);
        span[HEADER_SIZE..HEADER_SIZE + 3].copy_from_slice(b"abc");
        ring.commit(HEADER_SIZE + 3);

        assert!(next_frame(&mut ring).unwrap().is_none());
        assert_eq!(ring.len(), 11);
    }

    #[test]
    fn test_undersize_length_is_malformed() {
        let mut ring = RingBuffer::new(64);
        let header = FrameHeader { length: 5, packet_id: 1 };
        let mut raw = [0u8; HEADER_SIZE];
        header.write(&mut raw);
        ring.direct_write()[..HEADER_SIZE].copy_from_slice(&raw);
        ring.commit(HEADER_SIZE);

        assert_eq!(
            next_frame(&mut ring).unwrap_err(),
            NetworkError::Fatal(ErrorType::Malformed)
        );
    }

    #[test]
    fn test_oversize_length_is_rejected() {
        let mut ring = RingBuffer::new(64);
        let header = FrameHeader { length: 5_000_000, packet_id: 1 };
        let mut raw = [0u8; HEADER_SIZE];
        header.write(&mut raw);
        ring.direct_write()[..HEADER_SIZE].copy_from_slice(&raw);
        ring.commit(HEADER_SIZE);

        assert_eq!(
            next_frame(&mut ring).unwrap_err(),
            NetworkError::Fatal(ErrorType::PayloadTooLarge)
        );
    }

    #[test]
    fn test_slot_overflow_is_rejected() {
        // Below the protocol ceiling but beyond what a pooled slot holds.
        let mut ring = RingBuffer::new(64);
        let header = FrameHeader {
            length: (crate::net::payload::SLOT_SIZE + 1) as u32,
            packet_id: 1,
        };
        let mut raw = [0u8; HEADER_SIZE];
        header.write(&mut raw);
        ring.direct_write()[..HEADER_SIZE].copy_from_slice(&raw);
        ring.commit(HEADER_SIZE);

        assert_eq!(
            next_frame(&mut ring).unwrap_err(),
            NetworkError::Fatal(ErrorType::PayloadTooLarge)
        );
    }

    #[test]
    fn test_zero_payload_frame() {
        let mut ring = RingBuffer::new(64);
        push_frame(&mut ring, 7, b"");

        let (id, payload) = next_frame(&mut ring).unwrap().unwrap();
        assert_eq!(id, 7);
        assert_eq!(payload.payload_len(), 0);
    }
}
