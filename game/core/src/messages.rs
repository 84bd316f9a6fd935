//! Wire messages of the game protocol. Packet identifiers are FNV-1a
//! hashes of the message name; payload fields are little-endian, strings
//! are a u16 length followed by utf-8 bytes.

use ferrite::prelude::{Decode, NetworkError, NetworkResult, Payload};
use ferrite::net::support::ErrorType;

/// 32-bit FNV-1a over the message name.
pub const fn fnv1a(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut hash: u32 = 0x811c_9dc5;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(0x0100_0193);
        i += 1;
    }
    hash
}

pub const CG_LOGIN: u32 = fnv1a("game.CgLogin");
pub const GC_LOGIN_OK: u32 = fnv1a("game.GcLoginOk");
pub const CG_MOVE: u32 = fnv1a("game.CgMove");
pub const GC_MOVE: u32 = fnv1a("game.GcMove");
pub const GC_APPEAR: u32 = fnv1a("game.GcAppear");
pub const GC_DISAPPEAR: u32 = fnv1a("game.GcDisappear");
pub const CG_ECHO: u32 = fnv1a("game.CgEcho");
pub const GC_ECHO: u32 = fnv1a("game.GcEcho");

/// Outbound message: knows its packet id and writes itself into a payload.
pub trait Encode {
    const PACKET_ID: u32;

    fn encode(&self, payload: &mut Payload) -> NetworkResult<()>;

    /// Allocates a pooled payload, encodes and stamps the header.
    fn to_payload(&self) -> NetworkResult<Payload> {
        let mut payload = Payload::alloc();
        self.encode(&mut payload)?;
        payload.stamp_header(Self::PACKET_ID)?;
        Ok(payload)
    }
}

fn put_string(payload: &mut Payload, value: &str) -> NetworkResult<()> {
    if value.len() > u16::max_value() as usize {
        return Err(NetworkError::Fatal(ErrorType::Serialization));
    }
    payload.put_u16(value.len() as u16)?;
    payload.put_bytes(value.as_bytes())
}

fn get_string(payload: &mut Payload) -> NetworkResult<String> {
    let len = payload.get_u16()? as usize;
    let mut raw = vec![0u8; len];
    payload.get_bytes(&mut raw)?;
    String::from_utf8(raw).map_err(|_| NetworkError::Fatal(ErrorType::Serialization))
}

// ------------------------------------------------------------------
// Login
// ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CgLogin {
    pub name: String,
}

impl Encode for CgLogin {
    const PACKET_ID: u32 = CG_LOGIN;

    fn encode(&self, payload: &mut Payload) -> NetworkResult<()> {
        put_string(payload, &self.name)
    }
}

impl Decode for CgLogin {
    fn decode(payload: &mut Payload) -> NetworkResult<CgLogin> {
        Ok(CgLogin { name: get_string(payload)? })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GcLoginOk {
    pub sn: u64,
}

impl Encode for GcLoginOk {
    const PACKET_ID: u32 = GC_LOGIN_OK;

    fn encode(&self, payload: &mut Payload) -> NetworkResult<()> {
        payload.put_u64(self.sn)
    }
}

impl Decode for GcLoginOk {
    fn decode(payload: &mut Payload) -> NetworkResult<GcLoginOk> {
        Ok(GcLoginOk { sn: payload.get_u64()? })
    }
}

// ------------------------------------------------------------------
// Movement
// ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CgMove {
    pub x: f32,
    pub z: f32,
}

impl Encode for CgMove {
    const PACKET_ID: u32 = CG_MOVE;

    fn encode(&self, payload: &mut Payload) -> NetworkResult<()> {
        payload.put_f32(self.x)?;
        payload.put_f32(self.z)
    }
}

impl Decode for CgMove {
    fn decode(payload: &mut Payload) -> NetworkResult<CgMove> {
        Ok(CgMove {
            x: payload.get_f32()?,
            z: payload.get_f32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GcMove {
    pub sn: u64,
    pub x: f32,
    pub z: f32,
}

impl Encode for GcMove {
    const PACKET_ID: u32 = GC_MOVE;

    fn encode(&self, payload: &mut Payload) -> NetworkResult<()> {
        payload.put_u64(self.sn)?;
        payload.put_f32(self.x)?;
        payload.put_f32(self.z)
    }
}

impl Decode for GcMove {
    fn decode(payload: &mut Payload) -> NetworkResult<GcMove> {
        Ok(GcMove {
            sn: payload.get_u64()?,
            x: payload.get_f32()?,
            z: payload.get_f32()?,
        })
    }
}

// ------------------------------------------------------------------
// Interest notifications
// ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct GcAppear {
    pub sn: u64,
}

impl Encode for GcAppear {
    const PACKET_ID: u32 = GC_APPEAR;

    fn encode(&self, payload: &mut Payload) -> NetworkResult<()> {
        payload.put_u64(self.sn)
    }
}

impl Decode for GcAppear {
    fn decode(payload: &mut Payload) -> NetworkResult<GcAppear> {
        Ok(GcAppear { sn: payload.get_u64()? })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GcDisappear {
    pub sn: u64,
}

impl Encode for GcDisappear {
    const PACKET_ID: u32 = GC_DISAPPEAR;

    fn encode(&self, payload: &mut Payload) -> NetworkResult<()> {
        payload.put_u64(self.sn)
    }
}

impl Decode for GcDisappear {
    fn decode(payload: &mut Payload) -> NetworkResult<GcDisappear> {
        Ok(GcDisappear { sn: payload.get_u64()? })
    }
}

// ------------------------------------------------------------------
// Echo
// ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CgEcho {
    pub data: Vec<u8>,
}

impl Encode for CgEcho {
    const PACKET_ID: u32 = CG_ECHO;

    fn encode(&self, payload: &mut Payload) -> NetworkResult<()> {
        payload.put_bytes(&self.data)
    }
}

impl Decode for CgEcho {
    fn decode(payload: &mut Payload) -> NetworkResult<CgEcho> {
        let mut data = vec![0u8; payload.unread()];
        payload.get_bytes(&mut data)?;
        Ok(CgEcho { data })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GcEcho {
    pub data: Vec<u8>,
}

impl Encode for GcEcho {
    const PACKET_ID: u32 = GC_ECHO;

    fn encode(&self, payload: &mut Payload) -> NetworkResult<()> {
        payload.put_bytes(&self.data)
    }
}

impl Decode for GcEcho {
    fn decode(payload: &mut Payload) -> NetworkResult<GcEcho> {
        let mut data = vec![0u8; payload.unread()];
        payload.get_bytes(&mut data)?;
        Ok(GcEcho { data })
    }
}
