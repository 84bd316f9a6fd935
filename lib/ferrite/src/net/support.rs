use std::io;
use std::net;

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Two tier error plumbing: `Wait` means the operation cannot make progress
/// right now and should be retried on the next readiness cycle, `Fatal`
/// terminates the session it occurred on.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    /// Frame length below the unified header size.
    Malformed,
    /// Frame length beyond the protocol ceiling or the payload slot size.
    PayloadTooLarge,
    /// Session send queue exceeded the configured limit.
    QueueOverflow,
    /// No free session slot for an incoming connection.
    SessionExhausted,
    /// Packet identifier with no registered handler. Fatal only under the
    /// strict packet id policy.
    UnknownPacket,
    /// Payload accessor ran past the written data, or an encoder was handed
    /// a payload that is already shared.
    Serialization,
    AddrParse,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

impl From<net::AddrParseError> for NetworkError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NetworkError::Fatal(ErrorType::AddrParse)
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetworkError::Wait) => false,
            _ => true,
        }
    }
}
