//! Unified error types for the relay

use std::fmt;
use std::io;

use crate::amf::AmfValue;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all relay operations
#[derive(Debug)]
pub enum Error {
    /// I/O error on the underlying transport
    Io(io::Error),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// AMF decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// Media parsing error
    Media(MediaError),
    /// Operation timed out
    Timeout,
    /// Peer closed the connection at a message boundary
    ConnectionClosed,
    /// Invalid configuration
    Config(String),
}

impl Error {
    /// True when the peer simply went away: clean close or a transport EOF.
    ///
    /// Callers use this to keep end-of-stream out of warning logs.
    pub fn is_end_of_stream(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Amf(e) => Some(e),
            Error::Handshake(e) => Some(e),
            Error::Media(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

impl From<MediaError> for Error {
    fn from(err: MediaError) -> Self {
        Error::Media(err)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Protocol-level errors
#[derive(Debug)]
pub enum ProtocolError {
    InvalidChunkHeader,
    /// Compressed chunk header on a chunk stream that never carried a full one
    UnknownChunkStream(u32),
    MessageTooLarge { size: u32, max: u32 },
    InvalidChunkSize(u32),
    /// Peer answered a command with something other than the expected status
    UnexpectedResponse(Vec<AmfValue>),
    MissingField(String),
    InvalidCommand(String),
    InvalidUrl(String),
    UnsupportedScheme(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::UnknownChunkStream(id) => {
                write!(f, "Compressed header on unknown chunk stream: {}", id)
            }
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::InvalidChunkSize(size) => write!(f, "Invalid chunk size: {}", size),
            ProtocolError::UnexpectedResponse(values) => {
                write!(f, "Unexpected response: {:?}", values)
            }
            ProtocolError::MissingField(field) => write!(f, "Missing required field: {}", field),
            ProtocolError::InvalidCommand(cmd) => write!(f, "Invalid command: {}", cmd),
            ProtocolError::InvalidUrl(url) => write!(f, "Invalid URL: {}", url),
            ProtocolError::UnsupportedScheme(scheme) => {
                write!(f, "Unsupported URL scheme: {}", scheme)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF decoding errors
///
/// Kept apart from transport errors: a caller can retry decoding another buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmfError {
    UnknownMarker(u8),
    UnexpectedEof,
    InvalidUtf8,
    NestingTooDeep,
    /// String longer than its length prefix can express
    StringTooLong(usize),
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnknownMarker(m) => write!(f, "Unknown AMF marker: 0x{:02x}", m),
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
            AmfError::NestingTooDeep => write!(f, "AMF nesting too deep"),
            AmfError::StringTooLong(len) => write!(f, "AMF string too long: {} bytes", len),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    InvalidVersion(u8),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "Invalid RTMP version: {}", v),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Media parsing errors
#[derive(Debug)]
pub enum MediaError {
    InvalidFlvHeader,
    InvalidFlvTag,
    InvalidAvcPacket,
    InvalidAacPacket,
    UnsupportedCodec(String),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::InvalidFlvHeader => write!(f, "Invalid FLV header"),
            MediaError::InvalidFlvTag => write!(f, "Invalid FLV tag"),
            MediaError::InvalidAvcPacket => write!(f, "Invalid AVC packet"),
            MediaError::InvalidAacPacket => write!(f, "Invalid AAC packet"),
            MediaError::UnsupportedCodec(c) => write!(f, "Unsupported codec: {}", c),
        }
    }
}

impl std::error::Error for MediaError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_error_display() {
        let err = Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(err.to_string().contains("I/O error"));

        let err = Error::Protocol(ProtocolError::UnknownChunkStream(7));
        assert!(err.to_string().contains("Protocol error"));
        assert!(err.to_string().contains("7"));

        let err = Error::Amf(AmfError::UnknownMarker(0xFF));
        assert!(err.to_string().contains("0xff"));

        let err = Error::Handshake(HandshakeError::InvalidVersion(6));
        assert!(err.to_string().contains("version: 6"));

        let err = Error::Media(MediaError::UnsupportedCodec("VP9".into()));
        assert!(err.to_string().contains("VP9"));

        let err = Error::Config("bad url".into());
        assert!(err.to_string().contains("bad url"));

        assert!(Error::Timeout.to_string().contains("timed out"));
        assert!(Error::ConnectionClosed.to_string().contains("closed"));
    }

    #[test]
    fn test_unexpected_response_display() {
        let err = ProtocolError::UnexpectedResponse(vec![
            AmfValue::String("_error".into()),
            AmfValue::Number(1.0),
        ]);
        assert!(err.to_string().contains("_error"));
    }

    #[test]
    fn test_error_source() {
        let err = Error::from(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(err.source().is_some());

        let err = Error::from(AmfError::UnexpectedEof);
        assert!(err.source().is_some());

        assert!(Error::Timeout.source().is_none());
    }

    #[test]
    fn test_end_of_stream_classification() {
        assert!(Error::ConnectionClosed.is_end_of_stream());
        assert!(Error::Io(io::ErrorKind::UnexpectedEof.into()).is_end_of_stream());
        assert!(!Error::Io(io::ErrorKind::PermissionDenied.into()).is_end_of_stream());
        assert!(!Error::Amf(AmfError::UnexpectedEof).is_end_of_stream());
        assert!(!Error::Timeout.is_end_of_stream());
    }

    #[test]
    fn test_amf_error_is_distinct_from_io() {
        let err: Error = AmfError::UnknownMarker(0x42).into();
        assert!(matches!(err, Error::Amf(AmfError::UnknownMarker(0x42))));
    }
}
