//! RTMP protocol constants
//!
//! Reference: Adobe RTMP Specification (December 2012)

use std::time::Duration;

/// RTMP version number (always 3 for standard RTMP)
pub const RTMP_VERSION: u8 = 3;

/// Default port for `rtmp://`
pub const RTMP_PORT: u16 = 1935;

/// Default port for `rtmps://` and `rtmpx://`
pub const RTMPS_PORT: u16 = 443;

/// Handshake packet size (C1/C2/S1/S2)
pub const HANDSHAKE_SIZE: usize = 1536;

/// Inbound chunk size until the peer sends Set Chunk Size
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Outbound chunk size announced right after the handshake
pub const RECOMMENDED_CHUNK_SIZE: u32 = 4096;

/// Maximum chunk size we are willing to send
pub const MAX_CHUNK_SIZE: u32 = 0xFFFFFF;

/// Maximum message size (message length is a 24-bit field)
pub const MAX_MESSAGE_SIZE: u32 = 0xFFFFFF;

/// Timestamps at or above this value use the extended timestamp field
pub const EXTENDED_TIMESTAMP_THRESHOLD: u32 = 0xFFFFFF;

/// Default socket read buffer size
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default TCP connect timeout for clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default server handshake deadline
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for producer codec discovery
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// Chunk Stream IDs (CSID)
// ============================================================================

/// Protocol control messages (Set Chunk Size, Abort, etc.)
pub const CSID_PROTOCOL_CONTROL: u32 = 2;

/// Command messages (connect, createStream, etc.)
pub const CSID_COMMAND: u32 = 3;

/// Audio data
pub const CSID_AUDIO: u32 = 4;

/// Script data (onMetaData)
pub const CSID_DATA: u32 = 5;

/// Video data
pub const CSID_VIDEO: u32 = 6;

// ============================================================================
// Message Type IDs
// ============================================================================

pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_ABORT: u8 = 2;
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;

/// AMF3 data message, one format byte then AMF0 body
pub const MSG_DATA_AMF3: u8 = 15;

/// AMF3 command message, one format byte then AMF0 body
pub const MSG_COMMAND_AMF3: u8 = 17;

/// AMF0 data message (@setDataFrame, onMetaData)
pub const MSG_DATA_AMF0: u8 = 18;

/// AMF0 command message (connect, play, publish, etc.)
pub const MSG_COMMAND_AMF0: u8 = 20;

// ============================================================================
// Command Names
// ============================================================================

pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_PLAY: &str = "play";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_RELEASE_STREAM: &str = "releaseStream";
pub const CMD_FC_PUBLISH: &str = "FCPublish";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ERROR: &str = "_error";
pub const CMD_ON_STATUS: &str = "onStatus";
pub const CMD_SET_DATA_FRAME: &str = "@setDataFrame";
pub const CMD_ON_METADATA: &str = "onMetaData";

// ============================================================================
// Status Codes
// ============================================================================

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_PLAY_START: &str = "NetStream.Play.Start";

/// Prefix accepted as a successful play reply (Start, Reset, PublishNotify...)
pub const NS_PLAY_PREFIX: &str = "NetStream.Play.";

/// Server version announced in the connect result
pub const FMS_VERSION: &str = "FMS/3,0,1,123";

/// Flash version the client announces in connect
pub const DEFAULT_FLASH_VER: &str = "FMLE/3.0 (compatible; FMSc/1.0)";
