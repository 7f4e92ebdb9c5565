//! RTMP command messages
//!
//! A command is an AMF0 sequence on the command channel:
//!
//! ```text
//! [name: String] [transaction id: Number] [command object] [arguments...]
//! ```
//!
//! Replies reuse the request's transaction id (`_result` / `_error`), while
//! `onStatus` notifications usually carry 0.

use bytes::Bytes;

use crate::amf::{amf0, AmfObject, AmfValue};
use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// Decoded command message
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Third item, `null` for most stream commands
    pub command_object: AmfValue,
    /// Everything after the command object
    pub arguments: Vec<AmfValue>,
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: f64) -> Self {
        Self {
            name: name.into(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments: Vec::new(),
        }
    }

    pub fn with_object(mut self, object: impl Into<AmfValue>) -> Self {
        self.command_object = object.into();
        self
    }

    pub fn with_arg(mut self, arg: impl Into<AmfValue>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// Build a command from decoded AMF values
    ///
    /// Only the name is mandatory; a missing transaction id reads as 0.
    pub fn from_values(values: Vec<AmfValue>) -> Result<Self> {
        let mut iter = values.into_iter();

        let name = match iter.next() {
            Some(AmfValue::String(name)) => name,
            other => {
                return Err(ProtocolError::InvalidCommand(format!("{:?}", other)).into());
            }
        };
        let transaction_id = iter.next().and_then(|v| v.as_number()).unwrap_or(0.0);
        let command_object = iter.next().unwrap_or_default();

        Ok(Self {
            name,
            transaction_id,
            command_object,
            arguments: iter.collect(),
        })
    }

    /// Decode a command message payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Self::from_values(amf0::decode_all(payload)?)
    }

    /// All items in wire order
    pub fn values(&self) -> Vec<AmfValue> {
        let mut values = Vec::with_capacity(3 + self.arguments.len());
        values.push(AmfValue::String(self.name.clone()));
        values.push(AmfValue::Number(self.transaction_id));
        values.push(self.command_object.clone());
        values.extend(self.arguments.iter().cloned());
        values
    }

    /// Encode as an AMF0 command payload
    pub fn encode(&self) -> Result<Bytes> {
        Ok(amf0::encode_all(&self.values())?)
    }

    /// Whether this message answers the request with `transaction_id`
    ///
    /// Some cameras answer with transaction id 0, so that is accepted too.
    pub fn is_reply_to(&self, transaction_id: f64) -> bool {
        matches!(self.name.as_str(), CMD_RESULT | CMD_ERROR | CMD_ON_STATUS)
            && (self.transaction_id == transaction_id || self.transaction_id == 0.0)
    }

    pub fn is_error(&self) -> bool {
        self.name == CMD_ERROR
    }

    /// `code` of the info object (fourth item) of a status reply
    pub fn status_code(&self) -> Option<&str> {
        self.arguments.first()?.get_string("code")
    }

    /// Argument as string, e.g. the stream name of publish/play
    pub fn string_arg(&self, idx: usize) -> Option<&str> {
        self.arguments.get(idx)?.as_str()
    }

    /// Argument as number, e.g. the stream id of a createStream result
    pub fn number_arg(&self, idx: usize) -> Option<f64> {
        self.arguments.get(idx)?.as_number()
    }

    /// Turn an unexpected reply into an error carrying the whole reply
    pub fn into_unexpected(self) -> crate::error::Error {
        ProtocolError::UnexpectedResponse(self.values()).into()
    }

    // ------------------------------------------------------------------
    // Client requests
    // ------------------------------------------------------------------

    pub fn connect(transaction_id: f64, app: &str, flash_ver: &str, tc_url: &str) -> Self {
        let object = AmfObject::new()
            .with("app", app)
            .with("flashVer", flash_ver)
            .with("tcUrl", tc_url);
        Self::new(CMD_CONNECT, transaction_id).with_object(object)
    }

    pub fn release_stream(transaction_id: f64, stream: &str) -> Self {
        Self::new(CMD_RELEASE_STREAM, transaction_id).with_arg(stream)
    }

    pub fn fc_publish(transaction_id: f64, stream: &str) -> Self {
        Self::new(CMD_FC_PUBLISH, transaction_id).with_arg(stream)
    }

    pub fn create_stream(transaction_id: f64) -> Self {
        Self::new(CMD_CREATE_STREAM, transaction_id)
    }

    pub fn publish(transaction_id: f64, stream: &str) -> Self {
        Self::new(CMD_PUBLISH, transaction_id)
            .with_arg(stream)
            .with_arg("live")
    }

    pub fn play(transaction_id: f64, stream: &str) -> Self {
        Self::new(CMD_PLAY, transaction_id).with_arg(stream)
    }

    // ------------------------------------------------------------------
    // Server replies
    // ------------------------------------------------------------------

    pub fn connect_result(transaction_id: f64) -> Self {
        Self::new(CMD_RESULT, transaction_id)
            .with_object(AmfObject::new().with("fmsVer", FMS_VERSION))
            .with_arg(AmfObject::new().with("code", NC_CONNECT_SUCCESS))
    }

    pub fn result(transaction_id: f64) -> Self {
        Self::new(CMD_RESULT, transaction_id)
    }

    pub fn on_status(code: &str) -> Self {
        Self::new(CMD_ON_STATUS, 0.0).with_arg(
            AmfObject::new()
                .with("level", "status")
                .with("code", code),
        )
    }
}
