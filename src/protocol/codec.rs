//! Frame codec for the daemon protocol
//!
//! Wire layout: `[u32 big-endian length][MessagePack map]`, where the map is
//! `{ "type": <MESSAGE_TYPE>, "message_id": <any>|nil, "payload": <map> }`.
//!
//! Decoding happens in two passes over the frame body: the header (type and
//! message id) first, then the payload typed by the header. A body that fails
//! either pass is reported as an `Err` *item* rather than a codec error, so
//! the session drops that single frame and keeps reading. Only framing
//! failures (oversized frame, I/O) surface as codec errors.

use bytes::{Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::messages::{Inbound, MessageId, MessageType, Outbound, Request, ServerMessage};
use super::ProtocolError;

#[derive(Deserialize)]
struct Header {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message_id: Option<MessageId>,
}

#[derive(Deserialize)]
struct Body<P> {
    payload: P,
}

#[derive(Serialize)]
struct Frame<'a, P> {
    #[serde(rename = "type")]
    kind: MessageType,
    message_id: Option<&'a MessageId>,
    payload: &'a P,
}

fn encode_frame<P: Serialize>(
    kind: MessageType,
    message_id: Option<&MessageId>,
    payload: &P,
) -> Result<Vec<u8>, ProtocolError> {
    let frame = Frame {
        kind,
        message_id,
        payload,
    };
    rmp_serde::to_vec_named(&frame).map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn decode_header(bytes: &[u8]) -> Result<(MessageType, Option<MessageId>), ProtocolError> {
    let header: Header =
        rmp_serde::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let kind = header
        .kind
        .parse::<MessageType>()
        .map_err(|_| ProtocolError::UnknownType(header.kind.clone()))?;
    Ok((kind, header.message_id))
}

fn decode_payload<P: DeserializeOwned>(kind: MessageType, bytes: &[u8]) -> Result<P, ProtocolError> {
    rmp_serde::from_slice::<Body<P>>(bytes)
        .map(|body| body.payload)
        .map_err(|e| ProtocolError::Payload {
            kind,
            reason: e.to_string(),
        })
}

/// A message that can be carried in one frame body
pub trait WireMessage: Sized {
    fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError>;
    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError>;
}

impl WireMessage for Inbound {
    fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let kind = self.request.kind();
        let id = self.message_id.as_ref();
        match &self.request {
            Request::Init(p) => encode_frame(kind, id, p),
            Request::Confirm(p) => encode_frame(kind, id, p),
            Request::Create(p) => encode_frame(kind, id, p),
            Request::Delete(p) => encode_frame(kind, id, p),
            Request::RedeemMaster(p) => encode_frame(kind, id, p),
            Request::RedeemDaemon(p) => encode_frame(kind, id, p),
            Request::RedeemPath(p) => encode_frame(kind, id, p),
            Request::RegisterDaemon(p) => encode_frame(kind, id, p),
            Request::Attach(p) => encode_frame(kind, id, p),
            Request::Detach(p) => encode_frame(kind, id, p),
            Request::Status(p) => encode_frame(kind, id, p),
            Request::LookupIdentity(p) => encode_frame(kind, id, p),
            Request::ConnectionsList(p) => encode_frame(kind, id, p),
            Request::Punch(p) => encode_frame(kind, id, p),
            Request::AddressResponse(p) => encode_frame(kind, id, p),
        }
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (kind, message_id) = decode_header(bytes)?;
        let request = match kind {
            MessageType::InitRequest => Request::Init(decode_payload(kind, bytes)?),
            MessageType::ConfirmRequest => Request::Confirm(decode_payload(kind, bytes)?),
            MessageType::CreateRequest => Request::Create(decode_payload(kind, bytes)?),
            MessageType::DeleteRequest => Request::Delete(decode_payload(kind, bytes)?),
            MessageType::RedeemMasterRequest => Request::RedeemMaster(decode_payload(kind, bytes)?),
            MessageType::RedeemDaemonRequest => Request::RedeemDaemon(decode_payload(kind, bytes)?),
            MessageType::RedeemPathRequest => Request::RedeemPath(decode_payload(kind, bytes)?),
            MessageType::RegisterDaemonRequest => {
                Request::RegisterDaemon(decode_payload(kind, bytes)?)
            }
            MessageType::AttachRequest => Request::Attach(decode_payload(kind, bytes)?),
            MessageType::DetachRequest => Request::Detach(decode_payload(kind, bytes)?),
            MessageType::Status => Request::Status(decode_payload(kind, bytes)?),
            MessageType::LookupIdentityRequest => {
                Request::LookupIdentity(decode_payload(kind, bytes)?)
            }
            MessageType::ConnectionsListRequest => {
                Request::ConnectionsList(decode_payload(kind, bytes)?)
            }
            MessageType::PunchRequest => Request::Punch(decode_payload(kind, bytes)?),
            MessageType::AddressResponse => Request::AddressResponse(decode_payload(kind, bytes)?),
            other => return Err(ProtocolError::UnexpectedType(other)),
        };
        Ok(Inbound {
            message_id,
            request,
        })
    }
}

impl WireMessage for Outbound {
    fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let kind = self.message.kind();
        let id = self.message_id.as_ref();
        match &self.message {
            ServerMessage::Init(p) => encode_frame(kind, id, p),
            ServerMessage::Confirm(p) => encode_frame(kind, id, p),
            ServerMessage::Create(p) => encode_frame(kind, id, p),
            ServerMessage::Delete(p) => encode_frame(kind, id, p),
            ServerMessage::RedeemMaster(p) => encode_frame(kind, id, p),
            ServerMessage::RedeemDaemon(p) => encode_frame(kind, id, p),
            ServerMessage::RedeemPath(p) => encode_frame(kind, id, p),
            ServerMessage::RegisterDaemon(p) => encode_frame(kind, id, p),
            ServerMessage::Attach(p) => encode_frame(kind, id, p),
            ServerMessage::Detach(p) => encode_frame(kind, id, p),
            ServerMessage::Status(p) => encode_frame(kind, id, p),
            ServerMessage::LookupIdentity(p) => encode_frame(kind, id, p),
            ServerMessage::ConnectionsList(p) => encode_frame(kind, id, p),
            ServerMessage::Punch(p) => encode_frame(kind, id, p),
            ServerMessage::AddressRequest(p) => encode_frame(kind, id, p),
            ServerMessage::ServerAvailable(p) => encode_frame(kind, id, p),
            ServerMessage::PeerAvailable(p) => encode_frame(kind, id, p),
        }
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (kind, message_id) = decode_header(bytes)?;
        let message = match kind {
            MessageType::InitResponse => ServerMessage::Init(decode_payload(kind, bytes)?),
            MessageType::ConfirmResponse => ServerMessage::Confirm(decode_payload(kind, bytes)?),
            MessageType::CreateResponse => ServerMessage::Create(decode_payload(kind, bytes)?),
            MessageType::DeleteResponse => ServerMessage::Delete(decode_payload(kind, bytes)?),
            MessageType::RedeemMasterResponse => {
                ServerMessage::RedeemMaster(decode_payload(kind, bytes)?)
            }
            MessageType::RedeemDaemonResponse => {
                ServerMessage::RedeemDaemon(decode_payload(kind, bytes)?)
            }
            MessageType::RedeemPathResponse => {
                ServerMessage::RedeemPath(decode_payload(kind, bytes)?)
            }
            MessageType::RegisterDaemonResponse => {
                ServerMessage::RegisterDaemon(decode_payload(kind, bytes)?)
            }
            MessageType::AttachResponse => ServerMessage::Attach(decode_payload(kind, bytes)?),
            MessageType::DetachResponse => ServerMessage::Detach(decode_payload(kind, bytes)?),
            MessageType::StatusResponse => ServerMessage::Status(decode_payload(kind, bytes)?),
            MessageType::LookupIdentityResponse => {
                ServerMessage::LookupIdentity(decode_payload(kind, bytes)?)
            }
            MessageType::ConnectionsListResponse => {
                ServerMessage::ConnectionsList(decode_payload(kind, bytes)?)
            }
            MessageType::PunchResponse => ServerMessage::Punch(decode_payload(kind, bytes)?),
            MessageType::AddressRequest => {
                ServerMessage::AddressRequest(decode_payload(kind, bytes)?)
            }
            MessageType::ServerAvailable => {
                ServerMessage::ServerAvailable(decode_payload(kind, bytes)?)
            }
            MessageType::PeerAvailable => ServerMessage::PeerAvailable(decode_payload(kind, bytes)?),
            other => return Err(ProtocolError::UnexpectedType(other)),
        };
        Ok(Outbound {
            message_id,
            message,
        })
    }
}

/// Length-delimited codec decoding `In` and encoding `Out`
pub struct FrameCodec<In, Out> {
    frames: LengthDelimitedCodec,
    _marker: PhantomData<fn() -> (In, Out)>,
}

/// Tracker side: decodes requests, encodes replies and pushes
pub type TrackerCodec = FrameCodec<Inbound, Outbound>;

/// Daemon side: decodes replies and pushes, encodes requests
pub type DaemonCodec = FrameCodec<Outbound, Inbound>;

impl<In, Out> FrameCodec<In, Out> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_bytes)
                .new_codec(),
            _marker: PhantomData,
        }
    }
}

impl<In, Out> Clone for FrameCodec<In, Out> {
    fn clone(&self) -> Self {
        Self {
            frames: self.frames.clone(),
            _marker: PhantomData,
        }
    }
}

impl<In: WireMessage, Out> Decoder for FrameCodec<In, Out> {
    type Item = Result<In, ProtocolError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        match self.frames.decode(src)? {
            Some(body) => Ok(Some(In::from_bytes(&body))),
            None => Ok(None),
        }
    }
}

impl<In, Out: WireMessage> Encoder<Out> for FrameCodec<In, Out> {
    type Error = io::Error;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> io::Result<()> {
        let body = item
            .to_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.frames.encode(Bytes::from(body), dst)
    }
}
