//! Message payloads exchanged with daemons
//!
//! Every frame carries a `type` discriminator (see [`MessageType`]), an
//! optional opaque `message_id` echoed back in the reply, and a payload map.
//! Each request resolves to exactly one response whose `response` field is a
//! closed result enumeration specific to that message.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Frame discriminator, encoded as its SCREAMING_SNAKE_CASE name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    InitRequest,
    InitResponse,
    ConfirmRequest,
    ConfirmResponse,
    CreateRequest,
    CreateResponse,
    DeleteRequest,
    DeleteResponse,
    RedeemMasterRequest,
    RedeemMasterResponse,
    RedeemDaemonRequest,
    RedeemDaemonResponse,
    RedeemPathRequest,
    RedeemPathResponse,
    RegisterDaemonRequest,
    RegisterDaemonResponse,
    AttachRequest,
    AttachResponse,
    DetachRequest,
    DetachResponse,
    Status,
    StatusResponse,
    LookupIdentityRequest,
    LookupIdentityResponse,
    ConnectionsListRequest,
    ConnectionsListResponse,
    PunchRequest,
    PunchResponse,
    AddressRequest,
    AddressResponse,
    ServerAvailable,
    PeerAvailable,
}

impl FromStr for MessageType {
    type Err = serde::de::value::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use serde::de::{value::StrDeserializer, IntoDeserializer};
        let de: StrDeserializer<'_, Self::Err> = s.into_deserializer();
        Self::deserialize(de)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opaque request correlation id, echoed verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub rmpv::Value);

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(rmpv::Value::from(s))
    }
}

impl From<u64> for MessageId {
    fn from(n: u64) -> Self {
        MessageId(rmpv::Value::from(n))
    }
}

/// Side of a named connection a daemon plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActingAs {
    Server,
    Client,
}

macro_rules! result_code {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }
    };
}

result_code!(InitResult { Accepted, Rejected, EmailExists });
result_code!(ConfirmResult { Accepted, Rejected });
result_code!(CreateResult { Accepted, Rejected, PathExists, InvalidPath });
result_code!(DeleteResult { Accepted, Rejected, NotFound, InvalidPath });
result_code!(RedeemMasterResult { Accepted, Rejected });
result_code!(RedeemDaemonResult { Accepted, Rejected, NotFound });
result_code!(RedeemPathResult { Accepted, Rejected, NotFound, InvalidPath });
result_code!(RegisterDaemonResult { Accepted, Rejected });
result_code!(AttachResult { Accepted, Rejected, NotFound, InvalidPath });
result_code!(DetachResult { Accepted, Rejected, NotFound, InvalidPath });
result_code!(StatusResult { Accepted, Rejected, NotFound });
result_code!(LookupIdentityResult { Accepted, NotFound });
result_code!(ConnectionsListResult { Accepted, Rejected });
result_code!(PunchResult { Accepted, Rejected, NotFound });
result_code!(
    /// Daemon's answer to an `ADDRESS_REQUEST`
    AddressResult { Accepted, Rejected }
);

// ============================================================================
// Account
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitRequest {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitResponse {
    pub response: InitResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmResponse {
    pub response: ConfirmResult,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemMasterRequest {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemMasterResponse {
    pub response: RedeemMasterResult,
}

// ============================================================================
// Daemons and paths
// ============================================================================

/// Connection parameters stored with a new path
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PathSpec {
    pub path: String,
    /// Daemon of the same owner attached right away
    #[serde(default)]
    pub daemon_name: Option<String>,
    #[serde(default)]
    pub acting_as: Option<ActingAs>,
    #[serde(default)]
    pub connect_address: String,
    #[serde(default)]
    pub connect_port: u16,
    #[serde(default)]
    pub listen_address: String,
    #[serde(default)]
    pub listen_port: u16,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub fixed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateTarget {
    Daemon { name: String },
    Path(PathSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Master token of the owner
    pub token: String,
    pub target: CreateTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub response: CreateResult,
    /// Daemon token or path token of the created record
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeleteTarget {
    Daemon { name: String },
    Path { path: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub token: String,
    pub target: DeleteTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub response: DeleteResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemDaemonRequest {
    pub token: String,
    pub daemon_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemDaemonResponse {
    pub response: RedeemDaemonResult,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemPathRequest {
    pub token: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemPathResponse {
    pub response: RedeemPathResult,
    #[serde(default)]
    pub token: Option<String>,
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDaemonRequest {
    /// Daemon token
    pub token: String,
    /// Lowercase hex SHA-256 of `key`
    pub identity: String,
    pub key: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub internal_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDaemonResponse {
    pub response: RegisterDaemonResult,
    #[serde(default)]
    pub daemon_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachRequest {
    pub token: String,
    pub daemon_name: String,
    pub connection_name: String,
    pub acting_as: ActingAs,
    /// Required when the connection belongs to another user
    #[serde(default)]
    pub path_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachResponse {
    pub response: AttachResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetachRequest {
    pub token: String,
    pub daemon_name: String,
    pub connection_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetachResponse {
    pub response: DetachResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRequest {
    pub connection_name: String,
    pub acting_as: ActingAs,
    pub active: bool,
    #[serde(default)]
    pub connected: u32,
    #[serde(default)]
    pub internal_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub response: StatusResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupIdentityRequest {
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupIdentityResponse {
    pub response: LookupIdentityResult,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionsListRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub name: String,
    pub acting_as: ActingAs,
    pub connect_address: String,
    pub connect_port: u16,
    pub listen_address: String,
    pub listen_port: u16,
    pub encrypted: bool,
    pub fixed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionsListResponse {
    pub response: ConnectionsListResult,
    #[serde(default)]
    pub list: Vec<ConnectionInfo>,
}

// ============================================================================
// Rendezvous and NAT traversal
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunchRequest {
    pub connection_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunchResponse {
    pub response: PunchResult,
}

/// Push: send a UDP probe carrying `request_id` to the tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRequest {
    pub request_id: String,
    pub connection_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressResponse {
    pub request_id: String,
    pub response: AddressResult,
}

/// Push: the server side of `connection_name` is ready
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAvailable {
    pub connection_name: String,
    /// `<owner email>?<daemon name>` of the serving daemon
    pub daemon_name: String,
    pub internal_addresses: Vec<String>,
}

/// Push: public endpoint of the other side, as observed by the tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerAvailable {
    pub connection_name: String,
    pub address: String,
    pub port: u16,
}

// ============================================================================
// Envelopes
// ============================================================================

/// Daemon -> tracker message
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Init(InitRequest),
    Confirm(ConfirmRequest),
    Create(CreateRequest),
    Delete(DeleteRequest),
    RedeemMaster(RedeemMasterRequest),
    RedeemDaemon(RedeemDaemonRequest),
    RedeemPath(RedeemPathRequest),
    RegisterDaemon(RegisterDaemonRequest),
    Attach(AttachRequest),
    Detach(DetachRequest),
    Status(StatusRequest),
    LookupIdentity(LookupIdentityRequest),
    ConnectionsList(ConnectionsListRequest),
    Punch(PunchRequest),
    AddressResponse(AddressResponse),
}

impl Request {
    pub fn kind(&self) -> MessageType {
        match self {
            Request::Init(_) => MessageType::InitRequest,
            Request::Confirm(_) => MessageType::ConfirmRequest,
            Request::Create(_) => MessageType::CreateRequest,
            Request::Delete(_) => MessageType::DeleteRequest,
            Request::RedeemMaster(_) => MessageType::RedeemMasterRequest,
            Request::RedeemDaemon(_) => MessageType::RedeemDaemonRequest,
            Request::RedeemPath(_) => MessageType::RedeemPathRequest,
            Request::RegisterDaemon(_) => MessageType::RegisterDaemonRequest,
            Request::Attach(_) => MessageType::AttachRequest,
            Request::Detach(_) => MessageType::DetachRequest,
            Request::Status(_) => MessageType::Status,
            Request::LookupIdentity(_) => MessageType::LookupIdentityRequest,
            Request::ConnectionsList(_) => MessageType::ConnectionsListRequest,
            Request::Punch(_) => MessageType::PunchRequest,
            Request::AddressResponse(_) => MessageType::AddressResponse,
        }
    }
}

/// Tracker -> daemon message (replies and unsolicited pushes)
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Init(InitResponse),
    Confirm(ConfirmResponse),
    Create(CreateResponse),
    Delete(DeleteResponse),
    RedeemMaster(RedeemMasterResponse),
    RedeemDaemon(RedeemDaemonResponse),
    RedeemPath(RedeemPathResponse),
    RegisterDaemon(RegisterDaemonResponse),
    Attach(AttachResponse),
    Detach(DetachResponse),
    Status(StatusResponse),
    LookupIdentity(LookupIdentityResponse),
    ConnectionsList(ConnectionsListResponse),
    Punch(PunchResponse),
    AddressRequest(AddressRequest),
    ServerAvailable(ServerAvailable),
    PeerAvailable(PeerAvailable),
}

impl ServerMessage {
    pub fn kind(&self) -> MessageType {
        match self {
            ServerMessage::Init(_) => MessageType::InitResponse,
            ServerMessage::Confirm(_) => MessageType::ConfirmResponse,
            ServerMessage::Create(_) => MessageType::CreateResponse,
            ServerMessage::Delete(_) => MessageType::DeleteResponse,
            ServerMessage::RedeemMaster(_) => MessageType::RedeemMasterResponse,
            ServerMessage::RedeemDaemon(_) => MessageType::RedeemDaemonResponse,
            ServerMessage::RedeemPath(_) => MessageType::RedeemPathResponse,
            ServerMessage::RegisterDaemon(_) => MessageType::RegisterDaemonResponse,
            ServerMessage::Attach(_) => MessageType::AttachResponse,
            ServerMessage::Detach(_) => MessageType::DetachResponse,
            ServerMessage::Status(_) => MessageType::StatusResponse,
            ServerMessage::LookupIdentity(_) => MessageType::LookupIdentityResponse,
            ServerMessage::ConnectionsList(_) => MessageType::ConnectionsListResponse,
            ServerMessage::Punch(_) => MessageType::PunchResponse,
            ServerMessage::AddressRequest(_) => MessageType::AddressRequest,
            ServerMessage::ServerAvailable(_) => MessageType::ServerAvailable,
            ServerMessage::PeerAvailable(_) => MessageType::PeerAvailable,
        }
    }
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub message_id: Option<MessageId>,
    pub request: Request,
}

/// Outbound frame; pushes carry no `message_id`
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub message_id: Option<MessageId>,
    pub message: ServerMessage,
}

impl Outbound {
    pub fn reply(message_id: Option<MessageId>, message: ServerMessage) -> Self {
        Self { message_id, message }
    }

    pub fn push(message: ServerMessage) -> Self {
        Self {
            message_id: None,
            message,
        }
    }
}
