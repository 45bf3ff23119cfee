use crate::constants::{RESPONSE_FLAG, v1, v4};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use strum_macros::Display;

/// Protocol version negotiated with the modem once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ProtocolVersion {
    #[strum(to_string = "v1")]
    V1 = 1,
    #[strum(to_string = "v4")]
    V4 = 4,
}

/// Logical operations the modem can execute on behalf of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LogicalCommand {
    GetDynamicPsm,
    GetPsm,
    MdDigest,
    X509WriteCrtSerial,
}

impl LogicalCommand {
    pub const ALL: [LogicalCommand; 4] = [
        LogicalCommand::GetDynamicPsm,
        LogicalCommand::GetPsm,
        LogicalCommand::MdDigest,
        LogicalCommand::X509WriteCrtSerial,
    ];

    /// Look up the wire id of this command at the given protocol version.
    ///
    /// `None` means the modem does not implement the command at that version.
    pub fn resolve(self, version: ProtocolVersion) -> Option<CommandId> {
        let raw = match (version, self) {
            (ProtocolVersion::V1, LogicalCommand::GetDynamicPsm) => v1::GET_DYNAMIC_PSM,
            (ProtocolVersion::V1, LogicalCommand::MdDigest) => v1::TLS_MD_DIGEST,
            (ProtocolVersion::V1, LogicalCommand::X509WriteCrtSerial) => v1::TLS_X509WRITE_CRT_SERIAL,
            (ProtocolVersion::V1, LogicalCommand::GetPsm) => return None,
            (ProtocolVersion::V4, LogicalCommand::GetDynamicPsm) => v4::GET_DYNAMIC_PSM,
            (ProtocolVersion::V4, LogicalCommand::GetPsm) => v4::GET_PSM,
            (ProtocolVersion::V4, LogicalCommand::MdDigest) => v4::TLS_MD_DIGEST,
            (ProtocolVersion::V4, LogicalCommand::X509WriteCrtSerial) => return None,
        };
        Some(CommandId(raw))
    }

    /// Reverse lookup of a request id.
    pub fn from_id(id: CommandId, version: ProtocolVersion) -> Option<LogicalCommand> {
        let request = id.request();
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.resolve(version) == Some(request))
    }

    /// Whether the command may complete through a registered callback.
    pub fn supports_callback(self) -> bool {
        matches!(self, LogicalCommand::GetDynamicPsm | LogicalCommand::GetPsm)
    }
}

/// Wire-level tag identifying one request/response pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u16);

impl CommandId {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Id carried by the response to this request
    pub const fn response(self) -> Self {
        Self(self.0 | RESPONSE_FLAG)
    }

    /// Id of the request a response answers
    pub const fn request(self) -> Self {
        Self(self.0 & !RESPONSE_FLAG)
    }

    pub const fn is_response(self) -> bool {
        self.0 & RESPONSE_FLAG != 0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl From<CommandId> for u16 {
    fn from(id: CommandId) -> Self {
        id.0
    }
}
