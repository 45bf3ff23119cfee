//! Certificate serial number assignment on the modem's X.509 writer.
//!
//! Only protocol v1 modems carry this command.

use crate::client::Altcom;
use crate::codec::{Command, parse_exact};
use crate::command::LogicalCommand;
use crate::error::AltcomError;
use crate::gateway::CommandGateway;
use tracing::debug;
use zerocopy::byteorder::big_endian::{I32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// X509WriteCrtSerial request (8 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CrtSerialRequestRaw {
    pub ctx_id: U32,
    pub serial_id: U32,
}

/// X509WriteCrtSerial response (4 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CrtSerialResponseRaw {
    pub ret_code: I32,
}

impl CrtSerialResponseRaw {
    pub fn new(ret_code: i32) -> Self {
        Self {
            ret_code: I32::new(ret_code),
        }
    }
}

/// Set the serial of the certificate being written by context `ctx_id` to the
/// big number object `serial_id`; both ids refer to objects on the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetCrtSerial {
    pub ctx_id: u32,
    pub serial_id: u32,
}

impl SetCrtSerial {
    pub fn parse_request(bytes: &[u8]) -> Result<Self, AltcomError> {
        let raw = parse_exact::<CrtSerialRequestRaw>(bytes)?;
        Ok(Self {
            ctx_id: raw.ctx_id.get(),
            serial_id: raw.serial_id.get(),
        })
    }
}

impl Command for SetCrtSerial {
    const LOGICAL: LogicalCommand = LogicalCommand::X509WriteCrtSerial;
    const REQUEST_LEN: usize = size_of::<CrtSerialRequestRaw>();
    const RESPONSE_LEN: usize = size_of::<CrtSerialResponseRaw>();

    type Output = ();

    fn encode(&self, out: &mut [u8]) {
        let raw = CrtSerialRequestRaw {
            ctx_id: U32::new(self.ctx_id),
            serial_id: U32::new(self.serial_id),
        };
        out.copy_from_slice(raw.as_bytes());
    }

    fn decode(response: &[u8]) -> Result<(), AltcomError> {
        let raw = parse_exact::<CrtSerialResponseRaw>(response)?;
        match raw.ret_code.get() {
            0 => Ok(()),
            code => Err(AltcomError::Remote(code)),
        }
    }
}

impl<G: CommandGateway> Altcom<G> {
    pub async fn x509write_crt_set_serial(&self, ctx_id: u32, serial_id: u32) -> Result<(), AltcomError> {
        debug!(ctx_id, serial_id, "x509write_crt_serial request");
        self.request(&SetCrtSerial { ctx_id, serial_id }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let cmd = SetCrtSerial {
            ctx_id: 7,
            serial_id: 0xDEAD_BEEF,
        };
        let mut out = [0u8; SetCrtSerial::REQUEST_LEN];
        cmd.encode(&mut out);
        assert_eq!(hex::encode(out), "00000007deadbeef");
        assert_eq!(SetCrtSerial::parse_request(&out).unwrap(), cmd);
    }

    #[test]
    fn test_response_codes() {
        assert!(SetCrtSerial::decode(CrtSerialResponseRaw::new(0).as_bytes()).is_ok());
        assert!(matches!(
            SetCrtSerial::decode(CrtSerialResponseRaw::new(-0x2800).as_bytes()),
            Err(AltcomError::Remote(-0x2800))
        ));
        assert!(matches!(
            SetCrtSerial::decode(&[0, 0]),
            Err(AltcomError::ProtocolMismatch { expected: 4, actual: 2 })
        ));
    }
}
