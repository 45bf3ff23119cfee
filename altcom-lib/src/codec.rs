use crate::command::LogicalCommand;
use crate::error::AltcomError;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// A fixed-layout request/response pair executed by the modem.
pub trait Command: Send + Sync {
    const LOGICAL: LogicalCommand;
    /// Exact request payload length
    const REQUEST_LEN: usize;
    /// Exact response payload length
    const RESPONSE_LEN: usize;

    type Output: Send + 'static;

    /// Write the request payload; `out` is exactly `REQUEST_LEN` bytes.
    fn encode(&self, out: &mut [u8]);

    /// Parse a response payload into the call result.
    ///
    /// Remote failure codes and failed sanity checks are errors here.
    fn decode(response: &[u8]) -> Result<Self::Output, AltcomError>;
}

/// View `bytes` as the wire struct `T`, which must match its size exactly.
pub fn parse_exact<T>(bytes: &[u8]) -> Result<&T, AltcomError>
where
    T: FromBytes + KnownLayout + Immutable,
{
    T::ref_from_bytes(bytes).map_err(|_| AltcomError::ProtocolMismatch {
        expected: size_of::<T>(),
        actual: bytes.len(),
    })
}
