//! Command gateway abstraction
//!
//! The gateway owns framing, command id assignment and the physical link to
//! the modem. The library only needs the handful of operations below.

use crate::buffer::CommandBuffer;
use crate::command::{CommandId, LogicalCommand, ProtocolVersion};
use crate::error::AltcomError;
use std::future::Future;
use std::time::Duration;

/// How long a send may wait for the modem's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    #[default]
    Forever,
    After(Duration),
}

/// Transport to the modem.
///
/// `send` with a response slot blocks until the response arrives and
/// returns the number of bytes the modem produced, which may differ from the
/// slot length. Without a slot it returns once the request is on the wire;
/// the response is later delivered to the gateway's [`ResponseSink`] in a
/// gateway-owned buffer.
///
/// [`ResponseSink`]: crate::job::ResponseSink
pub trait CommandGateway: Send + Sync + 'static {
    /// Protocol version negotiated for this session
    fn protocol_version(&self) -> ProtocolVersion;

    /// Resolve a logical command to its wire id at the negotiated version.
    fn resolve(&self, command: LogicalCommand) -> Option<CommandId> {
        command.resolve(self.protocol_version())
    }

    /// Allocate a request buffer of exactly `len` bytes.
    fn allocate(&self, id: CommandId, len: usize) -> Option<CommandBuffer>;

    fn send(
        &self,
        request: &CommandBuffer,
        response: Option<&mut [u8]>,
        timeout: Timeout,
    ) -> impl Future<Output = Result<usize, AltcomError>> + Send;
}
