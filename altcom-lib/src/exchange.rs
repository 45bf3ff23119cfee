use crate::command::CommandId;
use crate::error::AltcomError;
use crate::gateway::{CommandGateway, Timeout};
use tracing::{debug, error};

/// Blocking request/response round trip against the gateway.
///
/// The request buffer is released on every exit path once the send has
/// completed. With a response slot, the received length must match the slot
/// exactly; without one the call returns as soon as the request is sent.
pub async fn exchange<G: CommandGateway>(
    gateway: &G,
    id: CommandId,
    request: &[u8],
    response: Option<&mut [u8]>,
    timeout: Timeout,
) -> Result<usize, AltcomError> {
    let mut buffer = gateway.allocate(id, request.len()).ok_or_else(|| {
        error!(%id, size = request.len(), "Failed to allocate command buffer");
        AltcomError::AllocationFailure { size: request.len() }
    })?;
    buffer.as_mut_slice().copy_from_slice(request);
    debug!(%id, bytes = hex::encode(request), "Command send");

    let expected = response.as_ref().map(|slot| slot.len());
    let sent = gateway.send(&buffer, response, timeout).await;
    buffer.release();

    let received = sent.inspect_err(|e| error!(%id, "Gateway send failed: {}", e))?;

    if let Some(expected) = expected {
        if received != expected {
            error!(%id, expected, received, "Unexpected response data length");
            return Err(AltcomError::ProtocolMismatch {
                expected,
                actual: received,
            });
        }
    }
    Ok(received)
}
