//! In-process modem for demos and tests.
//!
//! [`LoopbackModem`] answers requests with per-command responder closures.
//! Synchronous requests are answered inline; asynchronous ones are answered
//! from a spawned task through the attached [`ResponseSink`], or parked until
//! [`LoopbackModem::flush`] when responses are held. Failures can be
//! injected at the send, allocation and timing level.

use crate::buffer::{BufferPool, CommandBuffer};
use crate::command::{CommandId, LogicalCommand, ProtocolVersion};
use crate::constants::errno;
use crate::error::AltcomError;
use crate::gateway::{CommandGateway, Timeout};
use crate::job::{HandlerOutcome, ResponseSink};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Produces the response payload for a request payload.
pub type Responder = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

#[derive(Default)]
struct LoopbackState {
    responders: HashMap<LogicalCommand, Responder>,
    requests: Vec<(CommandId, Vec<u8>)>,
    send_failure: Option<i32>,
    latency: Option<Duration>,
    hold: bool,
    held: Vec<CommandBuffer>,
}

pub struct LoopbackModem {
    version: ProtocolVersion,
    pool: BufferPool,
    state: Mutex<LoopbackState>,
    sink: Mutex<Option<Weak<dyn ResponseSink>>>,
}

impl LoopbackModem {
    pub fn new(version: ProtocolVersion) -> Self {
        Self::with_pool(version, BufferPool::new())
    }

    pub fn with_pool(version: ProtocolVersion, pool: BufferPool) -> Self {
        Self {
            version,
            pool,
            state: Mutex::new(LoopbackState::default()),
            sink: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Deliver asynchronous responses to `sink`. Only a weak reference is kept.
    pub fn attach(&self, sink: &Arc<dyn ResponseSink>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(sink));
    }

    pub fn respond<F>(&self, command: LogicalCommand, responder: F)
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.lock().responders.insert(command, Arc::new(responder));
    }

    /// Make every send fail with the transport code `code`, or stop failing.
    pub fn fail_sends(&self, code: Option<i32>) {
        self.lock().send_failure = code;
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Park asynchronous responses instead of delivering them.
    pub fn hold_responses(&self, hold: bool) {
        self.lock().hold = hold;
    }

    /// Deliver every parked response, in order.
    pub fn flush(&self) -> Vec<HandlerOutcome> {
        let held = std::mem::take(&mut self.lock().held);
        held.into_iter().map(|response| self.deliver_buffer(response)).collect()
    }

    /// Deliver an unsolicited response for `command` carrying `payload`.
    pub fn deliver(&self, command: LogicalCommand, payload: &[u8]) -> Result<HandlerOutcome, AltcomError> {
        let id = command.resolve(self.version).ok_or(AltcomError::Unresolvable {
            command,
            version: self.version,
        })?;
        let response = self.response_buffer(id, payload)?;
        Ok(self.deliver_buffer(response))
    }

    /// Every request received so far, with its payload.
    pub fn requests(&self) -> Vec<(CommandId, Vec<u8>)> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    fn sink(&self) -> Option<Arc<dyn ResponseSink>> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn response_buffer(&self, request: CommandId, payload: &[u8]) -> Result<CommandBuffer, AltcomError> {
        let mut response = self
            .pool
            .allocate(request.response(), payload.len())
            .ok_or(AltcomError::AllocationFailure { size: payload.len() })?;
        response.fill(payload);
        Ok(response)
    }

    fn deliver_buffer(&self, response: CommandBuffer) -> HandlerOutcome {
        match self.sink() {
            Some(sink) => sink.dispatch(response),
            None => {
                warn!(id = %response.id(), "No response sink attached, dropping response");
                HandlerOutcome::InternalError
            }
        }
    }

    async fn round_trip(&self, request: &CommandBuffer, response: Option<&mut [u8]>) -> Result<usize, AltcomError> {
        let id = request.id();
        let (responder, latency) = {
            let mut state = self.lock();
            state.requests.push((id, request.as_slice().to_vec()));
            if let Some(code) = state.send_failure {
                return Err(AltcomError::Transport { code });
            }
            let responder = LogicalCommand::from_id(id, self.version)
                .and_then(|command| state.responders.get(&command).cloned());
            (responder, state.latency)
        };
        let responder = responder.ok_or_else(|| {
            warn!(%id, "No responder for command");
            AltcomError::Transport { code: -errno::ENOSYS }
        })?;

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let payload = responder(request.as_slice());
        debug!(%id, bytes = hex::encode(&payload), "Loopback response");

        match response {
            Some(slot) => {
                let len = payload.len().min(slot.len());
                slot[..len].copy_from_slice(&payload[..len]);
                Ok(payload.len())
            }
            None => {
                let buffer = self.response_buffer(id, &payload)?;
                let hold = self.lock().hold;
                if hold {
                    self.lock().held.push(buffer);
                } else {
                    let sink = self.sink();
                    tokio::spawn(async move {
                        match sink {
                            Some(sink) => {
                                sink.dispatch(buffer);
                            }
                            None => warn!(id = %buffer.id(), "No response sink attached, dropping response"),
                        }
                    });
                }
                Ok(0)
            }
        }
    }
}

impl CommandGateway for LoopbackModem {
    fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    fn allocate(&self, id: CommandId, len: usize) -> Option<CommandBuffer> {
        self.pool.allocate(id, len)
    }

    fn send(
        &self,
        request: &CommandBuffer,
        response: Option<&mut [u8]>,
        timeout: Timeout,
    ) -> impl Future<Output = Result<usize, AltcomError>> + Send {
        async move {
            match timeout {
                Timeout::Forever => self.round_trip(request, response).await,
                Timeout::After(limit) => tokio::time::timeout(limit, self.round_trip(request, response)).await?,
            }
        }
    }
}
