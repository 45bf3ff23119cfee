//! Host-side client for commands executed on the modem.
//!
//! Every operation follows the same shape: check the arguments and the modem
//! status, resolve the command id for the negotiated protocol version, then
//! either block on the response (no callback) or register the callback and
//! return as soon as the request is sent. Asynchronous responses are decoded
//! on the job runner and handed to the callback exactly once, unless the
//! modem powers down first.

use crate::buffer::CommandBuffer;
use crate::codec::Command;
use crate::command::{CommandId, LogicalCommand, ProtocolVersion};
use crate::config::AltcomConfig;
use crate::error::AltcomError;
use crate::exchange::exchange;
use crate::gateway::CommandGateway;
use crate::job::{HandlerOutcome, JobRunner, ResponseJob, ResponseSink, TokioJobRunner};
use crate::lifecycle::CallbackLifecycle;
use crate::registry::{CallbackRegistry, Completion};
use crate::status::StatusNotifier;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Completion callback of an asynchronous call.
pub type Callback<T> = Box<dyn FnOnce(Result<T, AltcomError>) + Send + 'static>;

struct Inner<G> {
    gateway: Arc<G>,
    lifecycle: CallbackLifecycle,
    notifier: Arc<dyn StatusNotifier>,
    runner: Arc<dyn JobRunner>,
    config: AltcomConfig,
}

/// Client bound to one command gateway.
pub struct Altcom<G: CommandGateway> {
    inner: Arc<Inner<G>>,
}

impl<G: CommandGateway> Clone for Altcom<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: CommandGateway> Altcom<G> {
    /// Create a client whose response jobs run on the configured tokio runtime,
    /// or on the current one.
    pub fn new(
        gateway: Arc<G>,
        notifier: Arc<dyn StatusNotifier>,
        config: AltcomConfig,
    ) -> Result<Self, AltcomError> {
        let runner = match config.runtime() {
            Some(handle) => TokioJobRunner::new(handle.clone()),
            None => TokioJobRunner::current()?,
        };
        Ok(Self::with_runner(gateway, notifier, Arc::new(runner), config))
    }

    pub fn with_runner(
        gateway: Arc<G>,
        notifier: Arc<dyn StatusNotifier>,
        runner: Arc<dyn JobRunner>,
        config: AltcomConfig,
    ) -> Self {
        let lifecycle = CallbackLifecycle::new(CallbackRegistry::new(), Arc::clone(&notifier));
        Self {
            inner: Arc::new(Inner {
                gateway,
                lifecycle,
                notifier,
                runner,
                config,
            }),
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.inner.gateway
    }

    pub fn registry(&self) -> &CallbackRegistry {
        self.inner.lifecycle.registry()
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.inner.gateway.protocol_version()
    }

    /// Handler the gateway calls with responses to asynchronous requests.
    pub fn response_sink(&self) -> Arc<dyn ResponseSink> {
        self.inner.clone()
    }

    /// Whether a callback is waiting for `command`.
    pub fn is_pending(&self, command: LogicalCommand) -> bool {
        self.inner
            .gateway
            .resolve(command)
            .is_some_and(|id| self.registry().contains(id))
    }

    /// Argument, status and resolvability checks shared by every entry point.
    pub(crate) fn prepare(
        &self,
        command: LogicalCommand,
        has_slot: bool,
        has_callback: bool,
    ) -> Result<CommandId, AltcomError> {
        if !has_slot && !has_callback {
            error!(%command, "Neither an output slot nor a callback was supplied");
            return Err(AltcomError::InvalidArgument("output slot or callback required"));
        }

        let status = self.inner.notifier.status();
        if !status.is_operational() {
            return Err(AltcomError::NotOperational(status));
        }

        let version = self.protocol_version();
        self.inner.gateway.resolve(command).ok_or_else(|| {
            warn!(%command, %version, "Command unsupported by negotiated protocol");
            AltcomError::Unresolvable { command, version }
        })
    }

    /// Check, resolve and run `command` in the mode the arguments select.
    pub(crate) async fn execute<C: Command + 'static>(
        &self,
        command: &C,
        slot: Option<&mut C::Output>,
        callback: Option<Callback<C::Output>>,
    ) -> Result<(), AltcomError> {
        let id = self.prepare(C::LOGICAL, slot.is_some(), callback.is_some())?;
        self.run(id, command, slot, callback).await
    }

    /// Synchronous-only variant of [`execute`](Self::execute).
    pub(crate) async fn request<C: Command + 'static>(&self, command: &C) -> Result<C::Output, AltcomError> {
        let id = self.prepare(C::LOGICAL, true, false)?;
        self.run_sync(id, command).await
    }

    pub(crate) async fn run<C: Command + 'static>(
        &self,
        id: CommandId,
        command: &C,
        slot: Option<&mut C::Output>,
        callback: Option<Callback<C::Output>>,
    ) -> Result<(), AltcomError> {
        match callback {
            Some(callback) => self.run_async(id, command, callback).await,
            None => {
                let value = self.run_sync(id, command).await?;
                if let Some(slot) = slot {
                    *slot = value;
                }
                Ok(())
            }
        }
    }

    async fn run_sync<C: Command + 'static>(&self, id: CommandId, command: &C) -> Result<C::Output, AltcomError> {
        let mut request = vec![0u8; C::REQUEST_LEN];
        command.encode(&mut request);
        let mut response = vec![0u8; C::RESPONSE_LEN];

        exchange(
            &*self.inner.gateway,
            id,
            &request,
            Some(&mut response),
            self.inner.config.timeout(),
        )
        .await?;

        debug!(%id, bytes = hex::encode(&response), "Response received");
        C::decode(&response).inspect_err(|e| error!(command = %C::LOGICAL, "Response rejected: {}", e))
    }

    async fn run_async<C: Command + 'static>(
        &self,
        id: CommandId,
        command: &C,
        callback: Callback<C::Output>,
    ) -> Result<(), AltcomError> {
        let mut request = vec![0u8; C::REQUEST_LEN];
        command.encode(&mut request);

        let completion: Completion = Box::new(move |payload| {
            let outcome = payload.and_then(C::decode);
            if let Err(e) = &outcome {
                warn!(command = %C::LOGICAL, "Asynchronous request failed: {}", e);
            }
            callback(outcome);
        });
        let ticket = self.inner.lifecycle.setup(id, completion)?;
        let guard = self.inner.lifecycle.guard(id, ticket);

        exchange(&*self.inner.gateway, id, &request, None, self.inner.config.timeout()).await?;
        guard.disarm();
        Ok(())
    }
}

impl<G: CommandGateway> ResponseSink for Inner<G> {
    fn dispatch(&self, response: CommandBuffer) -> HandlerOutcome {
        let id = response.id();
        let version = self.gateway.protocol_version();
        let handled = id.is_response()
            && LogicalCommand::from_id(id, version).is_some_and(LogicalCommand::supports_callback);
        if !handled {
            debug!(%id, "No handler for inbound event");
            response.release();
            return HandlerOutcome::UnsupportedEvent;
        }

        let job = ResponseJob::new(self.lifecycle.registry().clone(), response);
        match self.runner.run(Box::new(move || job.run())) {
            Ok(()) => HandlerOutcome::Started,
            Err(e) => {
                // The refused job has been dropped, which failed the pending call.
                error!(%id, "Failed to start response job: {}", e);
                HandlerOutcome::InternalError
            }
        }
    }
}
