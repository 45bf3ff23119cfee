use crate::buffer::CommandBuffer;
use crate::error::AltcomError;
use crate::registry::CallbackRegistry;
use tokio::runtime::Handle;
use tracing::{debug, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Execution context for response handling, separate from the caller.
pub trait JobRunner: Send + Sync {
    fn run(&self, job: Job) -> Result<(), AltcomError>;
}

/// Runs jobs as tasks on a tokio runtime.
///
/// `run` cannot tell whether the runtime is shutting down: tokio drops tasks
/// spawned onto a closed runtime without running them. Response jobs fail
/// their pending call when dropped unrun, so callers still get a result.
#[derive(Debug, Clone)]
pub struct TokioJobRunner {
    handle: Handle,
}

impl TokioJobRunner {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Runner bound to the runtime of the calling context.
    pub fn current() -> Result<Self, AltcomError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| AltcomError::Internal(format!("no tokio runtime for job runner: {}", e)))
    }
}

impl JobRunner for TokioJobRunner {
    fn run(&self, job: Job) -> Result<(), AltcomError> {
        self.handle.spawn(async move { job() });
        Ok(())
    }
}

/// How the demultiplexer's handler treated an inbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Started,
    UnsupportedEvent,
    InternalError,
}

/// Receives responses the gateway delivers for asynchronous requests.
pub trait ResponseSink: Send + Sync {
    fn dispatch(&self, response: CommandBuffer) -> HandlerOutcome;
}

/// Complete the pending call a response answers.
///
/// The registry entry is taken before the completion runs, so the callback
/// may immediately issue a new request for the same command. The response
/// buffer is released and the status observer dropped afterwards, whether or
/// not anybody was waiting.
pub(crate) fn response_job(registry: &CallbackRegistry, response: CommandBuffer) {
    let id = response.id().request();
    let Some(entry) = registry.take(id) else {
        warn!(%id, "Response without a pending callback, discarding");
        response.release();
        return;
    };
    let (completion, subscription) = entry.into_parts();

    debug!(%id, bytes = hex::encode(response.as_slice()), "Response received");
    completion(Ok(response.as_slice()));

    response.release();
    drop(subscription);
}

/// A response on its way to [`response_job`].
///
/// If the job is dropped before it runs (the runner refused it, or the
/// runtime shut down first), the pending call is completed with
/// [`AltcomError::Internal`] and the response is released.
pub(crate) struct ResponseJob {
    registry: CallbackRegistry,
    response: Option<CommandBuffer>,
}

impl ResponseJob {
    pub(crate) fn new(registry: CallbackRegistry, response: CommandBuffer) -> Self {
        Self {
            registry,
            response: Some(response),
        }
    }

    pub(crate) fn run(mut self) {
        if let Some(response) = self.response.take() {
            response_job(&self.registry, response);
        }
    }
}

impl Drop for ResponseJob {
    fn drop(&mut self) {
        let Some(response) = self.response.take() else {
            return;
        };
        let id = response.id().request();
        response.release();
        if let Some(entry) = self.registry.take(id) {
            warn!(%id, "Response job dropped before running, failing pending call");
            let (completion, _subscription) = entry.into_parts();
            completion(Err(AltcomError::Internal("response job was not run".to_string())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::command::CommandId;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_response_job_delivers_payload_and_releases() {
        let pool = BufferPool::new();
        let registry = CallbackRegistry::new();
        let id = CommandId::new(0x35);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry
            .register(
                id,
                registry.issue_ticket(),
                Box::new(move |payload| {
                    assert!(!payload.is_err());
                    sink.lock().unwrap().extend_from_slice(payload.unwrap());
                }),
                None,
            )
            .unwrap();

        let mut response = pool.allocate(id.response(), 0).unwrap();
        response.fill(&[1, 2, 3]);
        response_job(&registry, response);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert!(registry.is_empty());
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_orphan_response_is_released() {
        let pool = BufferPool::new();
        let registry = CallbackRegistry::new();
        let response = pool.allocate(CommandId::new(0x35).response(), 6).unwrap();
        response_job(&registry, response);
        assert_eq!(pool.live(), 0);
    }

    #[tokio::test]
    async fn test_tokio_runner_runs_off_caller() {
        let runner = TokioJobRunner::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        runner
            .run(Box::new(move || {
                let _ = tx.send(42);
            }))
            .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }

    fn register_errno_recorder(registry: &CallbackRegistry, id: CommandId) -> Arc<Mutex<Option<i32>>> {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        registry
            .register(
                id,
                registry.issue_ticket(),
                Box::new(move |payload| {
                    *sink.lock().unwrap() = Some(payload.err().map_or(0, |e| e.errno()));
                }),
                None,
            )
            .unwrap();
        seen
    }

    #[test]
    fn test_unrun_job_fails_pending_call() {
        let pool = BufferPool::new();
        let registry = CallbackRegistry::new();
        let id = CommandId::new(0x35);
        let seen = register_errno_recorder(&registry, id);

        let job = ResponseJob::new(registry.clone(), pool.allocate(id.response(), 6).unwrap());
        drop(job);

        assert_eq!(*seen.lock().unwrap(), Some(-14));
        assert!(registry.is_empty());
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_job_on_shut_down_runtime_fails_pending_call() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let runner = TokioJobRunner::new(runtime.handle().clone());
        drop(runtime);

        let pool = BufferPool::new();
        let registry = CallbackRegistry::new();
        let id = CommandId::new(0x35);
        let seen = register_errno_recorder(&registry, id);

        let job = ResponseJob::new(registry.clone(), pool.allocate(id.response(), 6).unwrap());
        runner.run(Box::new(move || job.run())).unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(-14));
        assert!(registry.is_empty());
        assert_eq!(pool.live(), 0);
    }
}
