use crate::gateway::Timeout;
use std::time::Duration;
use tokio::runtime::Handle;

/// Client settings.
///
/// ```ignore
/// let config = AltcomConfig::new().with_timeout(Duration::from_secs(5));
/// let client = Altcom::new(gateway, status, config)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct AltcomConfig {
    timeout: Timeout,
    runtime: Option<Handle>,
}

impl AltcomConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound how long a request waits for the modem. Unbounded by default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Timeout::After(timeout);
        self
    }

    /// Run response jobs on `handle` instead of the runtime the client is built in.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    pub fn runtime(&self) -> Option<&Handle> {
        self.runtime.as_ref()
    }
}
