use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns one blocking driver loop and its run flag.
///
/// The driver receives the cancellation token and must check it once per
/// tick; `stop` cancels and then waits for whatever the driver returns.
pub struct PipelineController<T> {
    name: &'static str,
    handle: Option<JoinHandle<T>>,
    cancel_token: Option<CancellationToken>,
}

impl<T: Send + 'static> PipelineController<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start<F>(&mut self, driver: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> T + Send + 'static,
    {
        if self.handle.is_some() {
            bail!("{} already active", self.name);
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        // Device reads block, so the driver gets its own thread.
        let handle = tokio::task::spawn_blocking(move || driver(token_clone));

        info!("{} started", self.name);
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Token observed by the running driver, for callers that cancel from elsewhere.
    pub fn cancel_token(&self) -> Option<CancellationToken> {
        self.cancel_token.clone()
    }

    /// Cancel the driver and wait for its result. `None` if never started.
    pub async fn stop(&mut self) -> Result<Option<T>> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.join().await
    }

    /// Wait for the driver to finish without cancelling it.
    pub async fn join(&mut self) -> Result<Option<T>> {
        let Some(handle) = self.handle.take() else {
            return Ok(None);
        };
        let output = handle
            .await
            .with_context(|| format!("{} task failed to join", self.name))?;
        self.cancel_token = None;
        info!("{} stopped", self.name);
        Ok(Some(output))
    }
}
