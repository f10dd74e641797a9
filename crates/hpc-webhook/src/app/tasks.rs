use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::WebhookServer;
use crate::capacity::CapacityPoller;
use crate::k8s::ClusterInventory;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Background tasks sharing one cancellation token.
pub struct Tasks {
    pub tasks: Vec<JoinHandle<Result<()>>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn spawn_poller<C>(&mut self, poller: CapacityPoller<C>)
    where
        C: ClusterInventory + 'static,
    {
        let token = self.cancellation_token.clone();
        self.tasks.push(tokio::spawn(async move {
            tracing::info!("Starting capacity poller task");
            poller
                .run(token)
                .await
                .map_err(|e| anyhow::anyhow!("Capacity poller failed: {e:?}"))?;
            tracing::info!("Capacity poller task completed");
            Ok(())
        }));
    }

    pub fn spawn_server(&mut self, server: WebhookServer) {
        let token = self.cancellation_token.clone();
        self.tasks.push(tokio::spawn(async move {
            tracing::info!("Starting webhook server task");
            server
                .run(token)
                .await
                .map_err(|e| anyhow::anyhow!("Webhook server failed: {e:?}"))?;
            tracing::info!("Webhook server task completed");
            Ok(())
        }));
    }

    /// Wait for a shutdown signal or for the first task to stop.
    ///
    /// # Errors
    ///
    /// - if a task fails, panics or stops before shutdown was requested
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::signal;
                use tokio::signal::unix::SignalKind;
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                    }
                })
            }
        };

        if self.tasks.is_empty() {
            return Ok(());
        }

        let finished = tokio::select! {
            _ = signal_handler => None,
            (result, index, _) = futures::future::select_all(&mut self.tasks) => Some((result, index)),
        };

        self.cancellation_token.cancel();
        let Some((result, index)) = finished else {
            tracing::info!("Shutdown signal received, cancelling all tasks");
            self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
            return Ok(());
        };

        self.tasks.remove(index);
        self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
        match result {
            Ok(Ok(())) => Err(anyhow::anyhow!("Task completed unexpectedly")),
            Ok(Err(e)) => {
                tracing::error!("Task completed with error: {e}");
                Err(e)
            }
            Err(e) => Err(anyhow::anyhow!("Task panicked: {e}")),
        }
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!("Task failed during shutdown: {e}"),
                    Err(e) => tracing::error!("Task panicked during shutdown: {e}"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }
}
