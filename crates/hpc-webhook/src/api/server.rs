use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use poem::get;
use poem::listener::Listener;
use poem::listener::RustlsCertificate;
use poem::listener::RustlsConfig;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::post;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use super::errors::ServerError;
use super::handlers::health;
use super::handlers::mutate;
use super::handlers::WebhookState;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Certificate chain and private key in PEM form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Webhook routes: `POST /mutate` and `GET /health`.
pub fn routes(state: Arc<WebhookState>) -> impl Endpoint {
    Route::new()
        .at("/mutate", post(mutate))
        .at("/health", get(health))
        .data(state)
        .with(Tracing)
}

/// HTTPS server answering admission requests
pub struct WebhookServer {
    state: Arc<WebhookState>,
    listen_addr: String,
    tls: Option<TlsFiles>,
}

impl WebhookServer {
    /// Create a new server. Without `tls` it serves plain HTTP.
    pub fn new(state: Arc<WebhookState>, listen_addr: String, tls: Option<TlsFiles>) -> Self {
        Self {
            state,
            listen_addr,
            tls,
        }
    }

    /// Serve until `token` is cancelled.
    ///
    /// # Errors
    ///
    /// - [`ServerError::TlsMaterial`] if the certificate or key cannot be read
    /// - [`ServerError::ServerFailed`] if the server fails to bind or run
    pub async fn run(self, token: CancellationToken) -> Result<(), Report<ServerError>> {
        let listener = match &self.tls {
            Some(tls) => {
                let config = load_tls(tls).await?;
                info!(listen_addr = %self.listen_addr, "Starting HTTPS webhook server");
                TcpListener::bind(self.listen_addr.clone())
                    .rustls(config)
                    .boxed()
            }
            None => {
                warn!(listen_addr = %self.listen_addr, "Starting webhook server without TLS");
                TcpListener::bind(self.listen_addr.clone()).boxed()
            }
        };

        Server::new(listener)
            .run_with_graceful_shutdown(
                routes(self.state),
                async move { token.cancelled().await },
                Some(SHUTDOWN_TIMEOUT),
            )
            .await
            .change_context(ServerError::ServerFailed)?;

        info!("Webhook server stopped");
        Ok(())
    }
}

async fn load_tls(tls: &TlsFiles) -> Result<RustlsConfig, Report<ServerError>> {
    let cert = read_pem(&tls.cert).await?;
    let key = read_pem(&tls.key).await?;
    Ok(RustlsConfig::new().fallback(RustlsCertificate::new().cert(cert).key(key)))
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, Report<ServerError>> {
    tokio::fs::read(path)
        .await
        .change_context_lazy(|| ServerError::TlsMaterial {
            path: path.display().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use poem::test::TestClient;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::capacity::snapshot_channel;
    use crate::k8s::ResourceFootprint;
    use crate::patch::ProxySettings;
    use crate::placement::CapacityThresholds;

    fn state() -> Arc<WebhookState> {
        let (_publisher, snapshots) = snapshot_channel();
        Arc::new(WebhookState {
            thresholds: CapacityThresholds::new(
                ResourceFootprint::new(1000, 1 << 30, 0),
                ResourceFootprint::new(1000, 1 << 30, 0),
            ),
            proxy: ProxySettings::default(),
            gpu_resource: "nvidia.com/gpu".to_string(),
            snapshots,
            snapshot_timeout: Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn health_echoes_request_uri() {
        let client = TestClient::new(routes(state()));
        let resp = client.get("/health").send().await;
        resp.assert_status_is_ok();
        resp.assert_text("healthy uri /health").await;
    }

    #[tokio::test]
    async fn mutate_rejects_get() {
        let client = TestClient::new(routes(state()));
        let resp = client.get("/mutate").send().await;
        resp.assert_status(poem::http::StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn missing_tls_material_is_reported() {
        let tls = TlsFiles {
            cert: PathBuf::from("/nonexistent/tls.crt"),
            key: PathBuf::from("/nonexistent/tls.key"),
        };
        let Err(err) = load_tls(&tls).await else {
            panic!("loading missing TLS files should fail");
        };
        assert_eq!(
            err.current_context().to_string(),
            "Failed to read TLS material /nonexistent/tls.crt"
        );
    }
}
