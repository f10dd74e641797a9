//! Admission webhook HTTP surface.
//!
//! # Endpoints
//!
//! - `POST /mutate` - AdmissionReview v1 in, AdmissionReview v1 out
//! - `GET /health` - plain-text liveness probe
//!
//! Malformed requests are answered with a plain-text 400. A job that cannot
//! be hosted anywhere is denied inside a regular 200 review with code 403.

pub mod errors;
pub mod handlers;
pub mod review;
pub mod server;

pub use errors::AdmissionError;
pub use errors::ServerError;
pub use handlers::admit;
pub use handlers::WebhookState;
pub use review::AdmissionRequest;
pub use review::AdmissionResponse;
pub use review::AdmissionReview;
pub use server::routes;
pub use server::TlsFiles;
pub use server::WebhookServer;
