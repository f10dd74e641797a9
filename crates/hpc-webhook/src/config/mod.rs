pub mod cli;
pub mod serve;

use thiserror::Error;

use crate::k8s::QuantityError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid quantity `{value}`: {source}")]
    InvalidQuantity {
        value: String,
        #[source]
        source: QuantityError,
    },
    #[error("`{value}` must be greater than zero")]
    Zero { value: String },
}

pub use cli::*;
pub use serve::*;
