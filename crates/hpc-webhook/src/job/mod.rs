//! Reading labeled batch Jobs.

pub mod extractor;

pub use extractor::extract;
pub use extractor::transfer_label;
pub use extractor::Extraction;
pub use extractor::JobView;
pub use extractor::PvcMount;
