//! Response-completion detection.
//!
//! A provider page exposes three noisy signals through [`PageSignals`];
//! [`CompletionDetector`] turns them into a single decision about when a
//! response has finished and is safe to extract.

pub mod completion;
pub mod policy;

use async_trait::async_trait;

use crate::errors::AutoWebError;

pub use completion::{CompletionDetector, CompletionOutcome};
pub use policy::CompletionPolicy;

/// Live page-state oracle for one provider.
#[async_trait]
pub trait PageSignals: Send + Sync {
    /// True while any generation indicator is present (stop affordance,
    /// streaming marker, thinking marker, busy text).
    async fn is_generating(&self) -> Result<bool, AutoWebError>;

    /// Text of the most recent assistant block, excluding nested code/log
    /// chrome. `None` when no block is rendered.
    async fn extract_latest_response(&self) -> Result<Option<String>, AutoWebError>;

    /// Number of assistant response blocks currently rendered.
    async fn count_response_units(&self) -> Result<usize, AutoWebError>;
}
