//! PII tokenization: detect sensitive values in text, swap them for opaque
//! tokens that are safe to show to a model, and swap them back on demand.
//!
//! - [`detector`] finds non-overlapping matches by category priority
//! - [`vault`] owns the token mapping for the lifetime of the server
//! - [`tokenizer`] composes the two into `sanitize` / `restore`
pub mod detector;
pub mod tokenizer;
pub mod vault;

pub use detector::{PiiCategory, PiiDetector, PiiMatch, PiiMatcher};
pub use tokenizer::{Restored, Sanitized, Tokenizer};
pub use vault::TokenVault;
