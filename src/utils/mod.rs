/*!
 * Utilities Module
 *
 * Contains utility functions for error handling, validation, NDC
 * normalization, keyed locking, retry backoff, and permission checks.
 */

pub mod errors;
pub mod locks;
pub mod ndc;
pub mod permissions;
pub mod retry;
pub mod validators;

pub use errors::{EngineError, ErrorCategory, Result};
pub use locks::LockRegistry;
pub use ndc::{format_ndc, normalize_ndc, parse_barcode, BarcodeFormat};
pub use retry::RetryPolicy;
