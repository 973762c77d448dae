//! Error handling for the content cache
//!
//! Every error carries the context needed to diagnose it plus a
//! [`RecoveryHint`] describing what a caller can do about it.

mod conversions;
mod recovery;
mod types;

pub use types::*;
