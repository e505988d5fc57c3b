//! Failure taxonomy for array operations

use thiserror::Error;

use crate::shape::MAX_SHAPE_FIELDS;

/// Errors surfaced by array operations.
///
/// Escalation from one representation to a more general one is *not* an
/// error: it always succeeds. The cases below are hard failures that
/// propagate to the caller without being retried.
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArrayError {
    /// The operation is not supported by this array representation
    /// (e.g. `append` on the external-table adapter).
    #[error("`{0}` is not supported by this array representation")]
    Unsupported(&'static str),
    /// There is no representable next integer key for `append`.
    /// The key space is never wrapped or reused silently.
    #[error("cannot append: the next integer key would overflow")]
    KeyOverflow,
    /// A shape was requested with more fields than the hard slot limit.
    #[error("shape field count exceeds the limit of {MAX_SHAPE_FIELDS}")]
    TooManyFields,
}
