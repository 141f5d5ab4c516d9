//! Namespace error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NamespaceError>;

/// Failure categories for session namespace operations.
///
/// Callers are expected to branch on the category: `AlreadyExists` means a
/// name collision or leftover state from a crashed peer and must not be
/// retried blindly; `NotFound` is expected when opening before the session
/// manager has started; `AccessDenied` is fatal for that caller;
/// `ResourceExhausted` may be retried with backoff.
#[derive(Error, Debug)]
pub enum NamespaceError {
    /// The formatted namespace name would exceed the fixed bound. Never
    /// truncated instead.
    #[error("namespace name for session {session_id} would exceed {max} characters")]
    NameTooLong { session_id: u32, max: usize },

    /// A namespace or boundary with the same name already exists with an
    /// incompatible descriptor.
    #[error("session namespace already exists with an incompatible descriptor")]
    AlreadyExists,

    /// No session with this id is currently active.
    #[error("no active session namespace for session {0}")]
    NotFound(u32),

    /// The caller's security context does not satisfy the boundary's
    /// required identities (e.g. runs below Medium integrity).
    #[error("access to the session namespace was denied")]
    AccessDenied,

    /// Transient OS resource failure; retry policy is the caller's.
    #[error("transient resource failure (os error {0})")]
    ResourceExhausted(u32),

    /// Any other OS-level failure, with the originating call for context.
    #[error("{call} failed (os error {code})")]
    Os { call: &'static str, code: u32 },
}
