//! Hook and injector error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HookError>;

#[derive(Error, Debug)]
pub enum HookError {
    /// The process-wide interceptor slot is already occupied. The hook
    /// target is a single mutable global entry point; two coexisting
    /// instances would corrupt each other's restore state.
    #[error("a process-creation interceptor is already installed in this process")]
    AlreadyInstalled,

    /// The lowest-level creation entry point could not be resolved. Fatal
    /// to injector construction; no partially-installed state is retained.
    #[error("could not resolve {symbol} in {module}")]
    EntryPointUnresolvable {
        module: &'static str,
        symbol: &'static str,
    },

    /// No import-table slot routing to the target entry point was found.
    #[error("no import table slot for the target entry point was found")]
    ImportSlotNotFound,

    /// Uninstall was requested on a hook that is not installed.
    #[error("hook is not installed")]
    NotInstalled,

    /// Any other OS-level failure, with the originating call for context.
    #[error("{call} failed (os error {code})")]
    Os { call: &'static str, code: u32 },
}
