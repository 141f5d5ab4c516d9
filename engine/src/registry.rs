//! Process-wide interceptor registry.
//!
//! The hook target is a single mutable global entry point, so the active
//! interceptor lives in one process-wide slot. Install is checked and
//! fails fast if the slot is occupied. The platform trampoline reads the
//! slot through an atomic handle; the only writers are injector
//! construction and teardown, serialized by a mutex.

use crate::error::HookError;
use crate::error::Result;
use crate::interceptor::Interceptor;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use tracing::debug;

static INSTALL_LOCK: Mutex<()> = Mutex::new(());
static ACTIVE: ArcSwapOption<Interceptor> = ArcSwapOption::const_empty();

/// Claims the singleton slot for `interceptor`.
pub fn install(interceptor: Arc<Interceptor>) -> Result<()> {
    let _writer = INSTALL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if ACTIVE.load().is_some() {
        return Err(HookError::AlreadyInstalled);
    }
    ACTIVE.store(Some(interceptor));
    debug!("interceptor installed");
    Ok(())
}

/// Clears the singleton slot, returning the interceptor that occupied it.
///
/// Caller-sequenced: hooked calls racing with teardown may still observe
/// the old instance through a handle they already loaded.
pub fn uninstall() -> Option<Arc<Interceptor>> {
    let _writer = INSTALL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let previous = ACTIVE.swap(None);
    if previous.is_some() {
        debug!("interceptor uninstalled");
    }
    previous
}

/// Lock-free read of the active interceptor; used by the trampoline on
/// every hooked call.
pub fn active() -> Option<Arc<Interceptor>> {
    ACTIVE.load_full()
}
