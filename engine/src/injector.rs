//! The new-process injector owned by the session manager.

use crate::error::Result;
use crate::filters::InjectionFilters;
use crate::interceptor::AttachmentNotifier;
use crate::interceptor::DEFAULT_ATTACH_DEADLINE;
use crate::interceptor::Interceptor;
use crate::registry;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Capability interface for patching one process-creation entry point.
///
/// `install` must leave every invocation of the patched entry point routing
/// through [`registry::active`]; `uninstall` must restore the stored
/// original entry point. Implementations perform the actual in-memory
/// patching; tests substitute a fake that drives
/// [`Interceptor::pass_through`] directly.
pub trait ProcessCreationHook: Send {
    fn install(&mut self) -> Result<()>;
    fn uninstall(&mut self) -> Result<()>;
}

/// Drives process-creation interception for one session.
///
/// Construction claims the process-wide interceptor slot and installs the
/// hook; either failing leaves no partially-installed state. Drop restores
/// the original entry point and clears the slot. Teardown is
/// caller-sequenced: it is safe only once no new hooked calls are expected,
/// e.g. at session shutdown. A hooked call racing with teardown may still
/// run against the old instance; that race is a documented limitation and
/// is not resolved internally.
pub struct NewProcessInjector {
    hook: Box<dyn ProcessCreationHook>,
}

impl NewProcessInjector {
    /// Installs interception for the session owned by the process with id
    /// `session_id`, holding non-exempt eligible processes for at most
    /// [`DEFAULT_ATTACH_DEADLINE`].
    pub fn new(
        session_id: u32,
        filters: InjectionFilters,
        notifier: Arc<dyn AttachmentNotifier>,
        hook: Box<dyn ProcessCreationHook>,
    ) -> Result<Self> {
        Self::with_attach_deadline(
            session_id,
            filters,
            notifier,
            hook,
            DEFAULT_ATTACH_DEADLINE,
        )
    }

    pub fn with_attach_deadline(
        session_id: u32,
        filters: InjectionFilters,
        notifier: Arc<dyn AttachmentNotifier>,
        mut hook: Box<dyn ProcessCreationHook>,
        attach_deadline: Duration,
    ) -> Result<Self> {
        let interceptor = Arc::new(Interceptor::new(
            session_id,
            filters,
            notifier,
            attach_deadline,
        ));
        registry::install(interceptor)?;
        if let Err(err) = hook.install() {
            let _ = registry::uninstall();
            return Err(err);
        }
        Ok(Self { hook })
    }
}

impl Drop for NewProcessInjector {
    fn drop(&mut self) {
        if let Err(err) = self.hook.uninstall() {
            warn!(%err, "failed to restore the original entry point");
        }
        let _ = registry::uninstall();
    }
}
