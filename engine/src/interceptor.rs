//! The process-creation interceptor core.
//!
//! Platform hooks route every invocation of the hooked entry point through
//! [`Interceptor::pass_through`]; the interceptor tracks reentrancy, keeps
//! the underlying call's semantics untouched, and evaluates the injection
//! decision once per outermost successful call.

use crate::attach::Attachment;
use crate::attach::ThreadControl;
use crate::attach::spawn_deadline_watchdog;
use crate::filters::InjectionDecision;
use crate::filters::InjectionFilters;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::debug;
use tracing::trace;
use tracing::warn;

/// How long a non-exempt process is held before it is force-resumed even
/// though the attachment handshake never completed.
pub const DEFAULT_ATTACH_DEADLINE: Duration = Duration::from_secs(10);

/// A process produced by the hooked creation call, as observed by the
/// outermost invocation after the original entry point returned success.
pub struct SpawnedProcess {
    pub process_id: u32,
    /// `None` when image-path resolution failed; the process is then left
    /// untouched.
    pub image_path: Option<PathBuf>,
    /// The caller itself asked for a suspended start.
    pub caller_requested_suspended: bool,
    /// The hook forced a suspended start so a hold is possible.
    pub hook_forced_suspension: bool,
    pub thread: Arc<dyn ThreadControl>,
}

/// The signal handed to the external code-loading collaborator.
pub struct NewProcessEvent {
    /// Process id of the session manager driving this session.
    pub session_id: u32,
    pub process_id: u32,
    pub image_path: PathBuf,
    pub decision: InjectionDecision,
}

/// Boundary to the external code-loading collaborator. For
/// [`InjectionDecision::InjectAndHold`] the attachment is supplied so the
/// collaborator can report completion; for
/// [`InjectionDecision::InjectAndResume`] (and for holds where the caller
/// itself requested suspension) there is nothing to resume and the
/// attachment is `None`.
pub trait AttachmentNotifier: Send + Sync {
    fn on_new_process(&self, event: NewProcessEvent, attachment: Option<Arc<Attachment>>);
}

/// Scoped acquire/release of the reentrancy depth counter. The pairing
/// holds on every exit path, including when the underlying call panics.
struct ReentrancyGuard<'a> {
    depth: &'a AtomicI32,
    outermost: bool,
}

impl<'a> ReentrancyGuard<'a> {
    fn enter(depth: &'a AtomicI32) -> Self {
        let previous = depth.fetch_add(1, Ordering::SeqCst);
        Self {
            depth,
            outermost: previous == 0,
        }
    }

    fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The process-wide interceptor instance. At most one exists at a time;
/// installation goes through [`crate::registry`].
pub struct Interceptor {
    session_id: u32,
    depth: AtomicI32,
    filters: InjectionFilters,
    notifier: Arc<dyn AttachmentNotifier>,
    attach_deadline: Duration,
}

impl Interceptor {
    pub fn new(
        session_id: u32,
        filters: InjectionFilters,
        notifier: Arc<dyn AttachmentNotifier>,
        attach_deadline: Duration,
    ) -> Self {
        Self {
            session_id,
            depth: AtomicI32::new(0),
            filters,
            notifier,
            attach_deadline,
        }
    }

    /// Current reentrancy depth. Zero whenever no hooked call is in flight.
    pub fn depth(&self) -> i32 {
        self.depth.load(Ordering::SeqCst)
    }

    /// Wraps one invocation of the hooked entry point.
    ///
    /// `call` receives whether this is the outermost invocation (so a
    /// platform hook can force a suspended start only there) and must
    /// invoke the original entry point with the caller's arguments
    /// unchanged; its result is returned verbatim. `spawned` inspects the
    /// result and yields the created process only on success. The decision
    /// runs exactly once per outermost successful call; nested invocations
    /// pass through untouched.
    pub fn pass_through<R>(
        &self,
        call: impl FnOnce(bool) -> R,
        spawned: impl FnOnce(&R) -> Option<SpawnedProcess>,
    ) -> R {
        let guard = ReentrancyGuard::enter(&self.depth);
        let result = call(guard.is_outermost());
        if guard.is_outermost() {
            if let Some(process) = spawned(&result) {
                self.handle_spawned(process);
            }
        } else {
            trace!("nested process-creation call passed through");
        }
        result
    }

    /// Evaluates the injection decision. Must never alter the result of the
    /// underlying creation call; every failure path degrades to "leave the
    /// process untouched".
    fn handle_spawned(&self, process: SpawnedProcess) {
        let Some(image_path) = process.image_path.clone() else {
            debug!(
                process_id = process.process_id,
                "image path unresolved; skipping injection"
            );
            self.undo_forced_suspension(&process);
            return;
        };

        let decision = self.filters.decide(&image_path);
        debug!(
            process_id = process.process_id,
            image = %image_path.display(),
            ?decision,
            "injection decision"
        );

        let event = NewProcessEvent {
            session_id: self.session_id,
            process_id: process.process_id,
            image_path,
            decision,
        };

        match decision {
            InjectionDecision::Skip => self.undo_forced_suspension(&process),
            InjectionDecision::InjectAndResume => {
                // Resumed independent of whether the handshake ever
                // completes; these processes cannot tolerate staying
                // suspended.
                self.undo_forced_suspension(&process);
                self.notifier.on_new_process(event, None);
            }
            InjectionDecision::InjectAndHold => {
                if process.hook_forced_suspension {
                    let attachment = Attachment::new(
                        process.process_id,
                        process.thread.clone(),
                        self.attach_deadline,
                    );
                    spawn_deadline_watchdog(attachment.clone());
                    self.notifier.on_new_process(event, Some(attachment));
                } else {
                    // Either the caller asked for suspension (it owns the
                    // resume) or the hook could not suspend; nothing to
                    // hold in both cases.
                    self.notifier.on_new_process(event, None);
                }
            }
        }
    }

    fn undo_forced_suspension(&self, process: &SpawnedProcess) {
        if !process.hook_forced_suspension {
            return;
        }
        if let Err(err) = process.thread.resume() {
            warn!(
                process_id = process.process_id,
                %err,
                "failed to resume thread after skip"
            );
        }
    }
}
