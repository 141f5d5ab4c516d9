//! The suspend-until-injected handshake.
//!
//! A held process is an explicit two-state machine: `PendingAttachment`
//! until the code-loading collaborator reports completion, then `Resumed`.
//! Every pending attachment carries a mandatory deadline; a handshake that
//! never completes is force-resumed when it expires rather than leaving the
//! new process suspended indefinitely.

use crate::error::Result;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;
use tracing::warn;

/// Control over a spawned process's primary thread. The Windows
/// implementation wraps a duplicated thread handle; tests substitute a
/// recording fake.
pub trait ThreadControl: Send + Sync {
    fn resume(&self) -> Result<()>;
}

/// Why a held thread was resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeReason {
    /// The collaborator finished attaching.
    HandshakeComplete,
    /// The handshake deadline passed without completion.
    DeadlineExpired,
}

#[derive(Debug, Clone, Copy)]
enum AttachmentState {
    PendingAttachment { deadline: Instant },
    Resumed { reason: ResumeReason },
}

/// One held process, shared between the injector and the collaborator.
pub struct Attachment {
    process_id: u32,
    state: Mutex<AttachmentState>,
    thread: Arc<dyn ThreadControl>,
}

impl Attachment {
    pub fn new(process_id: u32, thread: Arc<dyn ThreadControl>, hold_for: Duration) -> Arc<Self> {
        Arc::new(Self {
            process_id,
            state: Mutex::new(AttachmentState::PendingAttachment {
                deadline: Instant::now() + hold_for,
            }),
            thread,
        })
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            *self.lock_state(),
            AttachmentState::PendingAttachment { .. }
        )
    }

    pub fn deadline(&self) -> Option<Instant> {
        match *self.lock_state() {
            AttachmentState::PendingAttachment { deadline } => Some(deadline),
            AttachmentState::Resumed { .. } => None,
        }
    }

    /// Called by the collaborator once injection finished. Resumes the
    /// thread if this attachment is still pending; later calls and an
    /// already-expired deadline make this a no-op.
    pub fn complete(&self) -> Result<bool> {
        self.transition(ResumeReason::HandshakeComplete)
    }

    /// Force-resumes the thread if the deadline has passed.
    pub fn expire_if_due(&self, now: Instant) -> Result<bool> {
        {
            let state = self.lock_state();
            match *state {
                AttachmentState::PendingAttachment { deadline } if now >= deadline => {}
                _ => return Ok(false),
            }
        }
        let resumed = self.transition(ResumeReason::DeadlineExpired)?;
        if resumed {
            warn!(
                process_id = self.process_id,
                "attachment handshake never completed; force-resuming"
            );
        }
        Ok(resumed)
    }

    /// Moves to `Resumed` and resumes the thread exactly once.
    fn transition(&self, reason: ResumeReason) -> Result<bool> {
        {
            let mut state = self.lock_state();
            match *state {
                AttachmentState::PendingAttachment { .. } => {
                    *state = AttachmentState::Resumed { reason };
                }
                AttachmentState::Resumed { .. } => return Ok(false),
            }
        }
        // The thread is resumed outside the state lock.
        self.thread.resume()?;
        debug!(process_id = self.process_id, ?reason, "resumed held thread");
        Ok(true)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AttachmentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Spawns the watchdog enforcing the attachment deadline.
pub(crate) fn spawn_deadline_watchdog(attachment: Arc<Attachment>) {
    std::thread::spawn(move || {
        while let Some(deadline) = attachment.deadline() {
            let now = Instant::now();
            if now < deadline {
                std::thread::sleep(deadline - now);
            }
            match attachment.expire_if_due(Instant::now()) {
                Ok(_) => {
                    if !attachment.is_pending() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        process_id = attachment.process_id(),
                        %err,
                        "failed to force-resume expired attachment"
                    );
                    break;
                }
            }
        }
    });
}
