//! Process-creation interception and new-process injection.
//!
//! A session manager instantiates one [`NewProcessInjector`] per host
//! process. The injector claims the process-wide interceptor slot, patches
//! the lowest-level process-creation entry point, and from then on decides
//! for every new process spawned anywhere in the host whether to mark it
//! for injection: hold it suspended until the code-loading collaborator
//! attaches, resume it immediately (thread-attach-exempt images), or leave
//! it untouched.
//!
//! The decision, reentrancy and filter logic is portable and tested
//! against fake hooks; the live patching backend is Windows-only.

mod attach;
mod error;
mod filters;
#[cfg(all(windows, target_arch = "x86_64"))]
mod hook_windows;
mod injector;
mod interceptor;
pub mod registry;

pub use attach::Attachment;
pub use attach::ResumeReason;
pub use attach::ThreadControl;
pub use error::HookError;
pub use error::Result;
pub use filters::InjectionDecision;
pub use filters::InjectionFilters;
#[cfg(all(windows, target_arch = "x86_64"))]
pub use hook_windows::CreateProcessInternalWHook;
#[cfg(all(windows, target_arch = "x86_64"))]
pub use hook_windows::WindowsThreadControl;
pub use injector::NewProcessInjector;
pub use injector::ProcessCreationHook;
pub use interceptor::AttachmentNotifier;
pub use interceptor::DEFAULT_ATTACH_DEADLINE;
pub use interceptor::Interceptor;
pub use interceptor::NewProcessEvent;
pub use interceptor::SpawnedProcess;
