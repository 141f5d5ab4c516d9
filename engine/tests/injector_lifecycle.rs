//! End-to-end injector behavior against a fake process-creation hook.

use serial_test::serial;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use windhawk_engine::Attachment;
use windhawk_engine::AttachmentNotifier;
use windhawk_engine::HookError;
use windhawk_engine::InjectionDecision;
use windhawk_engine::InjectionFilters;
use windhawk_engine::NewProcessEvent;
use windhawk_engine::NewProcessInjector;
use windhawk_engine::ProcessCreationHook;
use windhawk_engine::SpawnedProcess;
use windhawk_engine::ThreadControl;
use windhawk_engine::registry;

#[derive(Default)]
struct FakeThread {
    resumes: AtomicU32,
}

impl ThreadControl for FakeThread {
    fn resume(&self) -> windhawk_engine::Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<(PathBuf, InjectionDecision, Option<Arc<Attachment>>)>>,
}

impl AttachmentNotifier for RecordingNotifier {
    fn on_new_process(&self, event: NewProcessEvent, attachment: Option<Arc<Attachment>>) {
        self.events
            .lock()
            .unwrap()
            .push((event.image_path, event.decision, attachment));
    }
}

/// Stands in for the live patch; install/uninstall only flips a flag the
/// simulated entry point consults.
struct FakeHook {
    installed: Arc<AtomicBool>,
}

impl ProcessCreationHook for FakeHook {
    fn install(&mut self) -> windhawk_engine::Result<()> {
        self.installed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn uninstall(&mut self) -> windhawk_engine::Result<()> {
        self.installed.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingHook;

impl ProcessCreationHook for FailingHook {
    fn install(&mut self) -> windhawk_engine::Result<()> {
        Err(HookError::ImportSlotNotFound)
    }

    fn uninstall(&mut self) -> windhawk_engine::Result<()> {
        Ok(())
    }
}

/// Simulates one invocation of the patched entry point: routed through the
/// active interceptor while one is installed, plain pass-through otherwise.
fn simulate_create(image: &str, thread: &Arc<FakeThread>) -> bool {
    match registry::active() {
        Some(interceptor) => interceptor.pass_through(
            |outermost| {
                assert!(outermost);
                true
            },
            |&succeeded| {
                succeeded.then(|| SpawnedProcess {
                    process_id: 4242,
                    image_path: Some(PathBuf::from(image)),
                    caller_requested_suspended: false,
                    hook_forced_suspension: true,
                    thread: thread.clone() as Arc<dyn ThreadControl>,
                })
            },
        ),
        None => true,
    }
}

fn injector(notifier: Arc<RecordingNotifier>, installed: Arc<AtomicBool>) -> NewProcessInjector {
    NewProcessInjector::with_attach_deadline(
        999,
        InjectionFilters::new("*.exe", r"system32\*", "werfault.exe"),
        notifier,
        Box::new(FakeHook { installed }),
        Duration::from_secs(60),
    )
    .expect("injector installs")
}

#[test]
#[serial]
fn eligible_process_is_held_until_the_collaborator_completes() {
    let notifier = Arc::new(RecordingNotifier::default());
    let installed = Arc::new(AtomicBool::new(false));
    let _injector = injector(notifier.clone(), installed.clone());
    assert!(installed.load(Ordering::SeqCst));

    let thread = Arc::new(FakeThread::default());
    assert!(simulate_create(r"C:\Users\a\app.exe", &thread));

    let events = notifier.events.lock().unwrap();
    let (image, decision, attachment) = &events[0];
    assert_eq!(image, &PathBuf::from(r"C:\Users\a\app.exe"));
    assert_eq!(*decision, InjectionDecision::InjectAndHold);
    let attachment = attachment.as_ref().expect("held process has an attachment");
    assert_eq!(thread.resumes.load(Ordering::SeqCst), 0);

    assert!(attachment.complete().unwrap());
    assert_eq!(thread.resumes.load(Ordering::SeqCst), 1);
}

#[test]
#[serial]
fn excluded_process_passes_through_untouched_except_resume() {
    let notifier = Arc::new(RecordingNotifier::default());
    let installed = Arc::new(AtomicBool::new(false));
    let _injector = injector(notifier.clone(), installed);

    let thread = Arc::new(FakeThread::default());
    assert!(simulate_create(r"C:\Windows\System32\notepad.exe", &thread));

    assert!(notifier.events.lock().unwrap().is_empty());
    // The forced suspension is undone so the caller sees original behavior.
    assert_eq!(thread.resumes.load(Ordering::SeqCst), 1);
}

#[test]
#[serial]
fn exempt_process_is_resumed_immediately() {
    let notifier = Arc::new(RecordingNotifier::default());
    let installed = Arc::new(AtomicBool::new(false));
    let _injector = injector(notifier.clone(), installed);

    let thread = Arc::new(FakeThread::default());
    assert!(simulate_create(r"C:\Tools\werfault.exe", &thread));

    let events = notifier.events.lock().unwrap();
    assert_eq!(events[0].1, InjectionDecision::InjectAndResume);
    assert!(events[0].2.is_none());
    assert_eq!(thread.resumes.load(Ordering::SeqCst), 1);
}

#[test]
#[serial]
fn excluded_exempt_process_is_skipped_not_resumed_as_exempt() {
    let notifier = Arc::new(RecordingNotifier::default());
    let installed = Arc::new(AtomicBool::new(false));
    let _injector = injector(notifier.clone(), installed);

    // The exclusion wins over the exemption; the collaborator never hears
    // about the process.
    let thread = Arc::new(FakeThread::default());
    assert!(simulate_create(r"C:\Windows\System32\werfault.exe", &thread));

    assert!(notifier.events.lock().unwrap().is_empty());
    assert_eq!(thread.resumes.load(Ordering::SeqCst), 1);
}

#[test]
#[serial]
fn second_injector_cannot_coexist() {
    let notifier = Arc::new(RecordingNotifier::default());
    let installed = Arc::new(AtomicBool::new(false));
    let _first = injector(notifier.clone(), installed.clone());

    let second = NewProcessInjector::new(
        999,
        InjectionFilters::default(),
        notifier,
        Box::new(FakeHook { installed }),
    );
    assert!(matches!(second, Err(HookError::AlreadyInstalled)));
}

#[test]
#[serial]
fn hook_install_failure_leaves_no_partial_state() {
    let notifier = Arc::new(RecordingNotifier::default());
    let failed = NewProcessInjector::new(
        999,
        InjectionFilters::default(),
        notifier.clone(),
        Box::new(FailingHook),
    );
    assert!(matches!(failed, Err(HookError::ImportSlotNotFound)));
    assert!(registry::active().is_none());

    // The slot is reusable right away.
    let installed = Arc::new(AtomicBool::new(false));
    let _injector = injector(notifier, installed);
    assert!(registry::active().is_some());
}

#[test]
#[serial]
fn teardown_restores_plain_pass_through() {
    let notifier = Arc::new(RecordingNotifier::default());
    let installed = Arc::new(AtomicBool::new(false));
    {
        let _injector = injector(notifier.clone(), installed.clone());
        assert!(installed.load(Ordering::SeqCst));
    }
    assert!(!installed.load(Ordering::SeqCst), "hook uninstalled on drop");
    assert!(registry::active().is_none());

    let thread = Arc::new(FakeThread::default());
    assert!(simulate_create(r"C:\Users\a\app.exe", &thread));
    assert!(notifier.events.lock().unwrap().is_empty());
    assert_eq!(thread.resumes.load(Ordering::SeqCst), 0);
}

#[test]
#[serial]
fn expired_hold_is_force_resumed_by_the_watchdog() {
    let notifier = Arc::new(RecordingNotifier::default());
    let installed = Arc::new(AtomicBool::new(false));
    let _injector = NewProcessInjector::with_attach_deadline(
        999,
        InjectionFilters::default(),
        notifier.clone(),
        Box::new(FakeHook { installed }),
        Duration::from_millis(20),
    )
    .expect("injector installs");

    let thread = Arc::new(FakeThread::default());
    assert!(simulate_create(r"C:\Users\a\app.exe", &thread));

    let attachment = {
        let events = notifier.events.lock().unwrap();
        events[0].2.clone().expect("held process has an attachment")
    };

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while attachment.is_pending() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!attachment.is_pending(), "watchdog resumed the hold");
    assert_eq!(thread.resumes.load(Ordering::SeqCst), 1);
}
