//! Live private-namespace behavior; these run only on Windows.
//!
//! Session ids are derived from this test process's id so concurrent test
//! runs on one machine never collide on namespace names. `AccessDenied`
//! needs a below-Medium-integrity caller and is not reachable from a
//! normally elevated test process.

#![cfg(windows)]

use windhawk_session_namespace::NamespaceError;
use windhawk_session_namespace::SessionNamespace;
use windhawk_utils_wide_string::to_wide;
use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::System::Threading::CreateEventW;
use windows_sys::Win32::System::Threading::EVENT_ALL_ACCESS;
use windows_sys::Win32::System::Threading::OpenEventW;

fn session_id(offset: u32) -> u32 {
    std::process::id().wrapping_add(offset)
}

#[test]
fn created_namespace_can_be_opened_and_shares_objects() {
    let id = session_id(0);
    let owner = SessionNamespace::create(id).expect("create namespace");

    // An object created through the owner handle is visible through an
    // opened handle under the same qualified name.
    let event_name = to_wide(&owner.object_name("InjectionReadyEvent"));
    let event =
        unsafe { CreateEventW(std::ptr::null(), 1, 0, event_name.as_ptr()) };
    assert_ne!(event, 0, "event inside the namespace");

    let reader = SessionNamespace::open(id).expect("open namespace");
    assert_eq!(reader.name(), owner.name());

    let reader_event_name = to_wide(&reader.object_name("InjectionReadyEvent"));
    let opened =
        unsafe { OpenEventW(EVENT_ALL_ACCESS, 0, reader_event_name.as_ptr()) };
    assert_ne!(opened, 0, "event reachable through the opened handle");

    unsafe {
        CloseHandle(opened);
        CloseHandle(event);
    }
}

#[test]
fn duplicate_create_is_a_collision_not_a_reuse() {
    let id = session_id(1);
    let _owner = SessionNamespace::create(id).expect("create namespace");

    let duplicate = SessionNamespace::create(id);
    assert!(matches!(duplicate, Err(NamespaceError::AlreadyExists)));
}

#[test]
fn open_of_an_inactive_session_reports_not_found() {
    let id = session_id(2);
    let missing = SessionNamespace::open(id);
    assert!(matches!(missing, Err(NamespaceError::NotFound(got)) if got == id));
}

#[test]
fn destroy_on_drop_makes_the_name_reusable() {
    let id = session_id(3);
    drop(SessionNamespace::create(id).expect("create namespace"));

    // The owner destroyed the namespace, so the name is free again.
    let recreated = SessionNamespace::create(id).expect("re-create after destroy");
    drop(recreated);

    let gone = SessionNamespace::open(id);
    assert!(matches!(gone, Err(NamespaceError::NotFound(_))));
}
