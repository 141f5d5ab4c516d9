//! Live patching of `CreateProcessInternalW`.
//!
//! Every documented user-mode creation API (`CreateProcessW`,
//! `CreateProcessAsUserW`, ...) funnels through kernelbase's
//! `CreateProcessInternalW`, so patching that single entry point gives
//! complete coverage. The patch rewrites the import-table slots bound to
//! the target in every module loaded at install time; the trampoline below
//! is a free function that reads the active interceptor through the
//! registry's atomic handle, never a closure capturing instance state.
//!
//! Known gaps of import patching: calls made inside kernelbase itself do
//! not go through an import table, and modules loaded after install keep
//! their unpatched imports.
//!
//! 64-bit only: the import walk parses `IMAGE_NT_HEADERS64`.

use crate::attach::ThreadControl;
use crate::error::HookError;
use crate::error::Result;
use crate::injector::ProcessCreationHook;
use crate::interceptor::SpawnedProcess;
use crate::registry;
use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use tracing::debug;
use tracing::warn;
use windhawk_utils_wide_string::from_wide;
use windhawk_utils_wide_string::to_wide;
use windows_sys::Win32::Foundation::BOOL;
use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::Foundation::DUPLICATE_SAME_ACCESS;
use windows_sys::Win32::Foundation::DuplicateHandle;
use windows_sys::Win32::Foundation::ERROR_INVALID_FUNCTION;
use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Foundation::HMODULE;
use windows_sys::Win32::Foundation::SetLastError;
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::System::Diagnostics::Debug::IMAGE_NT_HEADERS64;
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::System::LibraryLoader::GetProcAddress;
use windows_sys::Win32::System::Memory::PAGE_PROTECTION_FLAGS;
use windows_sys::Win32::System::Memory::PAGE_READWRITE;
use windows_sys::Win32::System::Memory::VirtualProtect;
use windows_sys::Win32::System::ProcessStatus::EnumProcessModules;
use windows_sys::Win32::System::SystemServices::IMAGE_DOS_HEADER;
use windows_sys::Win32::System::SystemServices::IMAGE_IMPORT_DESCRIPTOR;
use windows_sys::Win32::System::Threading::CREATE_SUSPENDED;
use windows_sys::Win32::System::Threading::GetCurrentProcess;
use windows_sys::Win32::System::Threading::PROCESS_INFORMATION;
use windows_sys::Win32::System::Threading::QueryFullProcessImageNameW;
use windows_sys::Win32::System::Threading::ResumeThread;
use windows_sys::Win32::System::Threading::STARTUPINFOW;
use windows_sys::core::PCWSTR;
use windows_sys::core::PWSTR;

const TARGET_MODULE: &str = "kernelbase.dll";
const TARGET_SYMBOL: &[u8] = b"CreateProcessInternalW\0";

// IMAGE_DIRECTORY_ENTRY_IMPORT
const IMPORT_DIRECTORY_INDEX: usize = 1;
// IMAGE_DOS_SIGNATURE ("MZ") / IMAGE_NT_SIGNATURE ("PE\0\0")
const DOS_SIGNATURE: u16 = 0x5A4D;
const NT_SIGNATURE: u32 = 0x0000_4550;

type CreateProcessInternalWFn = unsafe extern "system" fn(
    HANDLE,
    PCWSTR,
    PWSTR,
    *const SECURITY_ATTRIBUTES,
    *const SECURITY_ATTRIBUTES,
    BOOL,
    u32,
    *const c_void,
    PCWSTR,
    *const STARTUPINFOW,
    *mut PROCESS_INFORMATION,
    *mut HANDLE,
) -> BOOL;

/// The pre-hook entry point, set while the hook is installed. The
/// trampoline reads it on every call.
static ORIGINAL: AtomicUsize = AtomicUsize::new(0);

/// A duplicated handle to a spawned process's primary thread.
pub struct WindowsThreadControl {
    handle: HANDLE,
}

// A duplicated kernel handle has no thread affinity.
unsafe impl Send for WindowsThreadControl {}
unsafe impl Sync for WindowsThreadControl {}

impl WindowsThreadControl {
    /// Duplicates `source` so resuming stays possible after the creation
    /// caller closes its own handles.
    fn duplicate_from(source: HANDLE) -> Result<Self> {
        let current = unsafe { GetCurrentProcess() };
        let mut duplicated: HANDLE = 0;
        let ok = unsafe {
            DuplicateHandle(
                current,
                source,
                current,
                &mut duplicated,
                0,
                0,
                DUPLICATE_SAME_ACCESS,
            )
        };
        if ok == 0 {
            return Err(HookError::Os {
                call: "DuplicateHandle",
                code: unsafe { GetLastError() },
            });
        }
        Ok(Self { handle: duplicated })
    }
}

impl ThreadControl for WindowsThreadControl {
    fn resume(&self) -> Result<()> {
        let previous = unsafe { ResumeThread(self.handle) };
        if previous == u32::MAX {
            return Err(HookError::Os {
                call: "ResumeThread",
                code: unsafe { GetLastError() },
            });
        }
        Ok(())
    }
}

impl Drop for WindowsThreadControl {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

fn query_image_path(process: HANDLE) -> Option<PathBuf> {
    let mut buf = [0u16; 1024];
    let mut len = buf.len() as u32;
    let ok = unsafe { QueryFullProcessImageNameW(process, 0, buf.as_mut_ptr(), &mut len) };
    if ok == 0 {
        return None;
    }
    Some(PathBuf::from(from_wide(&buf[..len as usize])))
}

/// Builds the [`SpawnedProcess`] the decision logic runs against. On any
/// failure the process is put back into the state the unhooked call would
/// have left it in, and `None` is returned.
unsafe fn spawned_from(
    info: *const PROCESS_INFORMATION,
    caller_requested_suspended: bool,
    hook_forced_suspension: bool,
) -> Option<SpawnedProcess> {
    let info = unsafe { &*info };
    let thread = match WindowsThreadControl::duplicate_from(info.hThread) {
        Ok(thread) => Arc::new(thread),
        Err(err) => {
            warn!(process_id = info.dwProcessId, %err, "cannot track new thread");
            if hook_forced_suspension {
                unsafe {
                    ResumeThread(info.hThread);
                }
            }
            return None;
        }
    };
    Some(SpawnedProcess {
        process_id: info.dwProcessId,
        image_path: query_image_path(info.hProcess),
        caller_requested_suspended,
        hook_forced_suspension,
        thread,
    })
}

/// The patched entry point. Pass-through preserves the caller's arguments
/// and the original call's result exactly; only the outermost invocation
/// forces a suspended start so the decision logic can hold the process.
unsafe extern "system" fn create_process_internal_w_hook(
    user_token: HANDLE,
    application_name: PCWSTR,
    command_line: PWSTR,
    process_attributes: *const SECURITY_ATTRIBUTES,
    thread_attributes: *const SECURITY_ATTRIBUTES,
    inherit_handles: BOOL,
    creation_flags: u32,
    environment: *const c_void,
    current_directory: PCWSTR,
    startup_info: *const STARTUPINFOW,
    process_information: *mut PROCESS_INFORMATION,
    restricted_user_token: *mut HANDLE,
) -> BOOL {
    let original = ORIGINAL.load(Ordering::SeqCst);
    if original == 0 {
        // Uninstall raced with an in-flight call; fail the creation with a
        // definite error code rather than whatever last error is lying
        // around.
        unsafe {
            SetLastError(ERROR_INVALID_FUNCTION);
        }
        return 0;
    }
    let original: CreateProcessInternalWFn =
        unsafe { std::mem::transmute::<usize, CreateProcessInternalWFn>(original) };

    let invoke = |flags: u32| unsafe {
        original(
            user_token,
            application_name,
            command_line,
            process_attributes,
            thread_attributes,
            inherit_handles,
            flags,
            environment,
            current_directory,
            startup_info,
            process_information,
            restricted_user_token,
        )
    };

    let Some(interceptor) = registry::active() else {
        return invoke(creation_flags);
    };

    let caller_requested_suspended = creation_flags & CREATE_SUSPENDED != 0;
    let (ret, _forced) = interceptor.pass_through(
        |outermost| {
            let force = outermost && !caller_requested_suspended;
            let flags = if force {
                creation_flags | CREATE_SUSPENDED
            } else {
                creation_flags
            };
            (invoke(flags), force)
        },
        |&(ret, forced)| {
            if ret == 0 || process_information.is_null() {
                return None;
            }
            unsafe { spawned_from(process_information, caller_requested_suspended, forced) }
        },
    );
    ret
}

struct PatchedSlot {
    slot: *mut usize,
    original: usize,
}

/// [`ProcessCreationHook`] implementation patching every loaded module's
/// import-table slots for `CreateProcessInternalW`.
pub struct CreateProcessInternalWHook {
    patched: Vec<PatchedSlot>,
}

// The raw slot pointers reference loader-owned, process-lifetime memory.
unsafe impl Send for CreateProcessInternalWHook {}

impl CreateProcessInternalWHook {
    pub fn new() -> Self {
        Self {
            patched: Vec::new(),
        }
    }
}

impl Default for CreateProcessInternalWHook {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessCreationHook for CreateProcessInternalWHook {
    fn install(&mut self) -> Result<()> {
        if !self.patched.is_empty() {
            return Err(HookError::AlreadyInstalled);
        }

        let target_module = unsafe { GetModuleHandleW(to_wide(TARGET_MODULE).as_ptr()) };
        if target_module == 0 {
            return Err(HookError::EntryPointUnresolvable {
                module: TARGET_MODULE,
                symbol: "CreateProcessInternalW",
            });
        }
        let Some(target) = (unsafe { GetProcAddress(target_module, TARGET_SYMBOL.as_ptr()) })
        else {
            return Err(HookError::EntryPointUnresolvable {
                module: TARGET_MODULE,
                symbol: "CreateProcessInternalW",
            });
        };
        let target = target as usize;

        // Every import of the target bound anywhere in the process routes
        // through the hook; at minimum kernel32's slots must be found.
        let mut slots = Vec::new();
        for module in loaded_modules()? {
            slots.extend(unsafe { find_import_slots(module as usize, target) });
        }
        if slots.is_empty() {
            return Err(HookError::ImportSlotNotFound);
        }

        ORIGINAL.store(target, Ordering::SeqCst);
        let replacement = create_process_internal_w_hook as usize;
        for slot in slots {
            if let Err(err) = unsafe { write_slot(slot, replacement) } {
                // Roll back so no partially-installed state is retained.
                for patched in self.patched.drain(..) {
                    let _ = unsafe { write_slot(patched.slot, patched.original) };
                }
                ORIGINAL.store(0, Ordering::SeqCst);
                return Err(err);
            }
            self.patched.push(PatchedSlot {
                slot,
                original: target,
            });
        }

        debug!(slots = self.patched.len(), "patched CreateProcessInternalW imports");
        Ok(())
    }

    fn uninstall(&mut self) -> Result<()> {
        if self.patched.is_empty() {
            return Err(HookError::NotInstalled);
        }
        let mut first_error = None;
        for patched in self.patched.drain(..) {
            if let Err(err) = unsafe { write_slot(patched.slot, patched.original) } {
                warn!(%err, "failed to restore an import slot");
                first_error.get_or_insert(err);
            }
        }
        ORIGINAL.store(0, Ordering::SeqCst);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for CreateProcessInternalWHook {
    fn drop(&mut self) {
        if !self.patched.is_empty() {
            let _ = self.uninstall();
        }
    }
}

/// Snapshots the modules currently loaded into this process.
fn loaded_modules() -> Result<Vec<HMODULE>> {
    let process = unsafe { GetCurrentProcess() };
    let mut modules: Vec<HMODULE> = vec![0; 256];
    loop {
        let capacity = (modules.len() * std::mem::size_of::<HMODULE>()) as u32;
        let mut needed: u32 = 0;
        let ok =
            unsafe { EnumProcessModules(process, modules.as_mut_ptr(), capacity, &mut needed) };
        if ok == 0 {
            return Err(HookError::Os {
                call: "EnumProcessModules",
                code: unsafe { GetLastError() },
            });
        }
        if needed <= capacity {
            modules.truncate(needed as usize / std::mem::size_of::<HMODULE>());
            return Ok(modules);
        }
        modules.resize(needed as usize / std::mem::size_of::<HMODULE>(), 0);
    }
}

/// Walks `base`'s import descriptors and collects every bound thunk slot
/// currently routing to `target`.
unsafe fn find_import_slots(base: usize, target: usize) -> Vec<*mut usize> {
    let mut out = Vec::new();
    let dos = base as *const IMAGE_DOS_HEADER;
    if unsafe { (*dos).e_magic } != DOS_SIGNATURE {
        return out;
    }
    let nt = (base + unsafe { (*dos).e_lfanew } as usize) as *const IMAGE_NT_HEADERS64;
    if unsafe { (*nt).Signature } != NT_SIGNATURE {
        return out;
    }
    let directory = unsafe { (*nt).OptionalHeader.DataDirectory[IMPORT_DIRECTORY_INDEX] };
    if directory.VirtualAddress == 0 {
        return out;
    }

    let mut descriptor = (base + directory.VirtualAddress as usize) as *const IMAGE_IMPORT_DESCRIPTOR;
    while unsafe { (*descriptor).Name } != 0 {
        let first_thunk = unsafe { (*descriptor).FirstThunk };
        if first_thunk != 0 {
            let mut slot = (base + first_thunk as usize) as *mut usize;
            while unsafe { *slot } != 0 {
                if unsafe { *slot } == target {
                    out.push(slot);
                }
                slot = unsafe { slot.add(1) };
            }
        }
        descriptor = unsafe { descriptor.add(1) };
    }
    out
}

/// Swaps one import slot, temporarily lifting the page protection. The
/// store itself is atomic so concurrent callers read either the old or the
/// new entry point, never a torn pointer.
unsafe fn write_slot(slot: *mut usize, value: usize) -> Result<()> {
    let mut previous: PAGE_PROTECTION_FLAGS = 0;
    let ok = unsafe {
        VirtualProtect(
            slot as *const c_void,
            std::mem::size_of::<usize>(),
            PAGE_READWRITE,
            &mut previous,
        )
    };
    if ok == 0 {
        return Err(HookError::Os {
            call: "VirtualProtect",
            code: unsafe { GetLastError() },
        });
    }

    unsafe {
        (*(slot as *const AtomicUsize)).store(value, Ordering::SeqCst);
    }

    let mut restored: PAGE_PROTECTION_FLAGS = 0;
    let ok = unsafe {
        VirtualProtect(
            slot as *const c_void,
            std::mem::size_of::<usize>(),
            previous,
            &mut restored,
        )
    };
    if ok == 0 {
        warn!("failed to restore import table page protection");
    }
    Ok(())
}
