//! Discretionary access descriptor for namespace creation.

use crate::error::NamespaceError;
use crate::error::Result;
use std::ffi::c_void;
use windhawk_utils_wide_string::to_wide;
use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::Foundation::HLOCAL;
use windows_sys::Win32::Foundation::LocalFree;
use windows_sys::Win32::Security::Authorization::ConvertStringSecurityDescriptorToSecurityDescriptorW;
use windows_sys::Win32::Security::Authorization::SDDL_REVISION_1;

/// Grants full access to the session's legitimate principals: Everyone,
/// SYSTEM and Administrators. The boundary descriptor, not this DACL, is
/// what keeps lower-trust callers out.
const FULL_ACCESS_SDDL: &str = "D:(A;;GA;;;WD)(A;;GA;;;SY)(A;;GA;;;BA)";

pub(crate) struct OwnedSecurityDescriptor {
    raw: *mut c_void,
}

impl OwnedSecurityDescriptor {
    pub(crate) fn as_raw(&self) -> *mut c_void {
        self.raw
    }
}

impl Drop for OwnedSecurityDescriptor {
    fn drop(&mut self) {
        unsafe {
            LocalFree(self.raw as HLOCAL);
        }
    }
}

pub(crate) fn full_access_descriptor() -> Result<OwnedSecurityDescriptor> {
    let sddl_w = to_wide(FULL_ACCESS_SDDL);
    let mut raw: *mut c_void = std::ptr::null_mut();
    let ok = unsafe {
        ConvertStringSecurityDescriptorToSecurityDescriptorW(
            sddl_w.as_ptr(),
            SDDL_REVISION_1,
            &mut raw,
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(NamespaceError::Os {
            call: "ConvertStringSecurityDescriptorToSecurityDescriptorW",
            code: unsafe { GetLastError() },
        });
    }
    Ok(OwnedSecurityDescriptor { raw })
}
