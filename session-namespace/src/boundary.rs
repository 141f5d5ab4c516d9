//! Security boundary descriptors.
//!
//! A boundary is modelled as a declarative list of required-principal
//! predicates so tests can assert on the predicate set directly; the OS
//! binding lives behind `cfg(windows)`.

#[cfg(windows)]
use crate::error::Result;

/// A security identity that must be present in a caller's token for the
/// caller to cross the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredPrincipal {
    /// The world ("Everyone") SID.
    Everyone,
    /// The Medium mandatory integrity label. Requiring it keeps
    /// lower-trust (sandboxed) callers from joining the boundary, which
    /// would otherwise let them squat on the namespace name before the
    /// legitimate session manager creates it.
    MediumIntegrityLevel,
}

/// A named isolation scope carrying an ordered set of required identities.
///
/// Two boundaries with the same name must carry identical identity sets to
/// be compatible; the OS rejects mismatches at namespace create/open time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryDescriptor {
    name: String,
    required: Vec<RequiredPrincipal>,
}

impl BoundaryDescriptor {
    /// Builds the boundary used for session namespaces: exactly the
    /// Everyone SID plus the Medium integrity label, in that order.
    pub fn for_session(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: vec![
                RequiredPrincipal::Everyone,
                RequiredPrincipal::MediumIntegrityLevel,
            ],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required(&self) -> &[RequiredPrincipal] {
        &self.required
    }

    /// Materializes the boundary as an OS boundary descriptor.
    #[cfg(windows)]
    pub(crate) fn build_os(&self) -> Result<os::OwnedBoundaryDescriptor> {
        os::build(self)
    }
}

#[cfg(windows)]
mod os {
    use super::BoundaryDescriptor;
    use super::RequiredPrincipal;
    use crate::error::NamespaceError;
    use crate::error::Result;
    use std::ffi::c_void;
    use windhawk_utils_wide_string::to_wide;
    use windows_sys::Win32::Foundation::GetLastError;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Security::CreateWellKnownSid;
    use windows_sys::Win32::Security::WinMediumLabelSid;
    use windows_sys::Win32::Security::WinWorldSid;
    use windows_sys::Win32::Security::WELL_KNOWN_SID_TYPE;
    use windows_sys::Win32::System::Threading::AddIntegrityLabelToBoundaryDescriptor;
    use windows_sys::Win32::System::Threading::AddSIDToBoundaryDescriptor;
    use windows_sys::Win32::System::Threading::CreateBoundaryDescriptorW;
    use windows_sys::Win32::System::Threading::DeleteBoundaryDescriptor;

    // SECURITY_MAX_SID_SIZE
    const MAX_SID_SIZE: usize = 68;

    /// RAII wrapper over an OS boundary descriptor handle.
    pub(crate) struct OwnedBoundaryDescriptor {
        raw: HANDLE,
    }

    impl OwnedBoundaryDescriptor {
        pub(crate) fn as_raw(&self) -> HANDLE {
            self.raw
        }
    }

    impl Drop for OwnedBoundaryDescriptor {
        fn drop(&mut self) {
            unsafe { DeleteBoundaryDescriptor(self.raw) };
        }
    }

    fn well_known_sid(sid_type: WELL_KNOWN_SID_TYPE) -> Result<[u8; MAX_SID_SIZE]> {
        let mut sid = [0u8; MAX_SID_SIZE];
        let mut size = MAX_SID_SIZE as u32;
        let ok = unsafe {
            CreateWellKnownSid(
                sid_type,
                std::ptr::null_mut(),
                sid.as_mut_ptr() as *mut c_void,
                &mut size,
            )
        };
        if ok == 0 {
            return Err(NamespaceError::Os {
                call: "CreateWellKnownSid",
                code: unsafe { GetLastError() },
            });
        }
        Ok(sid)
    }

    pub(crate) fn build(desc: &BoundaryDescriptor) -> Result<OwnedBoundaryDescriptor> {
        let name_w = to_wide(desc.name());
        let raw = unsafe { CreateBoundaryDescriptorW(name_w.as_ptr(), 0) };
        if raw == 0 {
            return Err(NamespaceError::Os {
                call: "CreateBoundaryDescriptorW",
                code: unsafe { GetLastError() },
            });
        }
        let mut owned = OwnedBoundaryDescriptor { raw };

        for principal in desc.required() {
            match principal {
                RequiredPrincipal::Everyone => {
                    let mut sid = well_known_sid(WinWorldSid)?;
                    let ok = unsafe {
                        AddSIDToBoundaryDescriptor(
                            &mut owned.raw,
                            sid.as_mut_ptr() as *mut c_void,
                        )
                    };
                    if ok == 0 {
                        return Err(NamespaceError::Os {
                            call: "AddSIDToBoundaryDescriptor",
                            code: unsafe { GetLastError() },
                        });
                    }
                }
                RequiredPrincipal::MediumIntegrityLevel => {
                    let mut sid = well_known_sid(WinMediumLabelSid)?;
                    let ok = unsafe {
                        AddIntegrityLabelToBoundaryDescriptor(
                            &mut owned.raw,
                            sid.as_mut_ptr() as *mut c_void,
                        )
                    };
                    if ok == 0 {
                        return Err(NamespaceError::Os {
                            call: "AddIntegrityLabelToBoundaryDescriptor",
                            code: unsafe { GetLastError() },
                        });
                    }
                }
            }
        }

        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn session_boundary_requires_world_and_medium_integrity() {
        let boundary = BoundaryDescriptor::for_session("WindhawkSession42");
        assert_eq!(boundary.name(), "WindhawkSession42");
        assert_eq!(
            boundary.required(),
            &[
                RequiredPrincipal::Everyone,
                RequiredPrincipal::MediumIntegrityLevel,
            ]
        );
    }

    #[test]
    fn same_name_yields_equivalent_boundary() {
        let a = BoundaryDescriptor::for_session("WindhawkSession7");
        let b = BoundaryDescriptor::for_session("WindhawkSession7");
        assert_eq!(a, b);
    }
}
