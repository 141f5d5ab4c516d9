//! Session-scoped private namespaces.

use crate::error::NamespaceError;
use crate::error::Result;

/// ASCII prefix shared by every session namespace and boundary name.
pub const NAMESPACE_PREFIX: &str = "WindhawkSession";

/// Fixed upper bound on a namespace name: the prefix plus the widest
/// decimal rendering of a `u32` session id.
pub const NAMESPACE_NAME_MAX_LEN: usize = NAMESPACE_PREFIX.len() + 10;

/// Derives the deterministic namespace (and boundary) name for a session.
///
/// The same name is used for both the boundary and the namespace so that
/// both the isolation and its name are unique per session manager process;
/// otherwise concurrent sessions would block each other from creating their
/// own namespaces, and two engine versions loaded into one host could not
/// operate side by side.
///
/// Construction fails loudly if the formatted name would exceed
/// [`NAMESPACE_NAME_MAX_LEN`]; it is never truncated.
pub fn session_namespace_name(session_id: u32) -> Result<String> {
    let name = format!("{NAMESPACE_PREFIX}{session_id}");
    if name.len() > NAMESPACE_NAME_MAX_LEN {
        return Err(NamespaceError::NameTooLong {
            session_id,
            max: NAMESPACE_NAME_MAX_LEN,
        });
    }
    Ok(name)
}

/// Fully qualified name for a kernel object that lives inside the session
/// namespace, e.g. `WindhawkSession1234\InjectionReadyEvent`.
pub fn namespace_object_name(namespace_name: &str, object_name: &str) -> String {
    format!("{namespace_name}\\{object_name}")
}

#[cfg(windows)]
pub use os::SessionNamespace;

#[cfg(windows)]
mod os {
    use super::NamespaceError;
    use super::Result;
    use super::namespace_object_name;
    use super::session_namespace_name;
    use crate::boundary::BoundaryDescriptor;
    use crate::security;
    use std::ffi::c_void;
    use tracing::debug;
    use windhawk_utils_wide_string::to_wide;
    use windows_sys::Win32::Foundation::ERROR_ACCESS_DENIED;
    use windows_sys::Win32::Foundation::ERROR_ALREADY_EXISTS;
    use windows_sys::Win32::Foundation::ERROR_FILE_NOT_FOUND;
    use windows_sys::Win32::Foundation::ERROR_NOT_ENOUGH_MEMORY;
    use windows_sys::Win32::Foundation::ERROR_NO_SYSTEM_RESOURCES;
    use windows_sys::Win32::Foundation::ERROR_PATH_NOT_FOUND;
    use windows_sys::Win32::Foundation::GetLastError;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
    use windows_sys::Win32::System::Threading::ClosePrivateNamespace;
    use windows_sys::Win32::System::Threading::CreatePrivateNamespaceW;
    use windows_sys::Win32::System::Threading::OpenPrivateNamespaceW;
    use windows_sys::Win32::System::Threading::PRIVATE_NAMESPACE_FLAG_DESTROY;

    /// A named kernel-object container scoped to one session.
    ///
    /// The handle from [`SessionNamespace::create`] owns the namespace and
    /// destroys it on drop; handles from [`SessionNamespace::open`] merely
    /// reference it and only detach on drop.
    pub struct SessionNamespace {
        handle: HANDLE,
        name: String,
        owned: bool,
    }

    // The namespace handle is a plain kernel handle with no thread affinity.
    unsafe impl Send for SessionNamespace {}
    unsafe impl Sync for SessionNamespace {}

    impl SessionNamespace {
        /// Creates the session's namespace. Called once, by the session
        /// manager process.
        ///
        /// Fails with [`NamespaceError::AlreadyExists`] if a namespace or
        /// boundary of the same name already exists; that is a name
        /// collision or leftover state, never a success.
        pub fn create(session_id: u32) -> Result<Self> {
            let name = session_namespace_name(session_id)?;
            let boundary = BoundaryDescriptor::for_session(&name).build_os()?;
            let descriptor = security::full_access_descriptor()?;

            let attrs = SECURITY_ATTRIBUTES {
                nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
                lpSecurityDescriptor: descriptor.as_raw(),
                bInheritHandle: 0,
            };

            let name_w = to_wide(&name);
            let handle = unsafe {
                CreatePrivateNamespaceW(
                    &attrs,
                    boundary.as_raw() as *const c_void,
                    name_w.as_ptr(),
                )
            };
            if handle == 0 {
                return Err(map_create_error(unsafe { GetLastError() }));
            }

            debug!(session_id, namespace = %name, "created session namespace");
            Ok(Self {
                handle,
                name,
                owned: true,
            })
        }

        /// Joins an existing session namespace without creating it.
        pub fn open(session_id: u32) -> Result<Self> {
            let name = session_namespace_name(session_id)?;
            let boundary = BoundaryDescriptor::for_session(&name).build_os()?;

            let name_w = to_wide(&name);
            let handle = unsafe {
                OpenPrivateNamespaceW(boundary.as_raw() as *const c_void, name_w.as_ptr())
            };
            if handle == 0 {
                return Err(map_open_error(session_id, unsafe { GetLastError() }));
            }

            debug!(session_id, namespace = %name, "opened session namespace");
            Ok(Self {
                handle,
                name,
                owned: false,
            })
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        /// Fully qualified name for a kernel object inside this namespace.
        pub fn object_name(&self, object_name: &str) -> String {
            namespace_object_name(&self.name, object_name)
        }
    }

    impl Drop for SessionNamespace {
        fn drop(&mut self) {
            let flags = if self.owned {
                PRIVATE_NAMESPACE_FLAG_DESTROY
            } else {
                0
            };
            unsafe {
                let _ = ClosePrivateNamespace(self.handle, flags);
            }
        }
    }

    fn map_create_error(code: u32) -> NamespaceError {
        match code {
            ERROR_ALREADY_EXISTS => NamespaceError::AlreadyExists,
            ERROR_NOT_ENOUGH_MEMORY | ERROR_NO_SYSTEM_RESOURCES => {
                NamespaceError::ResourceExhausted(code)
            }
            _ => NamespaceError::Os {
                call: "CreatePrivateNamespaceW",
                code,
            },
        }
    }

    fn map_open_error(session_id: u32, code: u32) -> NamespaceError {
        match code {
            ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => NamespaceError::NotFound(session_id),
            ERROR_ACCESS_DENIED => NamespaceError::AccessDenied,
            ERROR_NOT_ENOUGH_MEMORY | ERROR_NO_SYSTEM_RESOURCES => {
                NamespaceError::ResourceExhausted(code)
            }
            _ => NamespaceError::Os {
                call: "OpenPrivateNamespaceW",
                code,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn name_is_deterministic() {
        let a = session_namespace_name(1234).expect("name");
        let b = session_namespace_name(1234).expect("name");
        assert_eq!(a, b);
        assert_eq!(a, "WindhawkSession1234");
    }

    #[test]
    fn name_is_injective_over_distinct_ids() {
        let a = session_namespace_name(10).expect("name");
        let b = session_namespace_name(100).expect("name");
        assert_ne!(a, b);
    }

    #[test]
    fn widest_id_fits_the_bound() {
        let name = session_namespace_name(u32::MAX).expect("name");
        assert_eq!(name, "WindhawkSession4294967295");
        assert_eq!(name.len(), NAMESPACE_NAME_MAX_LEN);
    }

    #[test]
    fn object_names_are_namespace_qualified() {
        let name = session_namespace_name(7).expect("name");
        assert_eq!(
            namespace_object_name(&name, "InjectionReadyEvent"),
            "WindhawkSession7\\InjectionReadyEvent"
        );
    }
}
