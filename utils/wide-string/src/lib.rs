//! UTF-16 conversion helpers for Windows FFI call sites.

use std::ffi::OsStr;

/// Encodes `value` as a NUL-terminated UTF-16 buffer suitable for passing to
/// `*W` Win32 entry points.
pub fn to_wide(value: impl AsRef<OsStr>) -> Vec<u16> {
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        value.as_ref().encode_wide().chain(std::iter::once(0)).collect()
    }
    #[cfg(not(windows))]
    {
        value
            .as_ref()
            .to_string_lossy()
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect()
    }
}

/// Decodes a NUL-terminated or full-length UTF-16 buffer into a `String`,
/// replacing invalid sequences.
pub fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}
