//! [`DaclStore`] backed by the host's security descriptors.
//!
//! On Windows this reads the current DACL with `GetNamedSecurityInfoW`,
//! merges the new entries with `SetEntriesInAclW` and writes the result back
//! with a single `SetNamedSecurityInfoW`. On other platforms a stub is
//! provided that rejects every update so callers still compile.

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;
    use std::io;
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;
    use std::ptr;

    use windows_sys::Win32::Foundation::{ERROR_SUCCESS, LocalFree};
    use windows_sys::Win32::Security::Authorization::{
        ConvertStringSidToSidW, EXPLICIT_ACCESS_W, GRANT_ACCESS, GetNamedSecurityInfoW,
        NO_MULTIPLE_TRUSTEE, SE_FILE_OBJECT, SetEntriesInAclW, SetNamedSecurityInfoW,
        TRUSTEE_IS_SID, TRUSTEE_IS_WELL_KNOWN_GROUP, TRUSTEE_W,
    };
    use windows_sys::Win32::Security::{ACL, DACL_SECURITY_INFORMATION};

    use crate::security::{AccessEntry, DaclStore};

    /// Host security descriptors.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SystemDacls;

    /// Frees a `LocalAlloc`-owned pointer on drop.
    struct LocalBox(*mut c_void);

    impl Drop for LocalBox {
        fn drop(&mut self) {
            if !self.0.is_null() {
                // SAFETY: the pointer was returned by an API documented to
                // allocate with LocalAlloc and is freed exactly once.
                unsafe {
                    LocalFree(self.0 as _);
                }
            }
        }
    }

    fn wide(s: impl AsRef<std::ffi::OsStr>) -> Vec<u16> {
        s.as_ref().encode_wide().chain(std::iter::once(0)).collect()
    }

    fn win32(code: u32) -> io::Result<()> {
        if code == ERROR_SUCCESS {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(code as i32))
        }
    }

    impl DaclStore for SystemDacls {
        fn merge_entries(&self, path: &Path, entries: &[AccessEntry]) -> io::Result<()> {
            let mut name = wide(path.as_os_str());

            // Keep every SID alive until SetEntriesInAclW has copied it.
            let mut sids = Vec::with_capacity(entries.len());
            for entry in entries {
                let sid_str = wide(&entry.sid);
                let mut sid = ptr::null_mut();
                // SAFETY: sid_str is NUL terminated; sid receives a LocalAlloc'd SID.
                if unsafe { ConvertStringSidToSidW(sid_str.as_ptr(), &mut sid) } == 0 {
                    return Err(io::Error::last_os_error());
                }
                sids.push(LocalBox(sid));
            }

            let explicit: Vec<EXPLICIT_ACCESS_W> = entries
                .iter()
                .zip(&sids)
                .map(|(entry, sid)| EXPLICIT_ACCESS_W {
                    grfAccessPermissions: entry.access,
                    grfAccessMode: GRANT_ACCESS,
                    grfInheritance: entry.inheritance.bits(),
                    Trustee: TRUSTEE_W {
                        pMultipleTrustee: ptr::null_mut(),
                        MultipleTrusteeOperation: NO_MULTIPLE_TRUSTEE,
                        TrusteeForm: TRUSTEE_IS_SID,
                        TrusteeType: TRUSTEE_IS_WELL_KNOWN_GROUP,
                        ptstrName: sid.0 as *mut u16,
                    },
                })
                .collect();

            let mut old_dacl: *mut ACL = ptr::null_mut();
            let mut descriptor = ptr::null_mut();
            // SAFETY: out-pointers are valid; old_dacl points into descriptor,
            // which is released by the LocalBox below.
            win32(unsafe {
                GetNamedSecurityInfoW(
                    name.as_mut_ptr(),
                    SE_FILE_OBJECT,
                    DACL_SECURITY_INFORMATION,
                    ptr::null_mut(),
                    ptr::null_mut(),
                    &mut old_dacl,
                    ptr::null_mut(),
                    &mut descriptor,
                )
            })?;
            let _descriptor = LocalBox(descriptor);

            let mut new_dacl: *mut ACL = ptr::null_mut();
            // SAFETY: explicit outlives the call; new_dacl is LocalAlloc'd.
            win32(unsafe {
                SetEntriesInAclW(
                    explicit.len() as u32,
                    explicit.as_ptr(),
                    old_dacl,
                    &mut new_dacl,
                )
            })?;
            let _new_dacl = LocalBox(new_dacl as *mut c_void);

            // SAFETY: name is NUL terminated and new_dacl is a valid ACL.
            win32(unsafe {
                SetNamedSecurityInfoW(
                    name.as_mut_ptr(),
                    SE_FILE_OBJECT,
                    DACL_SECURITY_INFORMATION,
                    ptr::null_mut(),
                    ptr::null_mut(),
                    new_dacl,
                    ptr::null(),
                )
            })
        }
    }
}

#[cfg(not(windows))]
mod imp {
    use std::io;
    use std::path::Path;

    use crate::security::{AccessEntry, DaclStore};

    /// Placeholder: security descriptors are a Windows concept.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SystemDacls;

    impl DaclStore for SystemDacls {
        fn merge_entries(&self, _path: &Path, _entries: &[AccessEntry]) -> io::Result<()> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "security descriptor updates require Windows",
            ))
        }
    }
}

pub use imp::SystemDacls;

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;
    use crate::security::DaclStore;

    #[test]
    fn stub_rejects_updates() {
        let err = SystemDacls
            .merge_entries(std::path::Path::new("/tmp"), &[])
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
    }
}
