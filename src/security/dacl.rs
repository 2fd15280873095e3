//! The DACL update primitive the grant engine submits through.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::AccessEntry;

/// Applies allow entries to an object's DACL.
///
/// Implementations must submit all `entries` as one descriptor update and
/// merge them the way `SetEntriesInAcl` does with `GRANT_ACCESS`: an entry for
/// a principal that already has an allow entry with identical inheritance
/// flags widens that entry instead of adding another. Entries for other
/// principals are left untouched and in place.
pub trait DaclStore: Send + Sync {
    fn merge_entries(&self, path: &Path, entries: &[AccessEntry]) -> io::Result<()>;
}

/// Merge `entries` into `dacl` in place.
pub fn merge_entries(dacl: &mut Vec<AccessEntry>, entries: &[AccessEntry]) {
    for entry in entries {
        match dacl
            .iter_mut()
            .find(|e| e.sid == entry.sid && e.inheritance == entry.inheritance)
        {
            Some(existing) => existing.access |= entry.access,
            None => dacl.push(entry.clone()),
        }
    }
}

/// In-memory [`DaclStore`], keyed by path.
#[derive(Debug, Default)]
pub struct MemoryDacls {
    dacls: Mutex<HashMap<PathBuf, Vec<AccessEntry>>>,
    fail_with: Mutex<Option<io::ErrorKind>>,
}

impl MemoryDacls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the DACL of `path`.
    pub fn set(&self, path: impl Into<PathBuf>, entries: Vec<AccessEntry>) {
        self.lock().insert(path.into(), entries);
    }

    /// Current entries on `path`, in order.
    pub fn entries(&self, path: &Path) -> Vec<AccessEntry> {
        self.lock().get(path).cloned().unwrap_or_default()
    }

    /// Entries on `path` that belong to `sid`.
    pub fn entries_for(&self, path: &Path, sid: &str) -> Vec<AccessEntry> {
        self.entries(path)
            .into_iter()
            .filter(|e| e.sid == sid)
            .collect()
    }

    /// Make every following update fail with `kind` (`None` to clear).
    pub fn fail_updates(&self, kind: Option<io::ErrorKind>) {
        *self
            .fail_with
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = kind;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Vec<AccessEntry>>> {
        self.dacls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DaclStore for MemoryDacls {
    fn merge_entries(&self, path: &Path, entries: &[AccessEntry]) -> io::Result<()> {
        if let Some(kind) = *self
            .fail_with
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
        {
            return Err(io::Error::new(kind, "security descriptor update rejected"));
        }

        let mut dacls = self.lock();
        let dacl = dacls.entry(path.to_path_buf()).or_default();
        merge_entries(dacl, entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Inheritance;

    fn entry(sid: &str, access: u32, inheritance: Inheritance) -> AccessEntry {
        AccessEntry {
            sid: sid.to_string(),
            access,
            inheritance,
        }
    }

    #[test]
    fn merge_widens_matching_entry() {
        let mut dacl = vec![entry("S-1-5-83-0", 0x1, Inheritance::empty())];
        merge_entries(&mut dacl, &[entry("S-1-5-83-0", 0x2, Inheritance::empty())]);
        assert_eq!(dacl, vec![entry("S-1-5-83-0", 0x3, Inheritance::empty())]);
    }

    #[test]
    fn merge_appends_when_inheritance_differs() {
        let mut dacl = vec![entry("S-1-5-83-0", 0x1, Inheritance::empty())];
        merge_entries(
            &mut dacl,
            &[entry("S-1-5-83-0", 0x1, Inheritance::CHILDREN_ONLY)],
        );
        assert_eq!(dacl.len(), 2);
    }

    #[test]
    fn merge_keeps_other_principals_in_order() {
        let mut dacl = vec![
            entry("S-1-5-18", 0x1F01FF, Inheritance::empty()),
            entry("S-1-5-32-544", 0x1F01FF, Inheritance::empty()),
        ];
        let before = dacl.clone();
        merge_entries(&mut dacl, &[entry("S-1-5-83-0", 0x1, Inheritance::empty())]);
        assert_eq!(&dacl[..2], &before[..]);
        assert_eq!(dacl[2].sid, "S-1-5-83-0");
    }

    #[test]
    fn failing_store_leaves_dacl_untouched() {
        let store = MemoryDacls::new();
        let path = Path::new("/scratch");
        store.set(path, vec![entry("S-1-5-18", 0x1, Inheritance::empty())]);
        store.fail_updates(Some(io::ErrorKind::PermissionDenied));

        let err = store
            .merge_entries(path, &[entry("S-1-5-83-0", 0x1, Inheritance::empty())])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(store.entries(path).len(), 1);
    }
}
