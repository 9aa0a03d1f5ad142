//! Page-file naming and raw disk plumbing.

use super::PagingError;
use crate::util::sanitize_session_id;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Directory under the configured page root that holds every page file.
pub const PAGE_DIR_NAME: &str = "queueCache";

/// Naming and raw file operations for session page files.
///
/// Every path is `{page_dir}/queueCache/{sanitized session id}`; the
/// sanitized name cannot escape the cache directory (see
/// [`sanitize_session_id`]).
#[derive(Debug, Clone)]
pub struct PageStore {
    root: PathBuf,
}

impl PageStore {
    /// Store rooted at `page_dir`; page files land in `page_dir/queueCache/`.
    pub fn new(page_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: page_dir.into().join(PAGE_DIR_NAME),
        }
    }

    /// The `queueCache` directory itself.
    pub fn cache_dir(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the page file for `session_id`. Touches no disk.
    pub fn page_file_path(&self, session_id: &str) -> PathBuf {
        self.root.join(sanitize_session_id(session_id))
    }

    /// Ensure the page file exists, creating directories as needed, and
    /// return it opened for appending.
    pub fn ensure_page_file(&self, session_id: &str) -> Result<File, PagingError> {
        self.open_for_drain(session_id, true)
    }

    /// Open the page file for a drain: append when the session already has
    /// paged bytes, truncate otherwise. A file found on a non-appending open
    /// is a leftover from a previous run and holds bytes nobody tracks.
    pub fn open_for_drain(&self, session_id: &str, append: bool) -> Result<File, PagingError> {
        fs::create_dir_all(&self.root)
            .map_err(|source| PagingError::io("creating page directory", &self.root, source))?;

        let path = self.page_file_path(session_id);
        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        options
            .open(&path)
            .map_err(|source| PagingError::io("opening page file", path, source))
    }

    /// Open an existing page file for reading. `Ok(None)` when the file is
    /// absent; any other failure is an error.
    pub fn open_existing(&self, session_id: &str) -> Result<Option<File>, PagingError> {
        let path = self.page_file_path(session_id);
        match File::open(&path) {
            Ok(file) => Ok(Some(file)),
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PagingError::io("opening page file", path, source)),
        }
    }

    /// Append every byte from `reader` to the page file, creating it if
    /// needed. Returns the number of bytes appended.
    pub fn append_raw(&self, session_id: &str, reader: &mut dyn Read) -> Result<u64, PagingError> {
        let mut file = self.ensure_page_file(session_id)?;
        io::copy(reader, &mut file).map_err(|source| {
            PagingError::io(
                "appending to page file",
                self.page_file_path(session_id),
                source,
            )
        })
    }

    /// Delete the page file if present. Returns whether a file was removed.
    pub fn delete_if_exists(&self, session_id: &str) -> Result<bool, PagingError> {
        let path = self.page_file_path(session_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(PagingError::io("deleting page file", path, source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn page_file_path_sanitizes_and_stays_inside_cache_dir() {
        let store = PageStore::new("/tmp/pages");
        assert_eq!(
            store.page_file_path("abc-123"),
            PathBuf::from("/tmp/pages/queueCache/abc_123")
        );
        assert_eq!(
            store.page_file_path("../../etc/passwd"),
            PathBuf::from("/tmp/pages/queueCache/______etc_passwd")
        );
    }

    #[test]
    fn ensure_creates_directories_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PageStore::new(tmp.path());

        let file = store.ensure_page_file("fresh-session").unwrap();
        drop(file);
        assert!(store.page_file_path("fresh-session").is_file());
        assert!(tmp.path().join(PAGE_DIR_NAME).is_dir());

        // Second call is a no-op open, not a truncate.
        let mut file = store.ensure_page_file("fresh-session").unwrap();
        file.write_all(b"abc").unwrap();
        drop(file);
        store.ensure_page_file("fresh-session").unwrap();
        let kept = fs::read(store.page_file_path("fresh-session")).unwrap();
        assert_eq!(kept, b"abc");
    }

    #[test]
    fn non_appending_drain_truncates_stale_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PageStore::new(tmp.path());

        let mut file = store.open_for_drain("stale", true).unwrap();
        file.write_all(b"old contents").unwrap();
        drop(file);

        let file = store.open_for_drain("stale", false).unwrap();
        drop(file);
        let remaining = fs::read(store.page_file_path("stale")).unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn appending_drain_extends_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PageStore::new(tmp.path());

        let mut file = store.open_for_drain("grow", false).unwrap();
        file.write_all(b"first").unwrap();
        drop(file);
        let mut file = store.open_for_drain("grow", true).unwrap();
        file.write_all(b"|second").unwrap();
        drop(file);

        let contents = fs::read(store.page_file_path("grow")).unwrap();
        assert_eq!(contents, b"first|second");
    }

    #[test]
    fn open_existing_distinguishes_missing_from_present() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PageStore::new(tmp.path());

        assert!(store.open_existing("nobody").unwrap().is_none());

        store.ensure_page_file("somebody").unwrap();
        assert!(store.open_existing("somebody").unwrap().is_some());
    }

    #[test]
    fn append_raw_reports_byte_count() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PageStore::new(tmp.path());

        let appended = store
            .append_raw("counted", &mut io::Cursor::new(b"12345".to_vec()))
            .unwrap();
        assert_eq!(appended, 5);
        let appended = store
            .append_raw("counted", &mut io::Cursor::new(b"678".to_vec()))
            .unwrap();
        assert_eq!(appended, 3);

        let contents = fs::read(store.page_file_path("counted")).unwrap();
        assert_eq!(contents, b"12345678");
    }

    #[test]
    fn delete_if_exists_reports_whether_file_was_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PageStore::new(tmp.path());

        assert!(!store.delete_if_exists("ghost").unwrap());
        store.ensure_page_file("real").unwrap();
        assert!(store.delete_if_exists("real").unwrap());
        assert!(!store.page_file_path("real").exists());
    }
}
