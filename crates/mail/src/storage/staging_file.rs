//! File-based staging with zstd compression

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use log::debug;
use uuid::Uuid;

use super::StagingStore;
use crate::error::{MailError, MailResult};
use crate::models::MessageId;

/// Local staging directory, one compressed file per message
///
/// Directory structure:
/// ```text
/// staging/
///   PGFiY0BleGFtcGxlLmNvbT4-3f2a...e1.eml.zst    # <abc@example.com>
///   PGFiY0BleGFtcGxlLmNvbT4-9c07...4b.eml.zst    # resubmitted
///   PGRlZkBleGFtcGxlLmNvbT4-51d8...a0.eml.zst
/// ```
///
/// The stage reference is the file stem: the `Message-ID` in URL-safe
/// base64 plus a random suffix. Every `stage` call gets its own file, so a
/// resubmitted message never replaces a copy that is still undelivered.
pub struct FileStagingStore {
    root: PathBuf,
    compression_level: i32,
}

impl FileStagingStore {
    /// Create a staging store at the given directory
    pub fn new(root: impl AsRef<Path>) -> MailResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            MailError::Staging(format!("cannot create staging directory {:?}: {}", root, e))
        })?;
        Ok(Self {
            root,
            compression_level: 3,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stage references currently on disk
    pub fn list(&self) -> MailResult<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| io_error("list", &self.root, e))?;
        let mut refs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error("list", &self.root, e))?;
            if let Some(name) = entry.file_name().to_str()
                && let Some(stem) = name.strip_suffix(".eml.zst")
            {
                refs.push(stem.to_string());
            }
        }
        refs.sort();
        Ok(refs)
    }

    fn key(message_id: &MessageId) -> String {
        format!(
            "{}-{}",
            URL_SAFE_NO_PAD.encode(message_id.as_str()),
            Uuid::new_v4().simple()
        )
    }

    /// Path for a stage reference, rejecting anything that is not a key
    fn staged_path(&self, stage_ref: &str) -> MailResult<PathBuf> {
        let valid = !stage_ref.is_empty()
            && stage_ref
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(MailError::Staging(format!(
                "invalid stage reference {:?}",
                stage_ref
            )));
        }
        Ok(self.root.join(format!("{}.eml.zst", stage_ref)))
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> MailError {
    MailError::Staging(format!("{} {:?}: {}", action, path, err))
}

impl StagingStore for FileStagingStore {
    fn stage(&self, message_id: &MessageId, raw: &[u8]) -> MailResult<String> {
        let key = Self::key(message_id);
        let path = self.staged_path(&key)?;

        let compressed = zstd::encode_all(raw, self.compression_level)
            .map_err(|e| MailError::Staging(format!("compress {}: {}", message_id, e)))?;

        // Write atomically (write to temp, sync, then rename)
        let temp_path = path.with_extension("tmp");
        let mut file = File::create(&temp_path).map_err(|e| io_error("create", &temp_path, e))?;
        file.write_all(&compressed)
            .and_then(|()| file.sync_all())
            .map_err(|e| io_error("write", &temp_path, e))?;
        fs::rename(&temp_path, &path).map_err(|e| io_error("rename", &path, e))?;

        debug!("Staged {} at {:?}", message_id, path);
        Ok(key)
    }

    fn load(&self, stage_ref: &str) -> MailResult<Option<Vec<u8>>> {
        let path = self.staged_path(stage_ref)?;
        if !path.exists() {
            return Ok(None);
        }

        let compressed = fs::read(&path).map_err(|e| io_error("read", &path, e))?;
        let mut decoder = zstd::Decoder::new(compressed.as_slice())
            .map_err(|e| io_error("decompress", &path, e))?;
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| io_error("decompress", &path, e))?;

        Ok(Some(decompressed))
    }

    fn remove(&self, stage_ref: &str) -> MailResult<()> {
        let path = self.staged_path(stage_ref)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", &path, e)),
        }
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const RAW: &[u8] = b"Message-ID: <m1@example.com>\r\nSubject: hi\r\n\r\nbody\r\n";

    #[test]
    fn test_stage_and_load() {
        let dir = tempdir().unwrap();
        let store = FileStagingStore::new(dir.path().join("staging")).unwrap();

        let stage_ref = store.stage(&MessageId::new("<m1@example.com>"), RAW).unwrap();
        assert_eq!(store.load(&stage_ref).unwrap().unwrap(), RAW);
        assert_eq!(store.list().unwrap(), vec![stage_ref]);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let store = FileStagingStore::new(dir.path()).unwrap();
        store.stage(&MessageId::new("<m1@example.com>"), RAW).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".eml.zst"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileStagingStore::new(dir.path()).unwrap();
        let stage_ref = store.stage(&MessageId::new("<m1@example.com>"), RAW).unwrap();

        store.remove(&stage_ref).unwrap();
        assert!(store.load(&stage_ref).unwrap().is_none());
        store.remove(&stage_ref).unwrap();
    }

    #[test]
    fn test_restage_keeps_both_copies() {
        let dir = tempdir().unwrap();
        let store = FileStagingStore::new(dir.path()).unwrap();
        let id = MessageId::new("<m1@example.com>");

        let first = store.stage(&id, b"one").unwrap();
        let second = store.stage(&id, b"two").unwrap();
        assert_ne!(first, second);

        store.remove(&second).unwrap();
        assert_eq!(store.load(&first).unwrap().unwrap(), b"one");
        assert_eq!(store.list().unwrap(), vec![first]);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = FileStagingStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.load("../etc/passwd"),
            Err(MailError::Staging(_))
        ));
    }

    #[test]
    fn test_unwritable_root_is_staging_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        assert!(matches!(
            FileStagingStore::new(blocker.join("staging")),
            Err(MailError::Staging(_))
        ));
    }
}
