//! Freedesktop trash manager (§4.8): `delete`/`undelete`/`trash_info`
//! backed by `.trashinfo` INI sidecars under `<XDG_DATA_HOME>/Trash`.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use chrono::Local;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tracing::{debug, warn};

/// Matches the set `urllib.parse.quote` escapes by default (everything but
/// the "always safe" RFC 3986 unreserved set).
const TRASH_PATH_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashInfo {
    pub original_path: PathBuf,
    pub deletion_date: String,
}

/// Owns the `files/` and `info/` directories and a monotonic cache of
/// parsed `.trashinfo` sidecars keyed by trash basename.
pub struct TrashManager {
    files_dir: PathBuf,
    info_dir: PathBuf,
    info_cache: Mutex<HashMap<String, TrashInfo>>,
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl TrashManager {
    pub fn new(data_root: &Path) -> Result<Self> {
        let base = data_root.join("Trash");
        let files_dir = base.join("files");
        let info_dir = base.join("info");
        fs::create_dir_all(&files_dir).context("creating trash files directory")?;
        fs::create_dir_all(&info_dir).context("creating trash info directory")?;
        Ok(Self {
            files_dir,
            info_dir,
            info_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn files_directory(&self) -> &Path {
        &self.files_dir
    }

    /// Moves `src` into the trash, writing its sidecar first. Returns the
    /// path the file now lives at inside `files/`.
    pub fn delete(&self, src: &Path) -> Result<PathBuf> {
        let src = fs::canonicalize(src).with_context(|| format!("resolving {}", src.display()))?;
        let trash_path = self.trash_filename(&src);
        let basename = trash_path
            .file_name()
            .and_then(|n| n.to_str())
            .context("trash filename is not valid UTF-8")?
            .to_string();

        self.write_info_file(&basename, &src)?;
        fs::rename(&src, &trash_path)
            .or_else(|_| copy_then_remove(&src, &trash_path))
            .with_context(|| format!("moving {} into trash", src.display()))?;
        self.info_cache.lock().unwrap().remove(&basename);
        debug!(src = %src.display(), trash = %trash_path.display(), "moved file to trash");
        Ok(trash_path)
    }

    /// Restores `basename` from the trash to its original location.
    pub fn undelete(&self, basename: &str) -> Result<PathBuf> {
        let trash_path = self.files_dir.join(basename);
        let info_path = self.info_filename(basename);
        if !trash_path.exists() || !info_path.exists() {
            bail!("file for '{basename}' does not exist in trash");
        }
        let info = self.trash_info(basename)?;
        let original_dir = info
            .original_path
            .parent()
            .context("original path has no parent directory")?;
        if !original_dir.is_dir() {
            bail!(
                "original directory of '{basename}' is not accessible: {}",
                original_dir.display()
            );
        }
        fs::rename(&trash_path, &info.original_path)
            .or_else(|_| copy_then_remove(&trash_path, &info.original_path))
            .with_context(|| format!("restoring {basename} to {}", info.original_path.display()))?;
        fs::remove_file(&info_path).ok();
        self.info_cache.lock().unwrap().remove(basename);
        Ok(info.original_path)
    }

    /// Reads (and caches) the sidecar for `basename`. Invalidated by
    /// `delete`/`undelete` touching the same basename.
    pub fn trash_info(&self, basename: &str) -> Result<TrashInfo> {
        if let Some(cached) = self.info_cache.lock().unwrap().get(basename) {
            return Ok(cached.clone());
        }
        let info_path = self.info_filename(basename);
        let content = fs::read_to_string(&info_path)
            .with_context(|| format!("reading {}", info_path.display()))?;
        let ini = ini::Ini::load_from_str(&content)
            .with_context(|| format!("parsing {}", info_path.display()))?;
        let section = ini
            .section(Some("Trash Info"))
            .context("missing [Trash Info] section")?;
        let encoded_path = section.get("Path").context("missing Path key")?;
        let deletion_date = section
            .get("DeletionDate")
            .context("missing DeletionDate key")?
            .to_string();
        let original_path = PathBuf::from(
            percent_decode_str(encoded_path)
                .decode_utf8()
                .context("Path value is not valid percent-encoded UTF-8")?
                .into_owned(),
        );
        let info = TrashInfo { original_path, deletion_date };
        self.info_cache
            .lock()
            .unwrap()
            .insert(basename.to_string(), info.clone());
        Ok(info)
    }

    fn trash_filename(&self, src: &Path) -> PathBuf {
        let base_name = src.file_name().unwrap_or_default();
        let mut candidate = self.files_dir.join(base_name);
        let mut extension = 2u32;
        while candidate.exists() {
            candidate = self
                .files_dir
                .join(format!("{}.{extension}", base_name.to_string_lossy()));
            extension += 1;
        }
        candidate
    }

    fn info_filename(&self, basename: &str) -> PathBuf {
        self.info_dir.join(format!("{basename}.trashinfo"))
    }

    fn write_info_file(&self, trash_basename: &str, original: &Path) -> Result<()> {
        let encoded_path = utf8_percent_encode(&original.to_string_lossy(), TRASH_PATH_ENCODE).to_string();
        let deletion_date = local_timestamp();
        let contents = format!(
            "[Trash Info]\nPath={encoded_path}\nDeletionDate={deletion_date}\n"
        );

        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self
            .info_dir
            .join(format!(".{trash_basename}.{}.{n}.tmp", std::process::id()));
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(contents.as_bytes())?;
        }
        let info_path = self.info_filename(trash_basename);
        fs::rename(&tmp_path, &info_path).with_context(|| format!("writing {}", info_path.display()))?;
        Ok(())
    }
}

fn copy_then_remove(src: &Path, dst: &Path) -> std::io::Result<()> {
    warn!(src = %src.display(), dst = %dst.display(), "cross-filesystem move, falling back to copy+unlink");
    fs::copy(src, dst)?;
    fs::remove_file(src)
}

/// `YYYY-mm-ddTHH:MM:SS` in local time, freedesktop `DeletionDate` format.
fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn manager() -> (tempfile::TempDir, TrashManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TrashManager::new(dir.path()).unwrap();
        (dir, mgr)
    }

    #[test]
    fn delete_then_undelete_round_trips() {
        let (data_dir, mgr) = manager();
        let source_dir = tempfile::tempdir().unwrap();
        let src = source_dir.path().join("photo.png");
        fs::write(&src, b"pixels").unwrap();

        let trashed = mgr.delete(&src).unwrap();
        assert!(trashed.exists());
        assert!(!src.exists());

        let basename = trashed.file_name().unwrap().to_str().unwrap();
        let restored = mgr.undelete(basename).unwrap();
        assert_eq!(restored, fs::canonicalize(source_dir.path()).unwrap().join("photo.png"));
        assert!(restored.exists());
        drop(data_dir);
    }

    #[test]
    fn delete_collision_appends_numeric_suffix() {
        let (_data_dir, mgr) = manager();
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let a = dir_a.path().join("dup.png");
        let b = dir_b.path().join("dup.png");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let trashed_a = mgr.delete(&a).unwrap();
        let trashed_b = mgr.delete(&b).unwrap();

        assert_ne!(trashed_a, trashed_b);
        assert!(trashed_b.to_string_lossy().ends_with(".2"));
    }

    #[test]
    fn trash_info_round_trips_path_with_spaces() {
        let (_data_dir, mgr) = manager();
        let source_dir = tempfile::tempdir().unwrap();
        let src = source_dir.path().join("my photo.png");
        fs::write(&src, b"x").unwrap();

        let trashed = mgr.delete(&src).unwrap();
        let basename = trashed.file_name().unwrap().to_str().unwrap();
        let info = mgr.trash_info(basename).unwrap();
        assert_eq!(info.original_path, fs::canonicalize(source_dir.path()).unwrap().join("my photo.png"));
    }

    #[test]
    fn undelete_missing_basename_errors() {
        let (_data_dir, mgr) = manager();
        assert!(mgr.undelete("nonexistent.png").is_err());
    }

    #[test]
    fn local_timestamp_matches_deletion_date_format() {
        let ts = local_timestamp();
        assert_eq!(ts.len(), "2023-12-25T10:11:12".len());
        assert_eq!(ts.as_bytes()[4], b'-');
        assert_eq!(ts.as_bytes()[10], b'T');
    }
}
