//! Per-path thumbnail create/reuse algorithm, mirroring
//! `ThumbnailCreator.run` and its mtime-check reuse path.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use collab::ImageReader;
use tracing::warn;

const KEY_URI: &str = "Thumb::URI";
const KEY_MTIME: &str = "Thumb::MTime";
const KEY_SIZE: &str = "Thumb::Size";
const KEY_WIDTH: &str = "Thumb::Image::Width";
const KEY_HEIGHT: &str = "Thumb::Image::Height";
const KEY_SOFTWARE: &str = "Software";
const SOFTWARE_TAG: &str = concat!("vimiv-", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Normal,
    Large,
}

impl Size {
    fn max_side(self) -> u32 {
        match self {
            Size::Normal => 128,
            Size::Large => 256,
        }
    }

    fn dirname(self) -> &'static str {
        match self {
            Size::Normal => "normal",
            Size::Large => "large",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailOutcome {
    /// An up-to-date cache entry already existed, or was freshly written.
    Ready(PathBuf),
    /// The source couldn't be read; `icon_path` is the fail placeholder.
    Failed { icon_path: PathBuf },
}

/// Owns the on-disk cache directories for one thumbnail size and knows how
/// to create or reuse an entry for a single source path. Cheap to clone
/// (everything behind `Arc`) so worker tasks can each hold their own handle.
#[derive(Clone)]
pub struct ThumbnailCache {
    size: Size,
    directory: PathBuf,
    fail_directory: PathBuf,
    image_reader: Arc<dyn ImageReader>,
    fail_icon: PathBuf,
}

impl ThumbnailCache {
    pub fn new(
        cache_root: &Path,
        size: Size,
        image_reader: Arc<dyn ImageReader>,
        fail_icon: PathBuf,
    ) -> io::Result<Self> {
        let base = cache_root.join("thumbnails");
        let directory = base.join(size.dirname());
        let fail_directory = base.join("fail").join(SOFTWARE_TAG);
        fs::create_dir_all(&directory)?;
        fs::create_dir_all(&fail_directory)?;
        Ok(Self {
            size,
            directory,
            fail_directory,
            image_reader,
            fail_icon,
        })
    }

    /// Blocking; run via `spawn_blocking` from async callers. Creates or
    /// reuses the thumbnail for `path` per the four-step algorithm (§4.7).
    pub fn create_one(&self, path: &Path) -> ThumbnailOutcome {
        match self.try_create_one(path) {
            Ok(thumb_path) => ThumbnailOutcome::Ready(thumb_path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "thumbnail generation failed");
                self.record_fail(path);
                ThumbnailOutcome::Failed {
                    icon_path: self.fail_icon.clone(),
                }
            }
        }
    }

    fn try_create_one(&self, path: &Path) -> io::Result<PathBuf> {
        let uri = source_uri(path)?;
        let filename = thumbnail_filename(&uri);
        let target = self.directory.join(&filename);
        let source_mtime = mtime_seconds(path)?;

        if target.exists() {
            if read_text_chunk(&target, KEY_MTIME)?.as_deref() == Some(source_mtime.to_string().as_str())
            {
                return Ok(target);
            }
        } else if let Some(marked_mtime) = read_text_chunk(&self.fail_directory.join(&filename), KEY_MTIME)?
        {
            if marked_mtime == source_mtime.to_string() {
                return Err(io::Error::new(io::ErrorKind::Other, "source previously failed, mtime unchanged"));
            }
        }

        let rgba = self
            .image_reader
            .decode_scaled(path, self.size.max_side())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let file_size = fs::metadata(path)?.len();
        let attrs = [
            (KEY_URI, uri),
            (KEY_MTIME, source_mtime.to_string()),
            (KEY_SIZE, file_size.to_string()),
            (KEY_WIDTH, rgba.width.to_string()),
            (KEY_HEIGHT, rgba.height.to_string()),
            (KEY_SOFTWARE, SOFTWARE_TAG.to_string()),
        ];
        write_png_atomic(&self.directory, &filename, rgba.width, rgba.height, &rgba.pixels, &attrs)?;
        let _ = fs::remove_file(self.fail_directory.join(&filename));
        Ok(target)
    }

    fn record_fail(&self, path: &Path) {
        let Ok(uri) = source_uri(path) else { return };
        let filename = thumbnail_filename(&uri);
        let Ok(mtime) = mtime_seconds(path) else { return };
        let attrs = [(KEY_URI, uri), (KEY_MTIME, mtime.to_string())];
        if let Err(e) = write_png_atomic(&self.fail_directory, &filename, 1, 1, &[0, 0, 0, 0], &attrs) {
            warn!(path = %path.display(), error = %e, "failed to record thumbnail fail marker");
        }
    }
}

fn source_uri(path: &Path) -> io::Result<String> {
    let absolute = fs::canonicalize(path)?;
    Ok(format!("file://{}", absolute.display()))
}

fn thumbnail_filename(uri: &str) -> String {
    use md5::{Digest, Md5};
    let digest = Md5::digest(uri.as_bytes());
    format!("{:x}.png", digest)
}

fn mtime_seconds(path: &Path) -> io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs())
}

fn read_text_chunk(png_path: &Path, key: &str) -> io::Result<Option<String>> {
    let file = match File::open(png_path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let decoder = png::Decoder::new(file);
    let reader = match decoder.read_info() {
        Ok(r) => r,
        Err(_) => return Ok(None),
    };
    let info = reader.info();
    Ok(info
        .uncompressed_latin1_text
        .iter()
        .find(|chunk| chunk.keyword == key)
        .map(|chunk| chunk.text.clone()))
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn write_png_atomic(
    directory: &Path,
    filename: &str,
    width: u32,
    height: u32,
    pixels: &[u8],
    attrs: &[(&str, String)],
) -> io::Result<()> {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_path = directory.join(format!(".{filename}.{}.{n}.tmp", std::process::id()));
    {
        let file = File::create(&tmp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        for (key, value) in attrs {
            encoder
                .add_text_chunk((*key).to_string(), value.clone())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }
        let mut writer = encoder
            .write_header()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writer
            .write_image_data(pixels)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    }
    fs::rename(&tmp_path, directory.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab::RgbaImage;
    use std::sync::Mutex;

    struct FixedImageReader {
        width: u32,
        height: u32,
        fail: bool,
    }

    impl ImageReader for FixedImageReader {
        fn dimensions(&self, _path: &Path) -> anyhow::Result<(u32, u32)> {
            Ok((self.width, self.height))
        }

        fn decode_scaled(&self, _path: &Path, _max_side: u32) -> anyhow::Result<RgbaImage> {
            if self.fail {
                anyhow::bail!("simulated decode failure");
            }
            Ok(RgbaImage {
                width: self.width,
                height: self.height,
                pixels: vec![0u8; (self.width * self.height * 4) as usize],
            })
        }
    }

    fn write_source(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"not a real image, reader is stubbed").unwrap();
        path
    }

    #[test]
    fn creates_and_reuses_thumbnail() {
        let cache_root = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let source = write_source(source_dir.path(), "pic.jpg");
        let reader = Arc::new(FixedImageReader { width: 40, height: 20, fail: false });
        let cache = ThumbnailCache::new(
            cache_root.path(),
            Size::Normal,
            reader,
            PathBuf::from("/usr/share/icons/fail.png"),
        )
        .unwrap();

        let first = cache.create_one(&source);
        let ThumbnailOutcome::Ready(path) = first.clone() else {
            panic!("expected Ready, got {first:?}")
        };
        assert!(path.exists());

        // Second call with unchanged mtime should hit the reuse branch and
        // return the same path without erroring.
        let second = cache.create_one(&source);
        assert_eq!(second, first);
    }

    #[test]
    fn unreadable_source_reports_fail_icon() {
        let cache_root = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let source = write_source(source_dir.path(), "broken.jpg");
        let reader = Arc::new(FixedImageReader { width: 1, height: 1, fail: true });
        let fail_icon = PathBuf::from("/usr/share/icons/fail.png");
        let cache = ThumbnailCache::new(cache_root.path(), Size::Normal, reader, fail_icon.clone()).unwrap();

        let outcome = cache.create_one(&source);
        assert_eq!(outcome, ThumbnailOutcome::Failed { icon_path: fail_icon });
    }

    #[test]
    fn size_picks_the_right_max_side() {
        assert_eq!(Size::Normal.max_side(), 128);
        assert_eq!(Size::Large.max_side(), 256);
    }

    // Guards against two threads racing `write_png_atomic` for distinct
    // filenames picking the same temp name.
    #[test]
    fn temp_filenames_are_unique_across_calls() {
        let seen = Mutex::new(std::collections::HashSet::new());
        for _ in 0..4 {
            let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
            assert!(seen.lock().unwrap().insert(n));
        }
    }
}
