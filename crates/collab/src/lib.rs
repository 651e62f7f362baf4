//! External collaborator traits (§6.1): the narrow interfaces the core
//! subsystems depend on for GUI-shaped or platform-shaped concerns they
//! don't own — file classification, image decoding, fail icons, and widget
//! visibility — plus a `CollaboratorHost` used to wire additional async
//! event sources into the main loop, mirroring the teacher's plugin-host
//! seam.

use events::AsyncEventSource;
use std::path::{Path, PathBuf};
use vimiv_core::ModeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Image,
    Directory,
    Other,
}

/// Classifies a filesystem entry for the working-directory monitor (§4.6
/// step 5). The default implementation is an extension allow-list plus
/// `Path::is_dir`; GUI layers may substitute a richer classifier (magic
/// bytes, mime sniffing) without the monitor caring.
pub trait FileClassifier: Send + Sync {
    fn classify(&self, path: &Path) -> EntryKind;
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "svg", "tiff", "webp",
];

#[derive(Default)]
pub struct DefaultFileClassifier;

impl FileClassifier for DefaultFileClassifier {
    fn classify(&self, path: &Path) -> EntryKind {
        if path.is_dir() {
            return EntryKind::Directory;
        }
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.iter().any(|ext| ext.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if is_image {
            EntryKind::Image
        } else {
            EntryKind::Other
        }
    }
}

pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Decodes source images for the thumbnail cache (§4.7.1). Injected so the
/// cache stays testable without a real decoder and so a GUI layer can
/// substitute its own format support.
pub trait ImageReader: Send + Sync {
    fn dimensions(&self, path: &Path) -> anyhow::Result<(u32, u32)>;
    fn decode_scaled(&self, path: &Path, max_side: u32) -> anyhow::Result<RgbaImage>;
}

#[derive(Default)]
pub struct DefaultImageReader;

impl ImageReader for DefaultImageReader {
    fn dimensions(&self, path: &Path) -> anyhow::Result<(u32, u32)> {
        let dim = ::image::image_dimensions(path)?;
        Ok(dim)
    }

    fn decode_scaled(&self, path: &Path, max_side: u32) -> anyhow::Result<RgbaImage> {
        use ::image::ImageDecoder;
        let mut decoder = ::image::ImageReader::open(path)?
            .with_guessed_format()?
            .into_decoder()?;
        let orientation = decoder.orientation().unwrap_or(::image::metadata::Orientation::NoTransforms);
        let mut img = ::image::DynamicImage::from_decoder(decoder)?;
        img.apply_orientation(orientation);
        let scaled = img.resize(max_side, max_side, ::image::imageops::FilterType::Lanczos3);
        let rgba = scaled.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(RgbaImage {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}

/// Supplies the fail-placeholder icon path for §4.7 step 4.
pub trait IconProvider: Send + Sync {
    fn fail_icon(&self) -> PathBuf;
}

pub struct StaticIconProvider(pub PathBuf);

impl IconProvider for StaticIconProvider {
    fn fail_icon(&self) -> PathBuf {
        self.0.clone()
    }
}

/// Supplies widget visibility for `ModeRegistry::toggle` (§4.1). The core
/// never inspects GUI state itself; this is the injected predicate.
pub trait VisibilityPredicate: Send + Sync {
    fn is_visible(&self, mode: ModeId) -> bool;
}

/// Headless default: nothing is ever visible, so `toggle` behaves like
/// `enter`. This is a documented headless default, not a guess at GUI
/// intent.
#[derive(Default)]
pub struct AlwaysHiddenVisibility;

impl VisibilityPredicate for AlwaysHiddenVisibility {
    fn is_visible(&self, _mode: ModeId) -> bool {
        false
    }
}

/// A collection-oriented host that can contribute additional async event
/// sources to the main loop (LSP-equivalent future extensions, external
/// watchers, etc). Implementors must be idempotent: repeated
/// `event_sources()` calls after the first drain return an empty `Vec`.
pub trait CollaboratorHost: Send + Sync {
    fn name(&self) -> &'static str;
    fn load_all(&mut self) -> anyhow::Result<()>;
    fn event_sources(&mut self) -> Vec<Box<dyn AsyncEventSource>>;
}

impl<T: CollaboratorHost + ?Sized> CollaboratorHost for &mut T {
    fn name(&self) -> &'static str {
        (**self).name()
    }
    fn load_all(&mut self) -> anyhow::Result<()> {
        (**self).load_all()
    }
    fn event_sources(&mut self) -> Vec<Box<dyn AsyncEventSource>> {
        (**self).event_sources()
    }
}

#[derive(Default)]
pub struct NoopCollaboratorHost {
    drained: bool,
}

impl NoopCollaboratorHost {
    pub fn new() -> Self {
        Self { drained: false }
    }
}

impl CollaboratorHost for NoopCollaboratorHost {
    fn name(&self) -> &'static str {
        "noop-collaborator-host"
    }
    fn load_all(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    fn event_sources(&mut self) -> Vec<Box<dyn AsyncEventSource>> {
        if self.drained {
            return Vec::new();
        }
        self.drained = true;
        Vec::new()
    }
}
