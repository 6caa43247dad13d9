//! Image display orchestrator.
//!
//! Implements a three-tier lookup: Session registry -> Payload cache -> Loader

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::entities::{DisplayUnit, FetchedImage, KittyDisplayUnit, PlacedImage};
use crate::domain::errors::{DisplayError, DisplayResult};
use crate::domain::ports::FileSystem;

use super::codec::decode_image;
use super::frame_encoder::FrameEncoder;
use super::geometry::CellSize;
use super::kitty_commands::{delete_all_command, delete_command, placeholder_text, setup_command};
use super::payload_cache::PayloadCache;
use super::placement_registry::PlacementRegistry;

/// Converts display units into kitty graphics commands, caching decoded
/// payloads on disk and placements for the session.
///
/// `convert` runs decoding and disk I/O on the calling thread; call it off any
/// latency sensitive thread.
#[derive(Debug)]
pub struct DisplayManager {
    cache: PayloadCache,
    registry: Arc<PlacementRegistry>,
    cell: CellSize,
}

impl DisplayManager {
    /// Creates a manager with its own session registry.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, base_dir: impl Into<PathBuf>, cell: CellSize) -> Self {
        Self::with_registry(fs, base_dir, cell, Arc::new(PlacementRegistry::new()))
    }

    /// Creates a manager sharing an existing session registry.
    #[must_use]
    pub fn with_registry(
        fs: Arc<dyn FileSystem>,
        base_dir: impl Into<PathBuf>,
        cell: CellSize,
        registry: Arc<PlacementRegistry>,
    ) -> Self {
        Self {
            cache: PayloadCache::new(fs, base_dir),
            registry,
            cell,
        }
    }

    /// Returns the session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<PlacementRegistry> {
        &self.registry
    }

    /// Returns the persistent payload cache.
    #[must_use]
    pub fn payload_cache(&self) -> &PayloadCache {
        &self.cache
    }

    /// Returns the terminal cell size used for scaling.
    #[must_use]
    pub const fn cell_size(&self) -> CellSize {
        self.cell
    }

    /// Produces the commands and placeholder text for a display unit.
    ///
    /// Images already placed this session only get their placeholder; images
    /// found on disk are placed without calling the loader; everything else is
    /// loaded, decoded, stored and placed.
    ///
    /// # Errors
    /// Returns `LoadFailure`, `UnsupportedAnimatedFormat`, `DecodeFailure`,
    /// `CacheIoFailure` when frame payloads cannot be stored, or
    /// `PlacementIdsExhausted` once the session ran out of placement ids.
    pub fn convert(&self, unit: DisplayUnit) -> DisplayResult<KittyDisplayUnit> {
        if let Some(placed) = self.registry.lookup_and_touch(&unit.id) {
            return Ok(KittyDisplayUnit {
                setup_command: String::new(),
                replacement_text: placeholder_text(placed.placement_id, placed.image.column_span),
                persist_warning: None,
            });
        }

        match self.cache.open(&unit.directory, &unit.id) {
            Ok(Some(image)) => {
                let placed = self.registry.insert(&unit.id, image)?;
                debug!(id = %unit.id, placement_id = placed.placement_id, "Loaded image from payload cache");
                return Ok(render(&placed, None));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(id = %unit.id, error = %e, "Failed to open cached image, will reload");
            }
        }

        self.convert_fresh(unit)
    }

    fn convert_fresh(&self, unit: DisplayUnit) -> DisplayResult<KittyDisplayUnit> {
        let DisplayUnit {
            id,
            directory,
            is_animated,
            right_padding,
            loader,
        } = unit;

        let FetchedImage {
            mut body,
            content_type,
        } = loader().map_err(DisplayError::load)?;
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).map_err(DisplayError::load)?;

        info!(id = %id, content_type = %content_type, size = bytes.len(), "Loaded image");

        let encoder = FrameEncoder::new(self.cell, right_padding);
        let encoded = decode_image(&bytes, &content_type, is_animated, &encoder).inspect_err(
            |e| warn!(id = %id, content_type = %content_type, error = %e, "Failed to decode image"),
        )?;

        let image = self.cache.write_frames(&directory, &id, &encoded)?;
        let placed = self.registry.insert(&id, image)?;

        let persist_warning = self
            .cache
            .write_metadata(&directory, &id, &placed.image)
            .inspect_err(|e| warn!(id = %id, error = %e, "Failed to cache decoded image metadata"))
            .err();

        Ok(render(&placed, persist_warning))
    }

    /// Evicts placements idle for longer than `max_age` and returns the
    /// commands deleting them from the terminal. Disk entries are kept.
    #[must_use]
    pub fn cleanup_old_images_command(&self, max_age: Duration) -> String {
        self.registry
            .sweep(max_age)
            .into_iter()
            .map(delete_command)
            .collect()
    }

    /// Forgets every placement and returns the command deleting all of them
    /// from the terminal.
    #[must_use]
    pub fn cleanup_all_images_command(&self) -> String {
        self.registry.clear();
        delete_all_command()
    }
}

fn render(placed: &PlacedImage, persist_warning: Option<DisplayError>) -> KittyDisplayUnit {
    KittyDisplayUnit {
        setup_command: setup_command(placed),
        replacement_text: placeholder_text(placed.placement_id, placed.image.column_span),
        persist_warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{DecodedImage, DecodedImageFrame, ImageId};
    use crate::domain::ports::FileEntry;
    use crate::infrastructure::fs::MemoryFileSystem;
    use crate::infrastructure::image::codec::test_images;
    use crate::infrastructure::image::payload_cache::encode_payload_ref;
    use crate::infrastructure::image::placement_registry::test_clock::ManualClock;
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: &str = "/data/images";

    fn manager(fs: Arc<dyn FileSystem>) -> DisplayManager {
        DisplayManager::new(fs, BASE, CellSize::new(10.0, 20.0))
    }

    fn counting_unit(
        id: &str,
        bytes: Vec<u8>,
        content_type: &'static str,
        calls: &Arc<AtomicUsize>,
    ) -> DisplayUnit {
        let calls = calls.clone();
        DisplayUnit::new(id, "emote", move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedImage::from_bytes(bytes, content_type))
        })
    }

    fn failing_loader_unit(id: &str) -> DisplayUnit {
        DisplayUnit::new(id, "emote", || Err("loader must not be called".into()))
    }

    #[test]
    fn test_fresh_conversion() {
        let fs = Arc::new(MemoryFileSystem::new());
        let dm = manager(fs.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let result = dm
            .convert(counting_unit("fresh", test_images::png(28, 28), "image/png", &calls))
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.needs_setup());
        assert!(result.persist_warning.is_none());
        assert!(result.setup_command.starts_with("\x1b_Gf=32,i=1,t=f,q=2,s=28,v=28,o=z;"));
        assert!(result.setup_command.ends_with("\x1b_Ga=p,i=1,p=1,q=2,U=1,r=1,c=2\x1b\\"));
        assert_eq!(result.replacement_text, "\x1b[38;2;0;0;1m\u{10EEEE}\u{10EEEE}\x1b[39m");
        assert!(fs.exists(Path::new("/data/images/emote/fresh.0")));
        assert!(fs.exists(Path::new("/data/images/emote/fresh.json")));
    }

    #[test]
    fn test_session_hit_skips_setup() {
        let dm = manager(Arc::new(MemoryFileSystem::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let bytes = test_images::png(28, 28);

        let first = dm
            .convert(counting_unit("pepe", bytes.clone(), "image/png", &calls))
            .unwrap();
        let second = dm
            .convert(counting_unit("pepe", bytes, "image/png", &calls))
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(first.needs_setup());
        assert!(second.setup_command.is_empty());
        assert_eq!(first.replacement_text, second.replacement_text);
    }

    #[test]
    fn test_persistent_hit_in_new_session() {
        let fs = Arc::new(MemoryFileSystem::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let first_session = manager(fs.clone());
        first_session
            .convert(counting_unit("other", test_images::png(10, 10), "image/png", &calls))
            .unwrap();
        let original = first_session
            .convert(counting_unit("pepe", test_images::png(28, 28), "image/png", &calls))
            .unwrap();
        assert!(original.setup_command.contains("i=2,"));

        let second_session = manager(fs);
        let restored = second_session.convert(failing_loader_unit("pepe")).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(restored.setup_command.contains("\x1b_Ga=p,i=1,p=1,q=2,U=1,r=1,c=2\x1b\\"));
        assert_eq!(
            restored.setup_command.replace("i=1,", "i=2,").replace("p=1,", "p=2,"),
            original.setup_command
        );
        assert!(second_session.registry().contains(&ImageId::new("pepe")));
    }

    #[test]
    fn test_pre_cached_image_is_used() {
        let fs = Arc::new(MemoryFileSystem::new());
        let dm = manager(fs);
        let id = ImageId::new("cached");

        let cache = dm.payload_cache();
        cache.write_frame("emote", &id, 0, &[0; 400]).unwrap();
        cache
            .write_metadata(
                "emote",
                &id,
                &DecodedImage {
                    column_span: 2,
                    frames: vec![DecodedImageFrame {
                        width_px: 10,
                        height_px: 10,
                        payload_ref: "L3BhdGgvdG8vY2FjaGVkLnBuZw==".to_string(),
                        delay_ms: 0,
                    }],
                },
            )
            .unwrap();

        let result = dm.convert(failing_loader_unit("cached")).unwrap();

        let local_ref = encode_payload_ref(Path::new("/data/images/emote/cached.0"));
        assert!(result.setup_command.contains(&format!(";{local_ref}\x1b\\")));
        assert!(!result.setup_command.contains("L3BhdGgvdG8vY2FjaGVkLnBuZw=="));
        assert!(result.replacement_text.contains('\u{10EEEE}'));
    }

    #[test]
    fn test_animated_gif_conversion() {
        let fs = Arc::new(MemoryFileSystem::new());
        let dm = manager(fs.clone());
        let bytes = test_images::gif(20, 20, &[100, 100, 50]);
        let unit = DisplayUnit::new("dance", "emote", move || {
            Ok(FetchedImage::from_bytes(bytes, "image/gif"))
        })
        .animated(true);

        let result = dm.convert(unit).unwrap();

        assert!(result.setup_command.contains("\x1b_Ga=a,i=1,r=1,z=100,q=2;\x1b\\"));
        assert!(result.setup_command.contains("a=f,i=1,t=t,f=32,s=20,v=20,z=50,q=2,o=z;"));
        assert!(result.setup_command.contains("\x1b_Ga=a,i=1,s=3,v=1,q=2;\x1b\\"));
        assert!(fs.exists(Path::new("/data/images/emote/dance.2")));
    }

    #[test]
    fn test_unsupported_animation_leaves_caches_untouched() {
        let fs = Arc::new(MemoryFileSystem::new());
        let dm = manager(fs.clone());
        let bytes = test_images::png(10, 10);
        let unit = DisplayUnit::new("moving", "emote", move || {
            Ok(FetchedImage::from_bytes(bytes, "image/png"))
        })
        .animated(true);

        let err = dm.convert(unit).unwrap_err();

        assert!(matches!(err, DisplayError::UnsupportedAnimatedFormat { .. }));
        assert!(dm.registry().is_empty());
        assert_eq!(fs.file_count(), 0);
    }

    #[test]
    fn test_load_failure_is_propagated_and_retry_works() {
        let dm = manager(Arc::new(MemoryFileSystem::new()));

        let err = dm
            .convert(DisplayUnit::new("flaky", "emote", || Err("HTTP 503".into())))
            .unwrap_err();
        assert!(matches!(err, DisplayError::LoadFailure { .. }));
        assert!(dm.registry().is_empty());

        let calls = Arc::new(AtomicUsize::new(0));
        let result = dm
            .convert(counting_unit("flaky", test_images::png(10, 10), "image/png", &calls))
            .unwrap();
        assert!(result.needs_setup());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_decode_failure_is_propagated() {
        let dm = manager(Arc::new(MemoryFileSystem::new()));
        let unit = DisplayUnit::new("corrupt", "emote", || {
            Ok(FetchedImage::from_bytes(b"not an image".to_vec(), "image/png"))
        });

        let err = dm.convert(unit).unwrap_err();

        assert!(matches!(err, DisplayError::DecodeFailure { .. }));
        assert!(dm.registry().is_empty());
    }

    /// Memory filesystem that refuses to write sidecar files.
    struct NoSidecarFs(MemoryFileSystem);

    impl FileSystem for NoSidecarFs {
        fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            self.0.create_dir_all(path)
        }
        fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
            if path.extension().is_some_and(|ext| ext == "json") {
                return Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
            }
            self.0.write(path, contents)
        }
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.0.read(path)
        }
        fn exists(&self, path: &Path) -> bool {
            self.0.exists(path)
        }
        fn read_dir(&self, path: &Path) -> io::Result<Vec<FileEntry>> {
            self.0.read_dir(path)
        }
        fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
            self.0.remove_dir_all(path)
        }
    }

    #[test]
    fn test_sidecar_write_failure_keeps_decoded_result() {
        let dm = manager(Arc::new(NoSidecarFs(MemoryFileSystem::new())));
        let calls = Arc::new(AtomicUsize::new(0));

        let result = dm
            .convert(counting_unit("pepe", test_images::png(28, 28), "image/png", &calls))
            .unwrap();

        assert!(result.needs_setup());
        assert!(matches!(
            result.persist_warning,
            Some(DisplayError::CacheIoFailure { ref path, .. })
                if path == Path::new("/data/images/emote/pepe.json")
        ));
        assert!(dm.registry().contains(&ImageId::new("pepe")));
    }

    #[test]
    fn test_frame_write_failure_is_error() {
        use crate::domain::ports::mocks::MockFileSystem;

        let mut fs = MockFileSystem::new();
        fs.expect_read()
            .returning(|p| Err(io::Error::new(io::ErrorKind::NotFound, p.display().to_string())));
        fs.expect_create_dir_all().returning(|_| Ok(()));
        fs.expect_write()
            .returning(|_, _| Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only")));

        let dm = manager(Arc::new(fs));
        let calls = Arc::new(AtomicUsize::new(0));
        let err = dm
            .convert(counting_unit("pepe", test_images::png(10, 10), "image/png", &calls))
            .unwrap_err();

        assert!(err.is_cache_io());
        assert!(dm.registry().is_empty());
    }

    #[test]
    fn test_cleanup_old_images_command() {
        let clock = ManualClock::new();
        let registry = Arc::new(PlacementRegistry::with_clock(clock.clone()));
        let fs = Arc::new(MemoryFileSystem::new());
        let dm = DisplayManager::with_registry(fs, BASE, CellSize::new(10.0, 20.0), registry);
        let calls = Arc::new(AtomicUsize::new(0));

        dm.convert(counting_unit("old", test_images::png(10, 10), "image/png", &calls))
            .unwrap();
        clock.advance(Duration::from_secs(3600));
        dm.convert(counting_unit("new", test_images::png(10, 10), "image/png", &calls))
            .unwrap();
        clock.advance(Duration::from_secs(10));

        let cmd = dm.cleanup_old_images_command(Duration::from_secs(30 * 60));

        assert_eq!(cmd, "\x1b_Ga=D,i=1,q=2\x1b\\");
        assert!(dm.registry().contains(&ImageId::new("new")));

        // evicted images come back from disk with a new placement id
        let again = dm.convert(failing_loader_unit("old")).unwrap();
        assert!(again.setup_command.contains("i=3,"));
    }

    #[test]
    fn test_cleanup_all_forces_retransmission() {
        let dm = manager(Arc::new(MemoryFileSystem::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let bytes = test_images::png(10, 10);

        dm.convert(counting_unit("pepe", bytes.clone(), "image/png", &calls))
            .unwrap();

        assert_eq!(dm.cleanup_all_images_command(), "\x1b_Ga=D\x1b\\");
        assert!(dm.registry().is_empty());

        let again = dm.convert(counting_unit("pepe", bytes, "image/png", &calls)).unwrap();
        assert!(again.needs_setup());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_disk_cache_survives_restart() {
        use crate::infrastructure::fs::OsFileSystem;

        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let cell = CellSize::new(10.0, 20.0);
        let first = DisplayManager::new(Arc::new(OsFileSystem), dir.path(), cell);
        let original = first
            .convert(counting_unit("pepe", test_images::png(28, 28), "image/png", &calls))
            .unwrap();

        let frame = dir.path().join("emote").join("pepe.0");
        assert!(frame.exists());
        let payload_ref = super::super::payload_cache::encode_payload_ref(&frame);
        assert!(original.setup_command.contains(&payload_ref));

        let second = DisplayManager::new(Arc::new(OsFileSystem), dir.path(), cell);
        let restored = second.convert(failing_loader_unit("pepe")).unwrap();

        assert_eq!(restored.setup_command, original.setup_command);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.payload_cache().stats("emote").unwrap().images, 1);
    }

    #[test]
    fn test_right_padding_widens_placeholder() {
        let dm = manager(Arc::new(MemoryFileSystem::new()));
        let bytes = test_images::png(20, 20);
        let unit = DisplayUnit::new("badge", "badge", move || {
            Ok(FetchedImage::from_bytes(bytes, "image/png"))
        })
        .with_right_padding(10);

        let result = dm.convert(unit).unwrap();

        assert!(result.setup_command.contains("s=30,v=20"));
        assert_eq!(result.replacement_text.matches('\u{10EEEE}').count(), 3);
    }
}
