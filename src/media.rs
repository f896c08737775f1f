use std::fs;
use std::io;
use std::path::PathBuf;

use base64::prelude::*;
use strum_macros::Display;
use tracing::warn;

use crate::error::ApiError;

/// Bounding box for derived thumbnails; aspect ratio is preserved.
const THUMB_SIZE: u32 = 150;

#[derive(Debug, Copy, Clone, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Checkin,
    Checkout,
}

#[derive(Debug, Copy, Clone, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Camera {
    Front,
    Rear,
}

#[derive(Debug)]
pub struct StoredImage {
    pub filename: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Default)]
pub struct PurgeOutcome {
    pub removed: usize,
    pub skipped: Vec<String>,
}

/// Storage area for uploaded photos and their thumbnails. Owns the bytes;
/// the ledger stores only filenames.
#[derive(Debug, Clone)]
pub struct MediaArchive {
    root: PathBuf,
}

pub fn thumb_name(filename: &str) -> String {
    format!("thumb_{filename}")
}

impl MediaArchive {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Decodes a base64 data URL ("data:image/jpeg;base64,...") and writes
    /// it under the `{direction}_{camera}_{user_id}_{stamp}.jpg` naming
    /// convention, deriving a `thumb_`-prefixed thumbnail alongside.
    ///
    /// A failed thumbnail keeps the original file; a failed decode stores
    /// nothing.
    pub fn store(
        &self,
        direction: Direction,
        camera: Camera,
        user_id: i64,
        stamp: &str,
        data_url: &str,
    ) -> Result<StoredImage, ApiError> {
        let encoded = data_url
            .split_once(',')
            .map(|(_, data)| data)
            .unwrap_or(data_url);

        let bytes = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|e| ApiError::Storage(format!("Invalid image encoding: {e}")))?;

        let filename = format!("{direction}_{camera}_{user_id}_{stamp}.jpg");
        let path = self.path_of(&filename);
        fs::write(&path, &bytes)
            .map_err(|e| ApiError::Storage(format!("Failed to write image: {e}")))?;

        let thumbnail = match self.write_thumbnail(&filename, &bytes) {
            Ok(name) => Some(name),
            Err(e) => {
                warn!(%filename, error = %e, "Thumbnail generation failed, keeping original only");
                None
            }
        };

        Ok(StoredImage {
            filename,
            thumbnail,
        })
    }

    fn write_thumbnail(&self, filename: &str, bytes: &[u8]) -> Result<String, image::ImageError> {
        let img = image::load_from_memory(bytes)?;
        let thumb = img.thumbnail(THUMB_SIZE, THUMB_SIZE);
        let name = thumb_name(filename);
        // jpeg output has no alpha channel
        thumb.to_rgb8().save(self.path_of(&name))?;
        Ok(name)
    }

    /// Best-effort delete loop: failures (including files already gone)
    /// are collected and logged, never raised.
    pub fn remove_all<I, S>(&self, filenames: I) -> PurgeOutcome
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut outcome = PurgeOutcome::default();
        for name in filenames {
            let name = name.as_ref();
            match fs::remove_file(self.path_of(name)) {
                Ok(()) => outcome.removed += 1,
                Err(e) => {
                    warn!(file = %name, error = %e, "Skipping media file during purge");
                    outcome.skipped.push(name.to_string());
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use std::io::Cursor;

    fn archive() -> (tempfile::TempDir, MediaArchive) {
        let dir = tempfile::tempdir().unwrap();
        let archive = MediaArchive::new(dir.path().join("uploads")).unwrap();
        (dir, archive)
    }

    fn png_data_url(width: u32, height: u32) -> String {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", BASE64_STANDARD.encode(&buf))
    }

    #[test]
    fn stores_image_and_bounded_thumbnail() {
        let (_dir, archive) = archive();
        let stored = archive
            .store(
                Direction::Checkin,
                Camera::Front,
                42,
                "20240101_090000",
                &png_data_url(300, 200),
            )
            .unwrap();

        assert_eq!(stored.filename, "checkin_front_42_20240101_090000.jpg");
        assert!(archive.path_of(&stored.filename).exists());

        let thumb = stored.thumbnail.expect("thumbnail");
        assert_eq!(thumb, "thumb_checkin_front_42_20240101_090000.jpg");
        let img = image::open(archive.path_of(&thumb)).unwrap().to_rgb8();
        // 300x200 shrunk into a 150x150 box keeps the 3:2 ratio
        assert_eq!((img.width(), img.height()), (150, 100));
    }

    #[test]
    fn rejects_undecodable_payload() {
        let (_dir, archive) = archive();
        let err = archive.store(
            Direction::Checkin,
            Camera::Rear,
            1,
            "20240101_090000",
            "data:image/jpeg;base64,@@not-base64@@",
        );
        assert!(matches!(err, Err(ApiError::Storage(_))));
        assert!(!archive.path_of("checkin_rear_1_20240101_090000.jpg").exists());
    }

    #[test]
    fn keeps_original_when_thumbnail_fails() {
        let (_dir, archive) = archive();
        // valid base64, not a decodable image
        let data_url = format!(
            "data:image/jpeg;base64,{}",
            BASE64_STANDARD.encode(b"not an image at all")
        );
        let stored = archive
            .store(
                Direction::Checkout,
                Camera::Front,
                7,
                "20240101_170000",
                &data_url,
            )
            .unwrap();

        assert!(stored.thumbnail.is_none());
        assert!(archive.path_of(&stored.filename).exists());
    }

    #[test]
    fn purge_reports_missing_files_without_raising() {
        let (_dir, archive) = archive();
        std::fs::write(archive.path_of("a.jpg"), b"x").unwrap();

        let outcome = archive.remove_all(["a.jpg", "gone.jpg"]);
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.skipped, vec!["gone.jpg".to_string()]);
        assert!(!archive.path_of("a.jpg").exists());
    }
}
