//! ZIP output and extraction.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::ArchiveError;
use crate::images::{ImageSource, ProcessedImage};
use crate::security::{self, ExtractLimits};

/// Append-only ZIP sink. Entries are written in call order.
pub struct ArchiveBuilder {
    zip: zip::ZipWriter<File>,
    path: PathBuf,
    options: zip::write::FileOptions<'static, ()>,
    entries: usize,
}

impl ArchiveBuilder {
    /// Create (or truncate) the archive at `path`. `compression_level` 0 stores
    /// entries uncompressed; 1-9 deflate.
    pub fn create(path: &Path, compression_level: i64) -> Result<Self, ArchiveError> {
        let file = File::create(path)?;
        let options = if compression_level == 0 {
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored)
        } else {
            zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .compression_level(Some(compression_level))
        };
        Ok(Self {
            zip: zip::ZipWriter::new(file),
            path: path.to_path_buf(),
            options,
            entries: 0,
        })
    }

    fn zip_err(&self, e: zip::result::ZipError) -> ArchiveError {
        ArchiveError::Zip {
            path: self.path.display().to_string(),
            detail: e.to_string(),
        }
    }

    pub fn add_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        self.zip.start_file(name, self.options).map_err(|e| self.zip_err(e))?;
        self.zip.write_all(bytes)?;
        self.entries += 1;
        Ok(())
    }

    /// Add a processed image. Passthrough files are streamed from disk.
    pub fn add_image(&mut self, image: &ProcessedImage) -> Result<(), ArchiveError> {
        match &image.content {
            ImageSource::Buffer(bytes) => self.add_bytes(&image.name, bytes),
            ImageSource::File(path) => {
                let mut source = File::open(path)?;
                self.zip.start_file(image.name.as_str(), self.options).map_err(|e| self.zip_err(e))?;
                io::copy(&mut source, &mut self.zip)?;
                self.entries += 1;
                Ok(())
            }
        }
    }

    /// Finalize the archive and return its size in bytes.
    pub fn finish(self) -> Result<u64, ArchiveError> {
        let path = self.path.display().to_string();
        let file = self.zip.finish().map_err(|e| ArchiveError::Zip {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        file.sync_all()?;
        let size = file.metadata()?.len();
        tracing::debug!("Wrote {} entries to {} ({} bytes)", self.entries, path, size);
        Ok(size)
    }
}

/// Unpack `archive` into `dest`, creating it if needed. Existing files are
/// overwritten. Returns the extracted file paths.
pub fn extract_archive(archive: &Path, dest: &Path, limits: &ExtractLimits) -> Result<Vec<PathBuf>, ArchiveError> {
    let zip_err = |e: zip::result::ZipError| ArchiveError::Zip {
        path: archive.display().to_string(),
        detail: e.to_string(),
    };

    let mut zip = zip::ZipArchive::new(File::open(archive)?).map_err(zip_err)?;
    security::check_file_count(zip.len() as u64, limits)?;
    std::fs::create_dir_all(dest)?;

    let mut extracted = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_err)?;
        let name = entry.name().to_string();
        security::check_path_traversal(&name)?;
        security::check_compression_ratio(&name, entry.compressed_size(), entry.size(), limits)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(crate::error::SecurityError::PathTraversal { path: name }.into());
        };

        let target = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        extracted.push(target);
    }

    tracing::info!("Archive extracted to {}", dest.display());
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn entry_names(path: &Path) -> Vec<String> {
        let zip = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        zip.file_names().map(String::from).collect()
    }

    #[test]
    fn entries_keep_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let on_disk = dir.path().join("logo.gif");
        std::fs::write(&on_disk, b"GIF89a-bytes").unwrap();
        let archive = dir.path().join("out.zip");

        let mut builder = ArchiveBuilder::create(&archive, 8).unwrap();
        builder
            .add_image(&ProcessedImage {
                name: "images/b.jpg".into(),
                content: ImageSource::Buffer(vec![1, 2, 3]),
            })
            .unwrap();
        builder
            .add_image(&ProcessedImage {
                name: "images/logo.gif".into(),
                content: ImageSource::File(on_disk),
            })
            .unwrap();
        builder.add_bytes("index.html", b"<p>hi</p>").unwrap();
        let size = builder.finish().unwrap();

        assert_eq!(size, std::fs::metadata(&archive).unwrap().len());
        let mut names = entry_names(&archive);
        names.sort();
        assert_eq!(names, vec!["images/b.jpg", "images/logo.gif", "index.html"]);

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.by_index(2).unwrap().name(), "index.html");
        let mut gif = String::new();
        zip.by_name("images/logo.gif").unwrap().read_to_string(&mut gif).unwrap();
        assert_eq!(gif, "GIF89a-bytes");
    }

    #[test]
    fn level_zero_stores_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("stored.zip");
        let mut builder = ArchiveBuilder::create(&archive, 0).unwrap();
        builder.add_bytes("index.html", &[b'a'; 4096]).unwrap();
        builder.finish().unwrap();

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.by_index(0).unwrap().compression(), zip::CompressionMethod::Stored);
    }

    #[test]
    fn extract_round_trips_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("t.zip");
        let mut builder = ArchiveBuilder::create(&archive, 6).unwrap();
        builder.add_bytes("images/a.png", b"png").unwrap();
        builder.add_bytes("index.html", b"<p>x</p>").unwrap();
        builder.finish().unwrap();

        let dest = dir.path().join("build");
        let files = extract_archive(&archive, &dest, &ExtractLimits::default()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(std::fs::read_to_string(dest.join("index.html")).unwrap(), "<p>x</p>");
        assert_eq!(std::fs::read(dest.join("images/a.png")).unwrap(), b"png");
    }

    #[test]
    fn extract_rejects_traversal_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
        let options: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
        zip.start_file("../escape.html", options).unwrap();
        zip.write_all(b"x").unwrap();
        zip.finish().unwrap();

        let err = extract_archive(&archive, &dir.path().join("build"), &ExtractLimits::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::Security(_)));
        assert!(!dir.path().join("escape.html").exists());
    }
}
