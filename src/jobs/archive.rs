//! Packing trained weights for upload.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Builder as TarBuilder;

/// Writes `dir` into a gzip-compressed tarball at `dest`, rooted at `.`.
///
/// Returns the archive size in bytes.
pub async fn pack_directory(dir: &Path, dest: &Path) -> std::io::Result<u64> {
    let dir: PathBuf = dir.to_path_buf();
    let dest: PathBuf = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        if !dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("output directory '{}' missing", dir.display()),
            ));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(&dest)?;
        let enc = GzEncoder::new(file, Compression::default());
        let mut tar = TarBuilder::new(enc);
        tar.append_dir_all(".", &dir)?;
        tar.into_inner()?.finish()?.sync_all()?;

        Ok(std::fs::metadata(&dest)?.len())
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    #[tokio::test]
    async fn test_pack_directory_contains_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output");
        std::fs::create_dir_all(out.join("checkpoints")).unwrap();
        std::fs::write(out.join("checkpoints/model.safetensors"), b"weights").unwrap();

        let dest = dir.path().join("abc.tar.gz");
        let size = pack_directory(&out, &dest).await.unwrap();
        assert!(size > 0);

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&dest).unwrap()));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("checkpoints/model.safetensors")));
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(pack_directory(&dir.path().join("nope"), &dir.path().join("x.tar.gz"))
            .await
            .is_err());
    }
}
