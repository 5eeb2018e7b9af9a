//! The remote-file boundary of the importer.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// What a fetch reported about the remote file. The body itself is
/// written to the destination path by the fetcher.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteFetch {
    pub status: u16,
    /// Value of the `content-length` response header, when present.
    pub content_length: Option<u64>,
    /// Where redirects ended up, when the fetcher followed any.
    pub final_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Remote server did not respond")]
    NoResponse,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Downloads attachment files. Implementations should follow redirects
/// and report the final URL so it can join the URL remap.
pub trait AttachmentFetcher {
    fn fetch(&mut self, url: &str, dest_path: &Path) -> Result<RemoteFetch, FetchError>;
}

/// Picks a name under `dir` that does not collide with an existing
/// file, counting up `name-1.ext`, `name-2.ext`, … the way uploads get
/// uniquely named.
pub fn unique_upload_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, Some(extension)),
        _ => (file_name, None),
    };

    let mut counter = 1;
    loop {
        let numbered = match extension {
            Some(extension) => format!("{stem}-{counter}.{extension}"),
            None => format!("{stem}-{counter}"),
        };
        let candidate = dir.join(numbered);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keeps_free_names_and_numbers_collisions() {
        let dir = tempfile::tempdir().unwrap();

        let first = unique_upload_path(dir.path(), "photo.jpg");
        assert_eq!(first, dir.path().join("photo.jpg"));
        std::fs::write(&first, b"x").unwrap();

        let second = unique_upload_path(dir.path(), "photo.jpg");
        assert_eq!(second, dir.path().join("photo-1.jpg"));
        std::fs::write(&second, b"x").unwrap();

        let third = unique_upload_path(dir.path(), "photo.jpg");
        assert_eq!(third, dir.path().join("photo-2.jpg"));
    }

    #[test]
    fn handles_names_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README"), b"x").unwrap();
        assert_eq!(
            unique_upload_path(dir.path(), "README"),
            dir.path().join("README-1")
        );
    }
}
