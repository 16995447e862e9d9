//! Album discovery on disk
//!
//! An album is a directory that directly holds media files. Disc subfolders
//! (`CD1`, `Disc 2`, `disk-iii`, ...) fold into their parent album.
//! Directories holding only artwork, logs, or playlists are not albums.

use crate::models::{AlbumInput, Item};
use crate::types::AlbumSource;
use amc_common::{Error, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::UNIX_EPOCH;
use walkdir::{DirEntry, WalkDir};

static DISC_DIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:cd|disc|disk)[\s._-]*([0-9ivx]+)\s*$").expect("static pattern")
});

const SIDECAR_EXTENSIONS: [&str; 18] = [
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "txt", "nfo", "log", "cue", "m3u", "m3u8", "pdf",
    "sfv", "md5", "db", "ini", "accurip",
];

/// True for disc subfolder names such as `CD1` or `Disc II`
pub fn is_disc_dir(name: &str) -> bool {
    DISC_DIR.is_match(name)
}

#[derive(Default)]
struct AlbumFiles {
    files: Vec<PathBuf>,
    discs: BTreeSet<String>,
}

/// Walks a music root and yields one item per album
pub struct DirectoryAlbumSource {
    root: PathBuf,
    ignored_dirs: Vec<String>,
    limit: Option<usize>,
}

impl DirectoryAlbumSource {
    pub fn new(root: impl Into<PathBuf>, ignored_dirs: &[String]) -> Self {
        Self {
            root: root.into(),
            ignored_dirs: ignored_dirs.iter().map(|d| d.to_lowercase()).collect(),
            limit: None,
        }
    }

    /// Stop after this many albums (in path order)
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    fn should_visit(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            return false;
        }
        if entry.file_type().is_dir() && self.ignored_dirs.contains(&name.to_lowercase()) {
            return false;
        }
        true
    }

    fn build_item(&self, album_dir: &Path, album: AlbumFiles) -> Item {
        let mut files = album.files;
        files.sort();

        let folder_name = album_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let parent_dirs = album_dir
            .parent()
            .and_then(|p| p.strip_prefix(&self.root).ok())
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let change = change_fingerprint(&files);
        let input = AlbumInput {
            path: album_dir.to_path_buf(),
            folder_name,
            parent_dirs,
            files,
            disc_count: album.discs.len().max(1) as u32,
        };
        Item::new(album_dir.to_string_lossy().to_string(), change, input)
    }
}

impl AlbumSource for DirectoryAlbumSource {
    fn discover(&self) -> Result<Vec<Item>> {
        if !self.root.is_dir() {
            return Err(Error::NotFound(format!("Music root {} is not a directory", self.root.display())));
        }

        let mut albums: BTreeMap<PathBuf, AlbumFiles> = BTreeMap::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| self.should_visit(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(parent) = path.parent() else {
                continue;
            };
            let parent_name = parent.file_name().map(|n| n.to_string_lossy().to_string());

            let (album_dir, disc) = match (parent_name, parent.parent()) {
                (Some(name), Some(grandparent)) if parent != self.root && is_disc_dir(&name) => {
                    (grandparent.to_path_buf(), Some(name))
                }
                _ => (parent.to_path_buf(), None),
            };

            let album = albums.entry(album_dir).or_default();
            album.files.push(path.to_path_buf());
            if let Some(disc) = disc {
                album.discs.insert(disc);
            }
        }

        let mut items: Vec<Item> = albums
            .into_iter()
            .filter(|(_, album)| album.files.iter().any(|f| !is_sidecar(f)))
            .map(|(dir, album)| self.build_item(&dir, album))
            .collect();

        if let Some(limit) = self.limit {
            items.truncate(limit);
        }

        tracing::info!(root = %self.root.display(), albums = items.len(), "Album discovery complete");
        Ok(items)
    }
}

fn is_sidecar(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| SIDECAR_EXTENSIONS.contains(&e.as_str()))
}

/// `n{files}-s{total bytes}-m{latest mtime}`
///
/// Any added, removed, resized, or touched file changes it.
fn change_fingerprint(files: &[PathBuf]) -> String {
    let mut total_size = 0u64;
    let mut latest_mtime = 0u64;
    for file in files {
        match std::fs::metadata(file) {
            Ok(meta) => {
                total_size += meta.len();
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                latest_mtime = latest_mtime.max(mtime);
            }
            Err(e) => tracing::warn!(file = %file.display(), error = %e, "Cannot stat file"),
        }
    }
    format!("n{}-s{}-m{}", files.len(), total_size, latest_mtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path, bytes: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_disc_dir_names() {
        for name in ["CD1", "cd 2", "Disc 3", "disk-iv", "DISC_10", " cd.ii "] {
            assert!(is_disc_dir(name), "{}", name);
        }
        for name in ["CD Collection", "Discography", "Album 1"] {
            assert!(!is_disc_dir(name), "{}", name);
        }
    }

    #[test]
    fn test_discovers_albums_and_folds_discs() {
        let root = TempDir::new().unwrap();
        let r = root.path();
        touch(&r.join("Jazz/Miles Davis - Kind of Blue/01.flac"), b"a");
        touch(&r.join("Jazz/Miles Davis - Kind of Blue/cover.jpg"), b"img");
        touch(&r.join("Opera/Tosca/CD1/01.flac"), b"a");
        touch(&r.join("Opera/Tosca/CD2/01.flac"), b"b");
        touch(&r.join("Opera/Tosca/Scans/booklet.flac"), b"x");
        touch(&r.join("Artwork Only/front.png"), b"img");
        touch(&r.join(".hidden/01.flac"), b"a");

        let source = DirectoryAlbumSource::new(r, &["scans".to_string()]);
        let items = source.discover().unwrap();

        assert_eq!(items.len(), 2, "{:?}", items.iter().map(|i| &i.identity).collect::<Vec<_>>());
        let kind_of_blue = &items[0];
        assert_eq!(kind_of_blue.input.folder_name, "Miles Davis - Kind of Blue");
        assert_eq!(kind_of_blue.input.parent_dirs, vec!["Jazz".to_string()]);
        assert_eq!(kind_of_blue.input.files.len(), 2);

        let tosca = &items[1];
        assert_eq!(tosca.input.folder_name, "Tosca");
        assert_eq!(tosca.input.disc_count, 2);
        assert_eq!(tosca.input.files.len(), 2);
    }

    #[test]
    fn test_change_fingerprint_tracks_content() {
        let root = TempDir::new().unwrap();
        let album = root.path().join("Album");
        touch(&album.join("01.flac"), b"aaaa");

        let first = DirectoryAlbumSource::new(root.path(), &[]).discover().unwrap();
        let again = DirectoryAlbumSource::new(root.path(), &[]).discover().unwrap();
        assert_eq!(first[0].change_fingerprint, again[0].change_fingerprint);

        touch(&album.join("02.flac"), b"bb");
        let changed = DirectoryAlbumSource::new(root.path(), &[]).discover().unwrap();
        assert_ne!(first[0].change_fingerprint, changed[0].change_fingerprint);
        assert_eq!(first[0].identity, changed[0].identity);
    }

    #[test]
    fn test_limit_and_missing_root() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join("A/01.mp3"), b"a");
        touch(&root.path().join("B/01.mp3"), b"a");

        let items = DirectoryAlbumSource::new(root.path(), &[])
            .with_limit(Some(1))
            .discover()
            .unwrap();
        assert_eq!(items.len(), 1);

        let missing = DirectoryAlbumSource::new(root.path().join("nope"), &[]).discover();
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }
}
