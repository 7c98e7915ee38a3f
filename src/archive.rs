//! In-memory archive tree and ZIP serialization
//!
//! Folders are created on demand: a `(date, category)` folder comes into
//! existence the first time something is written into it, and its handle is
//! memoized for the rest of the run. Entries are serialized in sorted path
//! order with a fixed timestamp so equal inputs produce equal bytes.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Category subfolder inside a date folder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// `images/`
    Images,
    /// `audio/`, also the catch-all for non-image media
    Audio,
    /// `call_summaries/`
    CallSummaries,
}

impl Category {
    /// Folder name inside the date folder
    pub fn folder_name(&self) -> &'static str {
        match self {
            Category::Images => "images",
            Category::Audio => "audio",
            Category::CallSummaries => "call_summaries",
        }
    }

    /// Media destination for a MIME type
    pub fn for_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            Category::Images
        } else {
            Category::Audio
        }
    }
}

/// Handle to a created folder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolderHandle {
    path: String,
}

impl FolderHandle {
    /// Folder path without trailing slash
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of a file named `name` inside this folder
    pub fn entry_path(&self, name: &str) -> String {
        format!("{}/{}", self.path, name)
    }
}

#[derive(Debug)]
enum Node {
    Folder,
    File(Vec<u8>),
}

/// Tree of folders and files for one export run
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    entries: Mutex<BTreeMap<String, Node>>,
    folders: Mutex<HashMap<(String, Category), FolderHandle>>,
}

impl ArchiveBuilder {
    /// Create an empty archive
    pub fn new() -> Self {
        Self::default()
    }

    /// Folder for `category` under `date`, created on first call
    pub async fn folder(&self, date: &str, category: Category) -> Result<FolderHandle> {
        let mut folders = self.folders.lock().await;
        if let Some(handle) = folders.get(&(date.to_string(), category)) {
            return Ok(handle.clone());
        }

        let path = format!("{}/{}", date, category.folder_name());
        validate_path(&path)?;
        {
            let mut entries = self.entries.lock().await;
            insert_ancestors(&mut entries, &format!("{}/", path));
        }
        debug!(folder = %path, "created archive folder");

        let handle = FolderHandle { path };
        folders.insert((date.to_string(), category), handle.clone());
        Ok(handle)
    }

    /// Add a file; missing parent folders are created
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateEntry`] if `path` was already written or names a folder.
    pub async fn write_file(&self, path: &str, content: impl Into<Vec<u8>>) -> Result<()> {
        validate_path(path)?;

        let mut entries = self.entries.lock().await;
        if entries.contains_key(path) || entries.contains_key(&format!("{}/", path)) {
            return Err(Error::DuplicateEntry(path.to_string()));
        }
        insert_ancestors(&mut entries, path);

        let content = content.into();
        trace!(path = %path, bytes = content.len(), "added archive entry");
        entries.insert(path.to_string(), Node::File(content));
        Ok(())
    }

    /// Write `name` into `folder`
    pub async fn write_in(
        &self,
        folder: &FolderHandle,
        name: &str,
        content: impl Into<Vec<u8>>,
    ) -> Result<String> {
        let path = folder.entry_path(name);
        self.write_file(&path, content).await?;
        Ok(path)
    }

    /// All entry paths in serialization order; folders end with `/`
    pub async fn paths(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    /// Number of files (not folders) written so far
    pub async fn file_count(&self) -> usize {
        self.entries
            .lock()
            .await
            .values()
            .filter(|node| matches!(node, Node::File(_)))
            .count()
    }

    /// Encode the tree as a ZIP archive
    ///
    /// Encoding runs on the blocking pool.
    pub async fn finish(self) -> Result<Vec<u8>> {
        let entries = self.entries.into_inner();
        tokio::task::spawn_blocking(move || encode_zip(entries))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("ZIP task failed: {}", e))))?
    }
}

fn encode_zip(entries: BTreeMap<String, Node>) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    for (path, node) in entries {
        match node {
            Node::Folder => writer.add_directory(path, options)?,
            Node::File(content) => {
                writer.start_file(path, options)?;
                writer.write_all(&content)?;
            }
        }
    }

    Ok(writer.finish()?.into_inner())
}

/// Record every folder above `path` (`a/b/c.txt` adds `a/` and `a/b/`)
fn insert_ancestors(entries: &mut BTreeMap<String, Node>, path: &str) {
    for (index, _) in path.match_indices('/') {
        let folder = &path[..=index];
        entries.entry(folder.to_string()).or_insert(Node::Folder);
    }
}

fn validate_path(path: &str) -> Result<()> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let bad = trimmed.is_empty()
        || trimmed.starts_with('/')
        || trimmed.contains('\\')
        || trimmed
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if bad {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid archive path {:?}", path),
        )));
    }
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Arc;

    #[test]
    fn category_for_mime() {
        assert_eq!(Category::for_mime("image/png"), Category::Images);
        assert_eq!(Category::for_mime("audio/mpeg"), Category::Audio);
        assert_eq!(Category::for_mime("video/mp4"), Category::Audio);
        assert_eq!(Category::for_mime(""), Category::Audio);
    }

    #[tokio::test]
    async fn empty_archive_has_no_folders() {
        let archive = ArchiveBuilder::new();
        archive.write_file("full_conversation.txt", "").await.unwrap();

        assert_eq!(archive.paths().await, vec!["full_conversation.txt"]);
    }

    #[tokio::test]
    async fn folder_is_memoized_per_date_and_category() {
        let archive = ArchiveBuilder::new();

        let first = archive.folder("2024-01-03", Category::Images).await.unwrap();
        let second = archive.folder("2024-01-03", Category::Images).await.unwrap();
        let audio = archive.folder("2024-01-03", Category::Audio).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.path(), "2024-01-03/images");
        assert_eq!(audio.path(), "2024-01-03/audio");
        assert_eq!(
            archive.paths().await,
            vec!["2024-01-03/", "2024-01-03/audio/", "2024-01-03/images/"]
        );
    }

    #[tokio::test]
    async fn concurrent_writers_share_one_folder() {
        let archive = Arc::new(ArchiveBuilder::new());

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let archive = Arc::clone(&archive);
                tokio::spawn(async move {
                    let folder = archive
                        .folder("2024-01-03", Category::CallSummaries)
                        .await
                        .unwrap();
                    archive
                        .write_in(&folder, &format!("{i:02}.txt"), format!("call {i}"))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let paths = archive.paths().await;
        let folders: Vec<_> = paths.iter().filter(|p| p.ends_with('/')).collect();
        assert_eq!(folders, vec!["2024-01-03/", "2024-01-03/call_summaries/"]);
        assert_eq!(archive.file_count().await, 32);
    }

    #[tokio::test]
    async fn duplicate_writes_are_rejected() {
        let archive = ArchiveBuilder::new();
        archive.write_file("a/b.txt", "one").await.unwrap();

        let err = archive.write_file("a/b.txt", "two").await.unwrap_err();
        assert!(matches!(err, Error::DuplicateEntry(p) if p == "a/b.txt"));

        assert!(archive.write_file("a", "folder clash").await.is_err());
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let archive = ArchiveBuilder::new();
        for path in ["", "/abs.txt", "../up.txt", "a//b.txt", "a/./b.txt", "a\\b.txt"] {
            assert!(
                archive.write_file(path, "x").await.is_err(),
                "{path:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn finish_produces_readable_zip() {
        let archive = ArchiveBuilder::new();
        archive
            .write_file("full_conversation.txt", "hello\n")
            .await
            .unwrap();
        let folder = archive.folder("2024-01-03", Category::Images).await.unwrap();
        archive
            .write_in(&folder, "09-00-00_from_1555.png", vec![0x89, b'P', b'N', b'G'])
            .await
            .unwrap();

        let bytes = archive.finish().await.unwrap();
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        let names: Vec<_> = zip.file_names().map(str::to_string).collect();
        assert_eq!(names.len(), 4);
        assert!(names.contains(&"2024-01-03/".to_string()));
        assert!(names.contains(&"2024-01-03/images/".to_string()));

        let mut text = String::new();
        zip.by_name("full_conversation.txt")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "hello\n");

        let mut image = Vec::new();
        zip.by_name("2024-01-03/images/09-00-00_from_1555.png")
            .unwrap()
            .read_to_end(&mut image)
            .unwrap();
        assert_eq!(image, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn identical_trees_encode_identically() {
        async fn build(order: &[&str]) -> Vec<u8> {
            let archive = ArchiveBuilder::new();
            for name in order {
                archive.write_file(name, *name).await.unwrap();
            }
            archive.finish().await.unwrap()
        }

        let a = build(&["x/1.txt", "y/2.txt", "z.txt"]).await;
        let b = build(&["z.txt", "y/2.txt", "x/1.txt"]).await;
        assert_eq!(a, b);
    }
}
