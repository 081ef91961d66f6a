//! Depth-first PDF enumeration over a local tree or an SMB share.
//!
//! Both backends produce the same lazy [`FileWalk`]: a finite, non-restartable iterator of
//! `Result<FileRecord, ScanError>` that stops after the first error. Callers either collect it
//! ([`collect_files`]) or push each record through a callback ([`walk_with`]).

use chrono::{DateTime, Utc};
use std::path::Path;

use crate::FileRecord;
use crate::error::{ScanError, ScanResult};

/// One directory entry as listed by a remote share.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
}

/// Directory listing primitive of a mounted share. Paths are `/`-separated, relative to the share
/// root ("" is the root itself).
pub trait ShareReader {
    fn read_dir(&mut self, path: &str) -> ScanResult<Vec<ShareEntry>>;
}

impl<S: ShareReader + ?Sized> ShareReader for &mut S {
    fn read_dir(&mut self, path: &str) -> ScanResult<Vec<ShareEntry>> {
        (**self).read_dir(path)
    }
}

/// Case-insensitive `.pdf` extension check on a file name.
pub fn is_pdf(name: &str) -> bool {
    name.len() >= 4
        && name
            .get(name.len() - 4..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(".pdf"))
}

/// Path string as stored in the database (forward slashes on every platform).
pub fn path_to_db_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Lazy walk over one backend. Yields nothing after the first `Err`.
pub struct FileWalk<'a> {
    inner: Box<dyn Iterator<Item = ScanResult<FileRecord>> + 'a>,
    failed: bool,
}

impl<'a> FileWalk<'a> {
    fn new(inner: impl Iterator<Item = ScanResult<FileRecord>> + 'a) -> Self {
        Self {
            inner: Box::new(inner),
            failed: false,
        }
    }
}

impl Iterator for FileWalk<'_> {
    type Item = ScanResult<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.inner.next()?;
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

/// Walk `root` on the local filesystem (symlinks not followed, regular files only).
pub fn local_walk(root: &Path) -> FileWalk<'static> {
    let iter = walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|r| match r {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    return None;
                }
                let name = entry.file_name().to_string_lossy();
                if !is_pdf(&name) {
                    return None;
                }
                Some(local_record(&entry))
            }
            Err(err) => Some(Err(walkdir_error(err))),
        });
    FileWalk::new(iter)
}

fn local_record(entry: &walkdir::DirEntry) -> ScanResult<FileRecord> {
    let meta = entry.metadata().map_err(walkdir_error)?;
    let modified = meta.modified().map_err(|source| ScanError::Filesystem {
        path: entry.path().to_path_buf(),
        source,
    })?;
    Ok(FileRecord {
        path: path_to_db_string(entry.path()),
        name: entry.file_name().to_string_lossy().into_owned(),
        size: meta.len(),
        mod_time: DateTime::<Utc>::from(modified),
    })
}

fn walkdir_error(err: walkdir::Error) -> ScanError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    let msg = err.to_string();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other(msg));
    ScanError::Filesystem { path, source }
}

/// Walk a mounted share starting at `start`. Stored paths are `display_root` + `/` + share path,
/// e.g. `//nas/docs/dir/file.pdf`.
pub fn share_walk<'a, S>(reader: S, display_root: String, start: &str) -> FileWalk<'a>
where
    S: ShareReader + 'a,
{
    FileWalk::new(ShareWalk {
        reader,
        display_root,
        start: Some(start.trim_matches('/').to_string()),
        stack: Vec::new(),
    })
}

struct ShareWalk<S> {
    reader: S,
    display_root: String,
    start: Option<String>,
    /// Open directories, innermost last: (share path, remaining entries).
    stack: Vec<(String, std::vec::IntoIter<ShareEntry>)>,
}

impl<S: ShareReader> ShareWalk<S> {
    fn descend(&mut self, dir: String) -> ScanResult<()> {
        let entries = self.reader.read_dir(&dir)?;
        self.stack.push((dir, entries.into_iter()));
        Ok(())
    }

    fn record(&self, dir: &str, entry: ShareEntry) -> FileRecord {
        let rel = join_share_path(dir, &entry.name);
        FileRecord {
            path: format!("{}/{}", self.display_root, rel),
            name: entry.name,
            size: entry.size,
            mod_time: entry.mod_time,
        }
    }
}

impl<S: ShareReader> Iterator for ShareWalk<S> {
    type Item = ScanResult<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(start) = self.start.take()
            && let Err(e) = self.descend(start)
        {
            return Some(Err(e));
        }
        loop {
            let (dir, entries) = self.stack.last_mut()?;
            let Some(entry) = entries.next() else {
                self.stack.pop();
                continue;
            };
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            let dir = dir.clone();
            if entry.is_dir {
                if let Err(e) = self.descend(join_share_path(&dir, &entry.name)) {
                    return Some(Err(e));
                }
            } else if is_pdf(&entry.name) {
                return Some(Ok(self.record(&dir, entry)));
            }
        }
    }
}

fn join_share_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Collecting variant: every record in traversal order, or the first error.
pub fn collect_files(walk: FileWalk<'_>) -> ScanResult<Vec<FileRecord>> {
    walk.collect()
}

/// Streaming variant: invoke `on_file` per record; the first walk or callback error aborts the
/// walk and is returned unchanged.
pub fn walk_with<F>(walk: FileWalk<'_>, mut on_file: F) -> ScanResult<usize>
where
    F: FnMut(FileRecord) -> ScanResult<()>,
{
    let mut count = 0_usize;
    for record in walk {
        on_file(record?)?;
        count += 1;
    }
    Ok(count)
}
