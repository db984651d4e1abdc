//! Disk-backed span store.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/cache_index.json                      span records (serde JSON)
//! <root>/<sha256(key) prefix>/<position>.<uuid>.span
//! ```
//!
//! The index is rewritten after every mutation. At open, records whose file
//! is missing or has the wrong size are dropped and span files no record
//! points to are deleted.

use bytes::{Bytes, BytesMut};
use core_runtime::logging::strip_path;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::index::SpanIndex;
use super::span::CacheSpan;
use super::store::{ListenerSlot, SpanChange, SpanStore, SpanStoreListener};
use crate::error::{PlaybackError, Result};

const INDEX_FILE: &str = "cache_index.json";
const INDEX_TMP_FILE: &str = "cache_index.json.tmp";
const INDEX_VERSION: u32 = 1;
const SPAN_EXTENSION: &str = "span";
/// Hex characters of the key digest used as the per-key directory name.
const KEY_DIR_LEN: usize = 16;

#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    version: u32,
    spans: Vec<SpanRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SpanRecord {
    key: String,
    position: u64,
    length: u64,
    /// Path of the span file relative to the storage root.
    file: String,
}

/// [`SpanStore`] persisting each span as its own file.
pub struct FileSpanStore {
    root: PathBuf,
    index: Mutex<SpanIndex<String>>,
    listener: ListenerSlot,
    persist_lock: Mutex<()>,
}

impl FileSpanStore {
    /// Opens (or creates) a store rooted at `root` and loads its index.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let mut index = SpanIndex::default();
        let mut dropped = 0usize;

        for record in Self::load_records(&root) {
            if record.length == 0 || !is_relative_span_path(&record.file) {
                dropped += 1;
                continue;
            }
            let path = root.join(&record.file);
            match fs::metadata(&path) {
                Ok(meta) if meta.is_file() && meta.len() == record.length => {
                    let span = CacheSpan::new(record.key, record.position, record.length);
                    if let Some(duplicate) = index.insert(span, record.file) {
                        dropped += 1;
                        remove_file_quietly(&root.join(duplicate.payload));
                    }
                }
                _ => {
                    debug!(file = %record.file, "Dropping span record without a valid file");
                    dropped += 1;
                }
            }
        }

        let store = Self {
            root,
            index: Mutex::new(index),
            listener: ListenerSlot::default(),
            persist_lock: Mutex::new(()),
        };

        let orphans = store.remove_orphan_files();
        if dropped > 0 || orphans > 0 {
            store.persist_index();
        }

        info!(
            spans = store.span_count(),
            bytes = store.total_bytes(),
            dropped,
            orphans,
            "Span store opened"
        );
        Ok(store)
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_records(root: &Path) -> Vec<SpanRecord> {
        let path = root.join(INDEX_FILE);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read span index, starting empty");
                return Vec::new();
            }
        };

        match serde_json::from_slice::<IndexDocument>(&raw) {
            Ok(document) if document.version == INDEX_VERSION => document.spans,
            Ok(document) => {
                warn!(
                    version = document.version,
                    expected = INDEX_VERSION,
                    "Unsupported span index version, starting empty"
                );
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Span index is corrupted, starting empty");
                Vec::new()
            }
        }
    }

    /// Deletes span files not referenced by the index. Returns how many.
    fn remove_orphan_files(&self) -> usize {
        let referenced: HashSet<PathBuf> = self
            .index
            .lock()
            .entries()
            .map(|entry| self.root.join(&entry.payload))
            .collect();

        let Ok(dirs) = fs::read_dir(&self.root) else {
            return 0;
        };

        let mut removed = 0;
        for dir in dirs.flatten() {
            let dir_path = dir.path();
            if !dir_path.is_dir() {
                continue;
            }
            let Ok(files) = fs::read_dir(&dir_path) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                let is_span = path.extension().is_some_and(|ext| ext == SPAN_EXTENSION);
                if is_span && !referenced.contains(&path) {
                    remove_file_quietly(&path);
                    removed += 1;
                }
            }
            // Only succeeds when the directory is now empty.
            let _ = fs::remove_dir(&dir_path);
        }
        removed
    }

    fn span_file_name(key: &str, position: u64) -> String {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        format!(
            "{}/{}.{}.{}",
            &digest[..KEY_DIR_LEN],
            position,
            Uuid::new_v4().simple(),
            SPAN_EXTENSION
        )
    }

    fn delete_span_file(&self, relative: &str) {
        let path = self.root.join(relative);
        remove_file_quietly(&path);
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir(parent);
        }
    }

    /// Rewrites the index file from the in-memory index.
    fn persist_index(&self) {
        let _guard = self.persist_lock.lock();
        let document = {
            let index = self.index.lock();
            IndexDocument {
                version: INDEX_VERSION,
                spans: index
                    .entries()
                    .map(|entry| SpanRecord {
                        key: entry.span.key.clone(),
                        position: entry.span.position,
                        length: entry.span.length,
                        file: entry.payload.clone(),
                    })
                    .collect(),
            }
        };

        if let Err(e) = self.write_document(&document) {
            warn!(error = %e, "Failed to persist span index");
        }
    }

    fn write_document(&self, document: &IndexDocument) -> Result<()> {
        let json = serde_json::to_vec(document)?;
        let tmp = self.root.join(INDEX_TMP_FILE);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.root.join(INDEX_FILE))?;
        Ok(())
    }
}

impl SpanStore for FileSpanStore {
    fn set_listener(&self, listener: Option<Arc<dyn SpanStoreListener>>) {
        self.listener.set(listener);
        let spans: Vec<CacheSpan> = self
            .index
            .lock()
            .entries()
            .map(|entry| entry.span.clone())
            .collect();
        self.listener.replay(self, &spans);
    }

    fn write(&self, key: &str, position: u64, data: &[u8]) -> Result<CacheSpan> {
        if data.is_empty() {
            return Err(PlaybackError::CacheError(
                "cannot cache an empty span".to_string(),
            ));
        }

        let span = CacheSpan::new(key, position, data.len() as u64);

        let existing = self
            .index
            .lock()
            .get(key, position)
            .filter(|existing| existing.span.length >= span.length)
            .map(|existing| existing.span.clone());
        if let Some(existing) = existing {
            self.listener
                .notify(self, &SpanChange::Touched(existing.clone()));
            return Ok(existing);
        }

        let relative = Self::span_file_name(key, position);
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;

        let (result, changes, stale_file) = {
            let mut index = self.index.lock();
            let raced = index
                .get(key, position)
                .filter(|existing| existing.span.length >= span.length)
                .map(|existing| existing.span.clone());

            match raced {
                // Another writer stored an equal or longer span meanwhile.
                Some(existing) => (
                    existing.clone(),
                    vec![SpanChange::Touched(existing)],
                    Some(relative),
                ),
                None => {
                    let mut changes = Vec::with_capacity(2);
                    let previous = index.insert(span.clone(), relative);
                    let stale = previous.map(|previous| {
                        changes.push(SpanChange::Removed(previous.span));
                        previous.payload
                    });
                    changes.push(SpanChange::Added(span.clone()));
                    (span, changes, stale)
                }
            }
        };

        if let Some(stale) = stale_file {
            self.delete_span_file(&stale);
        }
        if changes
            .iter()
            .any(|change| matches!(change, SpanChange::Added(_)))
        {
            self.persist_index();
        }

        debug!(key, position, length = result.length, "Span written");
        self.listener.notify_all(self, &changes);
        Ok(result)
    }

    fn read(&self, key: &str, position: u64, length: u64) -> Result<Option<Bytes>> {
        let (plan, touched) = {
            let index = self.index.lock();
            let covering = index.contiguous(key, position, length);
            if covering.is_empty() {
                return Ok(None);
            }

            let end = position.saturating_add(length);
            let mut cursor = position;
            let mut plan = Vec::with_capacity(covering.len());
            for entry in &covering {
                let offset = cursor - entry.span.position;
                let stop = entry.span.end().min(end);
                plan.push((self.root.join(&entry.payload), offset, stop - cursor));
                cursor = stop;
            }
            let touched: Vec<SpanChange> = covering
                .iter()
                .map(|entry| SpanChange::Touched(entry.span.clone()))
                .collect();
            (plan, touched)
        };

        let mut out = BytesMut::new();
        for (path, offset, len) in plan {
            match read_range(&path, offset, len, &mut out) {
                Ok(()) => {}
                // Evicted between planning and reading.
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            }
        }

        if out.is_empty() {
            return Ok(None);
        }
        self.listener.notify_all(self, &touched);
        Ok(Some(out.freeze()))
    }

    fn remove_span(&self, span: &CacheSpan) -> Result<()> {
        let removed = {
            let mut index = self.index.lock();
            let matches = index
                .get(&span.key, span.position)
                .is_some_and(|entry| entry.span.length == span.length);
            if !matches {
                return Err(PlaybackError::SpanNotFound {
                    key: span.key.clone(),
                    position: span.position,
                });
            }
            index.remove(&span.key, span.position)
        };

        if let Some(entry) = removed {
            self.delete_span_file(&entry.payload);
        }
        self.persist_index();

        self.listener
            .notify(self, &SpanChange::Removed(span.clone()));
        Ok(())
    }

    fn contains(&self, span: &CacheSpan) -> bool {
        self.index
            .lock()
            .get(&span.key, span.position)
            .is_some_and(|entry| entry.span.length == span.length)
    }

    fn cached_length(&self, key: &str, position: u64, max_length: u64) -> u64 {
        self.index.lock().cached_length(key, position, max_length)
    }

    fn spans(&self, key: &str) -> Vec<CacheSpan> {
        self.index.lock().spans(key)
    }

    fn keys(&self) -> Vec<String> {
        self.index.lock().keys()
    }

    fn total_bytes(&self) -> u64 {
        self.index.lock().total_bytes()
    }

    fn span_count(&self) -> usize {
        self.index.lock().span_count()
    }
}

fn read_range(path: &Path, offset: u64, len: u64, out: &mut BytesMut) -> io::Result<()> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let start = out.len();
    out.resize(start + len as usize, 0);
    if let Err(e) = file.read_exact(&mut out[start..]) {
        out.truncate(start);
        return Err(e);
    }
    Ok(())
}

fn remove_file_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            let name = path.to_string_lossy();
            warn!(file = %strip_path(&name), error = %e, "Failed to delete span file");
        }
    }
}

/// Accepts only plain relative paths so a tampered index cannot point outside the root.
fn is_relative_span_path(file: &str) -> bool {
    let path = Path::new(file);
    !file.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}
