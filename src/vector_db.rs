//! Persistent collection store with exact cosine-similarity search.
//!
//! Every collection lives in one redb database and survives restarts. The
//! first access to a collection in a process loads it into an in-memory
//! snapshot (vectors pre-normalized); queries scan that snapshot in parallel
//! and never touch the disk.
//!
//! Binary format per entry:
//! - 4 bytes: embedding dimension D (u32 LE)
//! - D * 4 bytes: f32 values in native byte order
//! - remaining bytes: the [`Chunk`] as JSON (id, text, provenance, metadata)

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use rayon::prelude::*;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    chunking::Chunk,
    document::{SourceId, SourceType},
    error::{Error, Result},
};

const COLLECTIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("collections");
const ENTRIES: TableDefinition<(&str, u64), &[u8]> =
    TableDefinition::new("entries");
const CHUNK_IDS: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("chunk_ids");

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

/// Per-collection bookkeeping persisted in the `collections` table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct CollectionRecord {
    /// Established by the first indexed vector; `None` while empty.
    dimension: Option<usize>,
    created_at: u64,
    /// Next insertion sequence; never reused, so it doubles as insertion order.
    next_sequence: u64,
}

impl CollectionRecord {
    fn new() -> Self {
        Self {
            dimension: None,
            created_at: now_secs(),
            next_sequence: 0,
        }
    }
}

/// Outcome of an [`VectorDb::index`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub added: usize,
    pub skipped_duplicates: usize,
    /// Stale chunks removed by [`VectorDb::replace_source`].
    pub replaced: usize,
}

/// Summary statistics for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub count: usize,
    pub dimension: Option<usize>,
    /// Creation time as seconds since the Unix epoch.
    pub created_at: u64,
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1, 1]`; higher is more relevant.
    pub score: f32,
}

/// One indexed source, aggregated from its chunks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub source_id: SourceId,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub published: Option<String>,
    pub source: Option<String>,
    pub source_type: SourceType,
    pub chunks: usize,
}

#[derive(Debug, Clone)]
struct CachedEntry {
    sequence: u64,
    /// L2-normalized copy of the stored vector.
    unit: Vec<f32>,
    chunk: Chunk,
}

/// Immutable snapshot of one collection. Writers swap in a new snapshot
/// after commit, so readers see either the old or the new state.
#[derive(Debug)]
struct CollectionState {
    record: CollectionRecord,
    /// Sorted by insertion sequence.
    entries: Vec<CachedEntry>,
}

pub struct VectorDb {
    db: Database,
    cache: RwLock<HashMap<String, Arc<CollectionState>>>,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VectorDb {
    /// Open or create a vector database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use ragdigest::VectorDb;
    ///
    /// let db = VectorDb::open(&tmp.path().join("index.redb")).unwrap();
    /// assert!(db.list_collections().unwrap().is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Database::create(path)?)
    }

    /// Open a database that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(COLLECTIONS)?;
        txn.open_table(ENTRIES)?;
        txn.open_table(CHUNK_IDS)?;
        txn.commit()?;

        Ok(Self {
            db,
            cache: RwLock::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    // -- Collections --

    /// Create an empty collection. Returns `false` if it already existed.
    pub fn create_collection(&self, name: &str) -> Result<bool> {
        let lock = self.collection_lock(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let txn = self.db.begin_write()?;
        let created = {
            let mut collections = txn.open_table(COLLECTIONS)?;
            if collections.get(name)?.is_some() {
                false
            } else {
                let record = CollectionRecord::new();
                collections.insert(name, serde_json::to_vec(&record)?.as_slice())?;
                true
            }
        };
        txn.commit()?;

        if created {
            info!(collection = name, "created collection");
        }
        Ok(created)
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COLLECTIONS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            result.push(k.value().to_string());
        }
        Ok(result)
    }

    pub fn stats(&self, name: &str) -> Result<CollectionStats> {
        let state = self.require_state(name)?;
        Ok(CollectionStats {
            name: name.to_string(),
            count: state.entries.len(),
            dimension: state.record.dimension,
            created_at: state.record.created_at,
        })
    }

    /// Delete a collection and everything in it. Returns `false` if it did
    /// not exist.
    pub fn delete_collection(&self, name: &str) -> Result<bool> {
        let lock = self.collection_lock(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let txn = self.db.begin_write()?;
        let removed = {
            let mut collections = txn.open_table(COLLECTIONS)?;
            let removed = collections.remove(name)?.is_some();
            if removed {
                purge_entries(&txn, name, |_| true)?;
            }
            removed
        };
        txn.commit()?;

        self.cache_write().remove(name);
        if removed {
            info!(collection = name, "deleted collection");
        }
        Ok(removed)
    }

    /// Remove every entry but keep the collection. The dimension is released
    /// so a different embedding provider may be used afterwards.
    pub fn clear_collection(&self, name: &str) -> Result<usize> {
        let lock = self.collection_lock(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let txn = self.db.begin_write()?;
        let removed = {
            let mut collections = txn.open_table(COLLECTIONS)?;
            let mut record = read_record(&collections, name)?
                .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
            let removed = purge_entries(&txn, name, |_| true)?;
            record.dimension = None;
            collections.insert(name, serde_json::to_vec(&record)?.as_slice())?;
            removed
        };
        txn.commit()?;

        self.cache_write().remove(name);
        info!(collection = name, removed, "cleared collection");
        Ok(removed)
    }

    // -- Entries --

    /// Add chunks and their vectors to a collection, creating it if needed.
    ///
    /// Idempotent by chunk id: ids already stored (or repeated within the
    /// batch) are skipped. The whole batch commits in one transaction, so a
    /// failure leaves the collection untouched.
    pub fn index(
        &self,
        name: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<IndexReport> {
        self.write_entries(name, chunks, vectors, false)
    }

    /// Like [`index`](Self::index), but overwrites entries whose chunk id is
    /// already present, keeping their original insertion position.
    pub fn reindex(
        &self,
        name: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<IndexReport> {
        self.write_entries(name, chunks, vectors, true)
    }

    fn write_entries(
        &self,
        name: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        overwrite: bool,
    ) -> Result<IndexReport> {
        if chunks.len() != vectors.len() {
            return Err(Error::InvalidConfiguration(format!(
                "got {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let lock = self.collection_lock(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut report = IndexReport::default();
        let txn = self.db.begin_write()?;
        let (record, written) =
            insert_entries(&txn, name, chunks, vectors, overwrite, &mut report)?;
        txn.commit()?;

        self.apply_to_cache(name, record, written);
        debug!(
            collection = name,
            added = report.added,
            skipped = report.skipped_duplicates,
            "indexed chunks"
        );
        Ok(report)
    }

    /// Store the chunks of one source, replacing what an earlier ingest of
    /// the same source left behind.
    ///
    /// When the stored chunks of `source_id` match `chunks` id for id and
    /// text for text, nothing is written and every chunk counts as a
    /// duplicate. Otherwise the old chunks are removed and the new ones
    /// added in a single transaction, so readers never see a mix of both.
    pub fn replace_source(
        &self,
        name: &str,
        source_id: &SourceId,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<IndexReport> {
        if chunks.len() != vectors.len() {
            return Err(Error::InvalidConfiguration(format!(
                "got {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let lock = self.collection_lock(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let txn = self.db.begin_write()?;
        let stored = source_texts(&txn, name, source_id)?;
        let unchanged = stored.len() == chunks.len()
            && chunks
                .iter()
                .all(|c| stored.get(&c.chunk_id) == Some(&c.text));
        if unchanged && !chunks.is_empty() {
            txn.abort()?;
            return Ok(IndexReport {
                skipped_duplicates: chunks.len(),
                ..IndexReport::default()
            });
        }

        let mut report = IndexReport::default();
        if !stored.is_empty() {
            report.replaced = purge_entries(&txn, name, |c| &c.source_id == source_id)?;
        }
        let (record, written) =
            insert_entries(&txn, name, chunks, vectors, false, &mut report)?;
        txn.commit()?;

        if report.replaced > 0 {
            // Removed sequences are scattered; reload on next access.
            self.cache_write().remove(name);
            info!(
                collection = name,
                source_id = %source_id,
                replaced = report.replaced,
                added = report.added,
                "replaced changed source"
            );
        } else {
            self.apply_to_cache(name, record, written);
        }
        Ok(report)
    }

    /// Remove every chunk of one source. Returns the number of chunks removed.
    pub fn delete_source(&self, name: &str, source_id: &SourceId) -> Result<usize> {
        let lock = self.collection_lock(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let txn = self.db.begin_write()?;
        let removed = {
            let collections = txn.open_table(COLLECTIONS)?;
            if read_record(&collections, name)?.is_none() {
                return Err(Error::CollectionNotFound(name.to_string()));
            }
            purge_entries(&txn, name, |chunk| &chunk.source_id == source_id)?
        };
        txn.commit()?;

        let cached = self.cache_read().get(name).cloned();
        if let Some(state) = cached {
            let entries = state
                .entries
                .iter()
                .filter(|e| &e.chunk.source_id != source_id)
                .cloned()
                .collect();
            self.cache_write().insert(
                name.to_string(),
                Arc::new(CollectionState {
                    record: state.record,
                    entries,
                }),
            );
        }

        info!(collection = name, source_id = %source_id, removed, "deleted source");
        Ok(removed)
    }

    /// List the sources indexed in a collection, in insertion order.
    pub fn list_sources(&self, name: &str) -> Result<Vec<SourceSummary>> {
        let state = self.require_state(name)?;
        let mut order: Vec<SourceSummary> = Vec::new();
        let mut positions: HashMap<&SourceId, usize> = HashMap::new();

        for entry in &state.entries {
            let chunk = &entry.chunk;
            match positions.get(&chunk.source_id) {
                Some(&pos) => order[pos].chunks += 1,
                None => {
                    positions.insert(&chunk.source_id, order.len());
                    order.push(SourceSummary {
                        source_id: chunk.source_id.clone(),
                        title: chunk.metadata.title.clone(),
                        authors: chunk.metadata.authors.clone(),
                        published: chunk.metadata.published.clone(),
                        source: chunk.metadata.source.clone(),
                        source_type: chunk.metadata.source_type,
                        chunks: 1,
                    });
                }
            }
        }

        Ok(order)
    }

    // -- Search --

    /// Return the `k` chunks most similar to `vector` by cosine similarity.
    ///
    /// Results are ordered by descending score; ties go to the chunk indexed
    /// first. `k` larger than the collection returns the whole collection.
    pub fn query(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let state = self.require_state(name)?;

        if let Some(expected) = state.record.dimension
            && expected != vector.len()
        {
            return Err(Error::DimensionMismatch {
                collection: name.to_string(),
                expected,
                actual: vector.len(),
            });
        }

        let query = normalize(vector);
        let mut scored: Vec<(usize, f32)> = state
            .entries
            .par_iter()
            .enumerate()
            .map(|(position, entry)| (position, dot(&query, &entry.unit)))
            .collect();

        // Positions follow insertion order, so they break ties.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| ScoredChunk {
                chunk: state.entries[position].chunk.clone(),
                score: score.clamp(-1.0, 1.0),
            })
            .collect())
    }

    // -- Internals --

    fn collection_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(name.to_string()).or_default().clone()
    }

    fn cache_read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<CollectionState>>> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache_write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<CollectionState>>> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_state(&self, name: &str) -> Result<Arc<CollectionState>> {
        self.load_state(name)?
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Return the cached snapshot, loading it from disk on first access.
    fn load_state(&self, name: &str) -> Result<Option<Arc<CollectionState>>> {
        if let Some(state) = self.cache_read().get(name) {
            return Ok(Some(Arc::clone(state)));
        }

        // Hold the writer lock so a concurrent commit cannot slip between
        // the disk read and the cache insert.
        let lock = self.collection_lock(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = self.cache_read().get(name) {
            return Ok(Some(Arc::clone(state)));
        }

        let txn = self.db.begin_read()?;
        let collections = txn.open_table(COLLECTIONS)?;
        let Some(record) = read_record(&collections, name)? else {
            return Ok(None);
        };

        let table = txn.open_table(ENTRIES)?;
        let mut entries = Vec::new();
        for item in table.range((name, 0u64)..=(name, u64::MAX))? {
            let (key, value) = item?;
            let (_, sequence) = key.value();
            let (vector, chunk) = decode_entry(name, value.value())?;
            entries.push(CachedEntry {
                sequence,
                unit: normalize(&vector),
                chunk,
            });
        }

        debug!(collection = name, count = entries.len(), "loaded collection");
        let state = Arc::new(CollectionState { record, entries });
        self.cache_write()
            .insert(name.to_string(), Arc::clone(&state));
        Ok(Some(state))
    }

    /// Fold freshly committed entries into the cached snapshot, if any.
    ///
    /// Must be called with the collection's writer lock held.
    fn apply_to_cache(
        &self,
        name: &str,
        record: CollectionRecord,
        written: Vec<CachedEntry>,
    ) {
        let cached = self.cache_read().get(name).cloned();
        let Some(state) = cached else {
            // Not loaded yet; the next reader loads the committed state.
            return;
        };

        let mut entries = state.entries.clone();
        for entry in written {
            match entries.binary_search_by_key(&entry.sequence, |e| e.sequence) {
                Ok(pos) => entries[pos] = entry,
                Err(pos) => entries.insert(pos, entry),
            }
        }

        self.cache_write()
            .insert(name.to_string(), Arc::new(CollectionState { record, entries }));
    }
}

impl std::fmt::Debug for VectorDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorDb").finish_non_exhaustive()
    }
}

fn read_record(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    name: &str,
) -> Result<Option<CollectionRecord>> {
    let Some(raw) = table.get(name)? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(raw.value())?))
}

/// Validate every vector against the collection dimension (or the first
/// vector of the batch when the collection has none yet).
fn check_dimensions(
    name: &str,
    established: Option<usize>,
    vectors: &[Vec<f32>],
) -> Result<Option<usize>> {
    let Some(expected) = established.or_else(|| vectors.first().map(Vec::len))
    else {
        return Ok(None);
    };
    if expected == 0 {
        return Err(Error::InvalidConfiguration(
            "embedding vectors must not be empty".to_string(),
        ));
    }

    for vector in vectors {
        if vector.len() != expected {
            return Err(Error::DimensionMismatch {
                collection: name.to_string(),
                expected,
                actual: vector.len(),
            });
        }
    }
    Ok(Some(expected))
}

/// Insert `chunks` into `name` inside an open write transaction, creating
/// the collection if needed. Returns the updated record and the entries
/// written, for the cache.
fn insert_entries(
    txn: &redb::WriteTransaction,
    name: &str,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    overwrite: bool,
    report: &mut IndexReport,
) -> Result<(CollectionRecord, Vec<CachedEntry>)> {
    let mut collections = txn.open_table(COLLECTIONS)?;
    let mut record = read_record(&collections, name)?.unwrap_or_else(CollectionRecord::new);

    let dimension = check_dimensions(name, record.dimension, vectors)?;
    if record.dimension.is_none() {
        record.dimension = dimension;
    }

    let mut entries = txn.open_table(ENTRIES)?;
    let mut ids = txn.open_table(CHUNK_IDS)?;
    let mut seen = HashSet::with_capacity(chunks.len());
    let mut written = Vec::new();

    for (chunk, vector) in chunks.iter().zip(vectors) {
        let id = chunk.chunk_id.as_str();
        if !seen.insert(id) {
            report.skipped_duplicates += 1;
            continue;
        }

        let existing = ids.get((name, id))?.map(|seq| seq.value());
        let sequence = match existing {
            Some(_) if !overwrite => {
                report.skipped_duplicates += 1;
                continue;
            }
            Some(sequence) => sequence,
            None => {
                let sequence = record.next_sequence;
                record.next_sequence += 1;
                ids.insert((name, id), sequence)?;
                sequence
            }
        };

        entries.insert((name, sequence), encode_entry(vector, chunk)?.as_slice())?;
        report.added += 1;
        written.push(CachedEntry {
            sequence,
            unit: normalize(vector),
            chunk: chunk.clone(),
        });
    }

    collections.insert(name, serde_json::to_vec(&record)?.as_slice())?;
    Ok((record, written))
}

/// Chunk id to text for every stored chunk of one source.
fn source_texts(
    txn: &redb::WriteTransaction,
    name: &str,
    source_id: &SourceId,
) -> Result<HashMap<String, String>> {
    let entries = txn.open_table(ENTRIES)?;
    let mut texts = HashMap::new();
    for item in entries.range((name, 0u64)..=(name, u64::MAX))? {
        let (_, value) = item?;
        let (_, chunk) = decode_entry(name, value.value())?;
        if &chunk.source_id == source_id {
            texts.insert(chunk.chunk_id, chunk.text);
        }
    }
    Ok(texts)
}

/// Remove the entries of `name` whose chunk matches `predicate`, along with
/// their id mappings. Returns the number removed.
fn purge_entries(
    txn: &redb::WriteTransaction,
    name: &str,
    predicate: impl Fn(&Chunk) -> bool,
) -> Result<usize> {
    let mut entries = txn.open_table(ENTRIES)?;
    let mut ids = txn.open_table(CHUNK_IDS)?;

    let mut doomed: Vec<(u64, String)> = Vec::new();
    for item in entries.range((name, 0u64)..=(name, u64::MAX))? {
        let (key, value) = item?;
        let (_, sequence) = key.value();
        let (_, chunk) = decode_entry(name, value.value())?;
        if predicate(&chunk) {
            doomed.push((sequence, chunk.chunk_id));
        }
    }

    for (sequence, chunk_id) in &doomed {
        entries.remove((name, *sequence))?;
        ids.remove((name, chunk_id.as_str()))?;
    }

    Ok(doomed.len())
}

fn encode_entry(vector: &[f32], chunk: &Chunk) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(chunk)?;
    let mut buf = Vec::with_capacity(
        HEADER_SIZE + std::mem::size_of_val(vector) + payload.len(),
    );
    buf.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytemuck::cast_slice(vector));
    buf.extend_from_slice(&payload);
    Ok(buf)
}

fn decode_entry(name: &str, bytes: &[u8]) -> Result<(Vec<f32>, Chunk)> {
    let corrupt = |reason: &str| Error::Corrupt {
        collection: name.to_string(),
        reason: reason.to_string(),
    };

    let header: [u8; HEADER_SIZE] = bytes
        .get(..HEADER_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| corrupt("truncated header"))?;
    let dimension = u32::from_le_bytes(header) as usize;
    let vector_end = HEADER_SIZE + dimension * 4;
    let vector_bytes = bytes
        .get(HEADER_SIZE..vector_end)
        .ok_or_else(|| corrupt("truncated vector"))?;

    // Copy out: redb values carry no alignment guarantee for f32.
    let vector: Vec<f32> = bytemuck::pod_collect_to_vec(vector_bytes);
    let chunk: Chunk = serde_json::from_slice(&bytes[vector_end..])?;
    Ok((vector, chunk))
}

fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vec![0.0; vector.len()];
    }
    vector.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Metadata;

    fn test_db() -> (tempfile::TempDir, VectorDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = VectorDb::open(&tmp.path().join("index.redb")).unwrap();
        (tmp, db)
    }

    fn chunk(source: &str, sequence: usize, text: &str) -> Chunk {
        let source_id = SourceId::from(source.to_string());
        Chunk {
            chunk_id: crate::chunking::chunk_id(&source_id, sequence),
            source_id,
            sequence,
            start_offset: 0,
            text: text.to_string(),
            metadata: Metadata {
                title: Some(format!("{source} title")),
                ..Metadata::default()
            },
        }
    }

    #[test]
    fn index_and_query() {
        let (_tmp, db) = test_db();
        let chunks = vec![chunk("a", 0, "alpha"), chunk("a", 1, "beta")];
        let vectors = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];

        let report = db.index("docs", &chunks, &vectors).unwrap();
        assert_eq!(report, IndexReport { added: 2, skipped_duplicates: 0, replaced: 0 });

        let results = db.query("docs", &[0.0, 2.0, 0.0], 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.text, "beta");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn query_normalizes_raw_vectors() {
        let (_tmp, db) = test_db();
        let chunks = vec![chunk("a", 0, "long"), chunk("a", 1, "short")];
        // Same direction, different magnitude: equal cosine score.
        let vectors = vec![vec![10.0, 10.0], vec![0.1, 0.1]];
        db.index("docs", &chunks, &vectors).unwrap();

        let results = db.query("docs", &[1.0, 1.0], 2).unwrap();
        assert!((results[0].score - results[1].score).abs() < 1e-6);
        // Tie goes to the first inserted.
        assert_eq!(results[0].chunk.text, "long");
    }

    #[test]
    fn results_are_sorted_descending() {
        let (_tmp, db) = test_db();
        let chunks: Vec<_> =
            (0..5).map(|i| chunk("s", i, &format!("c{i}"))).collect();
        let vectors = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.7, 0.7],
            vec![-1.0, 0.0],
            vec![0.9, 0.1],
        ];
        db.index("docs", &chunks, &vectors).unwrap();

        let results = db.query("docs", &[1.0, 0.0], 5).unwrap();
        let texts: Vec<_> = results.iter().map(|r| r.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["c0", "c4", "c2", "c1", "c3"]);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn reindexing_same_id_is_a_noop() {
        let (_tmp, db) = test_db();
        let chunks = vec![chunk("a", 0, "alpha")];
        db.index("docs", &chunks, &[vec![1.0, 0.0]]).unwrap();

        let report = db.index("docs", &chunks, &[vec![0.0, 1.0]]).unwrap();
        assert_eq!(report, IndexReport { added: 0, skipped_duplicates: 1, replaced: 0 });
        assert_eq!(db.stats("docs").unwrap().count, 1);

        // The original vector is kept.
        let results = db.query("docs", &[1.0, 0.0], 1).unwrap();
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn duplicate_ids_within_batch_are_skipped() {
        let (_tmp, db) = test_db();
        let chunks = vec![chunk("a", 0, "alpha"), chunk("a", 0, "alpha again")];
        let report = db
            .index("docs", &chunks, &[vec![1.0], vec![2.0]])
            .unwrap();
        assert_eq!(report, IndexReport { added: 1, skipped_duplicates: 1, replaced: 0 });
    }

    #[test]
    fn explicit_reindex_overwrites() {
        let (_tmp, db) = test_db();
        let chunks = vec![chunk("a", 0, "alpha"), chunk("a", 1, "beta")];
        db.index("docs", &chunks, &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();

        let report = db
            .reindex("docs", &chunks[..1], &[vec![0.0, 1.0]])
            .unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(db.stats("docs").unwrap().count, 2);

        // Both now point the same way; the re-embedded chunk keeps its slot.
        let results = db.query("docs", &[0.0, 1.0], 2).unwrap();
        assert_eq!(results[0].chunk.text, "alpha");
        assert!((results[1].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn k_larger_than_collection_is_clamped() {
        let (_tmp, db) = test_db();
        let chunks = vec![chunk("a", 0, "alpha"), chunk("a", 1, "beta")];
        db.index("docs", &chunks, &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        assert_eq!(db.query("docs", &[1.0, 0.0], 10).unwrap().len(), 2);
        assert!(db.query("docs", &[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn query_missing_collection_fails() {
        let (_tmp, db) = test_db();
        assert!(matches!(
            db.query("ghost", &[1.0], 3),
            Err(Error::CollectionNotFound(name)) if name == "ghost"
        ));
        assert!(matches!(db.stats("ghost"), Err(Error::CollectionNotFound(_))));
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let (_tmp, db) = test_db();
        db.index("docs", &[chunk("a", 0, "x")], &[vec![1.0, 0.0]])
            .unwrap();

        let err = db
            .index("docs", &[chunk("a", 1, "y")], &[vec![1.0, 0.0, 0.0]])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch { expected: 2, actual: 3, .. }
        ));
        assert_eq!(db.stats("docs").unwrap().count, 1);

        assert!(matches!(
            db.query("docs", &[1.0], 1),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn mixed_dimensions_in_one_batch_rejected() {
        let (_tmp, db) = test_db();
        let chunks = vec![chunk("a", 0, "x"), chunk("a", 1, "y")];
        let err = db
            .index("docs", &chunks, &[vec![1.0, 0.0], vec![1.0]])
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        // Nothing committed, not even the collection.
        assert!(db.list_collections().unwrap().is_empty());
    }

    #[test]
    fn vector_count_must_match_chunks() {
        let (_tmp, db) = test_db();
        let err = db.index("docs", &[chunk("a", 0, "x")], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn empty_index_creates_collection() {
        let (_tmp, db) = test_db();
        let report = db.index("news", &[], &[]).unwrap();
        assert_eq!(report, IndexReport::default());

        let stats = db.stats("news").unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.dimension, None);
        assert!(db.query("news", &[1.0], 4).unwrap().is_empty());
    }

    #[test]
    fn create_collection_is_idempotent() {
        let (_tmp, db) = test_db();
        assert!(db.create_collection("news").unwrap());
        assert!(!db.create_collection("news").unwrap());
        assert_eq!(db.list_collections().unwrap(), vec!["news".to_string()]);
    }

    #[test]
    fn delete_collection_removes_everything() {
        let (_tmp, db) = test_db();
        db.index("docs", &[chunk("a", 0, "x")], &[vec![1.0]]).unwrap();
        db.index("other", &[chunk("a", 0, "x")], &[vec![1.0]]).unwrap();

        assert!(db.delete_collection("docs").unwrap());
        assert!(!db.delete_collection("docs").unwrap());
        assert!(matches!(db.stats("docs"), Err(Error::CollectionNotFound(_))));

        // Same chunk id in another collection is untouched.
        assert_eq!(db.stats("other").unwrap().count, 1);

        // Recreating starts fresh.
        let report = db.index("docs", &[chunk("a", 0, "x")], &[vec![1.0, 2.0]]).unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(db.stats("docs").unwrap().dimension, Some(2));
    }

    #[test]
    fn clear_collection_keeps_name_and_releases_dimension() {
        let (_tmp, db) = test_db();
        db.index("docs", &[chunk("a", 0, "x")], &[vec![1.0, 0.0]]).unwrap();
        let created_at = db.stats("docs").unwrap().created_at;

        assert_eq!(db.clear_collection("docs").unwrap(), 1);
        let stats = db.stats("docs").unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.dimension, None);
        assert_eq!(stats.created_at, created_at);

        db.index("docs", &[chunk("a", 0, "x")], &[vec![1.0, 0.0, 0.0]])
            .unwrap();
        assert_eq!(db.stats("docs").unwrap().dimension, Some(3));
    }

    #[test]
    fn sources_are_listed_and_deleted() {
        let (_tmp, db) = test_db();
        let chunks = vec![chunk("a", 0, "a0"), chunk("a", 1, "a1"), chunk("b", 0, "b0")];
        db.index("docs", &chunks, &[vec![1.0], vec![1.0], vec![1.0]])
            .unwrap();

        let sources = db.list_sources("docs").unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].source_id.as_str(), "a");
        assert_eq!(sources[0].chunks, 2);
        assert_eq!(sources[0].title.as_deref(), Some("a title"));
        assert_eq!(sources[1].chunks, 1);

        let removed = db
            .delete_source("docs", &SourceId::from("a".to_string()))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(db.stats("docs").unwrap().count, 1);

        // Deleted ids can be indexed again.
        let report = db.index("docs", &chunks[..1], &[vec![1.0]]).unwrap();
        assert_eq!(report.added, 1);
    }

    #[test]
    fn replace_source_swaps_changed_content() {
        let (_tmp, db) = test_db();
        let old = vec![chunk("a", 0, "old zero"), chunk("a", 1, "old one")];
        db.index("docs", &old, &[vec![1.0, 0.0], vec![1.0, 0.0]]).unwrap();
        db.index("docs", &[chunk("b", 0, "other")], &[vec![0.0, 1.0]]).unwrap();

        let source = SourceId::from("a".to_string());
        let same = db
            .replace_source("docs", &source, &old, &[vec![1.0, 0.0], vec![1.0, 0.0]])
            .unwrap();
        assert_eq!(same, IndexReport { added: 0, skipped_duplicates: 2, replaced: 0 });

        let new = vec![
            chunk("a", 0, "new zero"),
            chunk("a", 1, "new one"),
            chunk("a", 2, "new two"),
        ];
        let vectors = vec![vec![1.0, 0.0]; 3];
        let report = db.replace_source("docs", &source, &new, &vectors).unwrap();
        assert_eq!(report, IndexReport { added: 3, skipped_duplicates: 0, replaced: 2 });

        let results = db.query("docs", &[1.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| !r.chunk.text.starts_with("old")));
        // Untouched sources keep their entries.
        assert!(results.iter().any(|r| r.chunk.text == "other"));
    }

    #[test]
    fn replace_source_on_new_source_just_indexes() {
        let (_tmp, db) = test_db();
        let source = SourceId::from("a".to_string());
        let report = db
            .replace_source("docs", &source, &[chunk("a", 0, "x")], &[vec![1.0]])
            .unwrap();
        assert_eq!(report, IndexReport { added: 1, skipped_duplicates: 0, replaced: 0 });
        assert_eq!(db.stats("docs").unwrap().count, 1);
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.redb");
        let mut original = chunk("a", 0, "persisted");
        original.metadata.authors = vec!["Ada".into()];
        original.metadata.extra.insert("lang".into(), "en".into());

        {
            let db = VectorDb::open(&path).unwrap();
            db.index("docs", &[original.clone()], &[vec![0.25, -1.5, 3.0]])
                .unwrap();
        }

        {
            let db = VectorDb::open(&path).unwrap();
            let stats = db.stats("docs").unwrap();
            assert_eq!(stats.count, 1);
            assert_eq!(stats.dimension, Some(3));

            let results = db.query("docs", &[0.25, -1.5, 3.0], 1).unwrap();
            assert_eq!(results[0].chunk, original);
            assert!((results[0].score - 1.0).abs() < 1e-6);

            // Idempotency survives the restart too.
            let report = db.index("docs", &[original], &[vec![1.0, 1.0, 1.0]]).unwrap();
            assert_eq!(report.skipped_duplicates, 1);
        }
    }

    #[test]
    fn entry_encoding_roundtrip() {
        let original = chunk("a", 3, "text");
        let vector = vec![0.5, -0.25, 8.0];
        let bytes = encode_entry(&vector, &original).unwrap();
        let (decoded_vector, decoded_chunk) = decode_entry("docs", &bytes).unwrap();
        assert_eq!(decoded_vector, vector);
        assert_eq!(decoded_chunk, original);

        assert!(matches!(
            decode_entry("docs", &bytes[..6]),
            Err(Error::Corrupt { .. })
        ));
    }

    #[test]
    fn concurrent_index_of_same_chunk_stores_one_entry() {
        let (_tmp, db) = test_db();
        let db = Arc::new(db);
        let original = chunk("a", 0, "race");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                let c = original.clone();
                std::thread::spawn(move || db.index("docs", &[c], &[vec![1.0, 0.0]]).unwrap())
            })
            .collect();
        let added: usize = handles.into_iter().map(|h| h.join().unwrap().added).sum();

        assert_eq!(added, 1);
        assert_eq!(db.stats("docs").unwrap().count, 1);
    }

    #[test]
    fn concurrent_queries_see_whole_batches() {
        let (_tmp, db) = test_db();
        let db = Arc::new(db);
        db.index("docs", &[chunk("seed", 0, "seed")], &[vec![1.0]]).unwrap();

        let writer = {
            let db = Arc::clone(&db);
            std::thread::spawn(move || {
                for batch in 0..20 {
                    let chunks: Vec<_> = (0..5)
                        .map(|i| chunk(&format!("b{batch}"), i, "x"))
                        .collect();
                    db.index("docs", &chunks, &vec![vec![1.0]; 5]).unwrap();
                }
            })
        };

        for _ in 0..50 {
            let n = db.query("docs", &[1.0], 1000).unwrap().len();
            // Seed plus whole batches of five, never a partial batch.
            assert_eq!((n - 1) % 5, 0, "saw partial batch: {n}");
        }
        writer.join().unwrap();
        assert_eq!(db.stats("docs").unwrap().count, 101);
    }

    #[test]
    fn in_memory_database_works() {
        let db = VectorDb::open_in_memory().unwrap();
        db.index("docs", &[chunk("a", 0, "x")], &[vec![1.0]]).unwrap();
        assert_eq!(db.stats("docs").unwrap().count, 1);
    }
}
