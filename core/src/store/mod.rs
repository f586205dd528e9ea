/// Document store: schema-flexible JSON documents in sled, with live queries
///
/// Documents live under a collection path (`conversations`, or a nested
/// `conversations/<id>/messages`) and are keyed `<path>\0<id>` in one sled tree,
/// so a single sled batch can touch several collections atomically.
pub mod query;
pub mod subscription;

pub use query::{Direction, Filter, Limit, Query};
pub use subscription::Subscription;

use crate::clock::{ServerClock, Timestamp};
use crate::config::Config;
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SERVER_TIMESTAMP_KEY: &str = "$serverTimestamp";
const CLOCK_KEY: &[u8] = b"\x01clock";

/// Sentinel resolved by the store to the write's server timestamp
pub fn server_timestamp() -> Value {
    json!({ SERVER_TIMESTAMP_KEY: true })
}

/// One document as returned by reads and queries
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    /// Insertion sequence assigned by the store; breaks ordering ties
    pub seq: u64,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDoc {
    seq: u64,
    data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
}

/// Change notification broadcast to live queries
#[derive(Debug, Clone)]
pub struct Change {
    pub path: String,
    pub id: String,
    pub kind: ChangeKind,
}

/// Partial field merge. Missing intermediate objects are created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    fields: Vec<(Vec<String>, Value)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a dotted field path, e.g. `lastMessage.text`
    pub fn set(mut self, field: &str, value: Value) -> Self {
        let segments = field.split('.').map(str::to_string).collect();
        self.fields.push((segments, value));
        self
    }

    /// Set a field path given as explicit segments (for keys that may contain dots)
    pub fn set_path(mut self, segments: &[&str], value: Value) -> Self {
        self.fields
            .push((segments.iter().map(|s| s.to_string()).collect(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn apply(self, data: &mut Value, now: Timestamp) {
        for (segments, mut value) in self.fields {
            resolve_server_timestamps(&mut value, now);
            set_field(data, &segments, value);
        }
    }
}

enum WriteOp {
    Create { path: String, id: String, data: Value },
    Update { path: String, id: String, update: Update },
}

/// Writes applied all-or-nothing by `DocumentStore::commit`
#[derive(Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a document creation; returns the id it will be stored under
    pub fn create(&mut self, path: &str, data: Value) -> String {
        let id = generate_doc_id();
        self.ops.push(WriteOp::Create {
            path: path.to_string(),
            id: id.clone(),
            data,
        });
        id
    }

    pub fn update(&mut self, path: &str, id: &str, update: Update) -> &mut Self {
        self.ops.push(WriteOp::Update {
            path: path.to_string(),
            id: id.to_string(),
            update,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Document store backed by sled embedded database
#[derive(Clone)]
pub struct DocumentStore {
    db: sled::Db,
    clock: Arc<ServerClock>,
    changes: broadcast::Sender<Change>,
    write_lock: Arc<Mutex<()>>,
    flush_on_write: bool,
}

impl DocumentStore {
    /// Open the store described by `config` (temporary when no data dir is set)
    pub fn open(config: &Config) -> Result<Self> {
        let db = match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let db_path = dir.join("documents.db");
                debug!("Opening document store at {:?}", db_path);
                sled::open(&db_path)
            }
            None => sled::Config::new().temporary(true).open(),
        }
        .map_err(|e| ChatError::Storage(format!("Failed to open document store: {}", e)))?;

        let floor = match db
            .get(CLOCK_KEY)
            .map_err(|e| ChatError::Storage(format!("Failed to read clock: {}", e)))?
        {
            Some(raw) => {
                let bytes = <[u8; 8]>::try_from(&raw[..]).map_err(|_| {
                    ChatError::Storage("Corrupt clock entry in document store".to_string())
                })?;
                Timestamp::from_micros(i64::from_be_bytes(bytes))
            }
            None => Timestamp::from_micros(0),
        };

        let (changes, _) = broadcast::channel(config.subscription_buffer.max(1));
        info!(
            "Document store opened ({})",
            match &config.data_dir {
                Some(dir) => dir.display().to_string(),
                None => "in-memory".to_string(),
            }
        );

        Ok(Self {
            db,
            clock: Arc::new(ServerClock::starting_after(floor)),
            changes,
            write_lock: Arc::new(Mutex::new(())),
            flush_on_write: config.flush_on_write,
        })
    }

    /// Temporary store with default settings
    pub fn in_memory() -> Result<Self> {
        Self::open(&Config::in_memory())
    }

    /// Current server time (the stamp of the next write is strictly later)
    pub fn server_now(&self) -> Timestamp {
        self.clock.last()
    }

    /// Create a document with a store-assigned id
    pub fn create(&self, path: &str, data: Value) -> Result<String> {
        let mut batch = WriteBatch::new();
        let id = batch.create(path, data);
        self.commit(batch)?;
        Ok(id)
    }

    /// Create a document under a caller-chosen id. Returns false (and writes
    /// nothing) when the document already exists.
    pub fn create_if_absent(&self, path: &str, id: &str, data: Value) -> Result<bool> {
        validate_id(id)?;
        let _guard = self.lock()?;
        if self.load(&doc_key(path, id)?)?.is_some() {
            return Ok(false);
        }
        self.apply_locked(vec![WriteOp::Create {
            path: path.to_string(),
            id: id.to_string(),
            data,
        }])?;
        Ok(true)
    }

    /// Merge fields into an existing document
    pub fn update(&self, path: &str, id: &str, update: Update) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.update(path, id, update);
        self.commit(batch)
    }

    /// Apply every write in the batch, or none of them
    pub fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let _guard = self.lock()?;
        self.apply_locked(batch.ops)
    }

    pub fn get(&self, path: &str, id: &str) -> Result<Option<Document>> {
        Ok(self.load(&doc_key(path, id)?)?.map(|stored| Document {
            id: id.to_string(),
            seq: stored.seq,
            data: stored.data,
        }))
    }

    /// One-shot query
    pub fn query(&self, query: &Query) -> Result<Vec<Document>> {
        Ok(query.apply(self.scan(&query.path)?))
    }

    /// Number of documents in a collection
    pub fn count(&self, path: &str) -> Result<usize> {
        Ok(self.scan(path)?.len())
    }

    /// Live query yielding raw document snapshots
    pub fn watch(&self, query: Query) -> Result<Subscription<Vec<Document>>> {
        self.watch_map(query, Ok)
    }

    /// Live query: emits the current result, then a new snapshot every time a
    /// change in the query's collection alters the result. `map` turns each
    /// snapshot into the caller's view; a snapshot that fails to map is logged
    /// and skipped, so consumers stay on their last good state.
    ///
    /// Fails with `ChatError::Config` outside a Tokio runtime.
    pub fn watch_map<T, F>(&self, query: Query, map: F) -> Result<Subscription<T>>
    where
        T: Send + 'static,
        F: Fn(Vec<Document>) -> Result<T> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ChatError::Config(format!(
                "live query on {} needs a running Tokio runtime",
                query.path
            ))
        })?;

        // Subscribe before the first read so no change slips in between
        let mut changes = self.changes.subscribe();
        let initial = self.query(&query)?;
        let (tx, rx) = mpsc::unbounded_channel();

        match map(initial.clone()) {
            Ok(view) => {
                let _ = tx.send(view);
            }
            Err(e) => error!("Live query on {} produced an unreadable snapshot: {}", query.path, e),
        }

        let store = self.clone();
        let task = runtime.spawn(async move {
            let mut last = initial;
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    change = changes.recv() => match change {
                        Ok(change) if change.path != query.path => continue,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Live query on {} lagged {} changes, re-reading", query.path, n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }

                let snapshot = match store.query(&query) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        error!("Live query on {} failed: {}", query.path, e);
                        continue;
                    }
                };
                if snapshot == last {
                    continue;
                }
                match map(snapshot.clone()) {
                    Ok(view) => {
                        if tx.send(view).is_err() {
                            break;
                        }
                        last = snapshot;
                    }
                    Err(e) => {
                        error!("Live query on {} produced an unreadable snapshot: {}", query.path, e)
                    }
                }
            }
            debug!("Live query on {} stopped", query.path);
        });

        Ok(Subscription::new(rx, task))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| ChatError::Storage("document store write lock poisoned".to_string()))
    }

    fn apply_locked(&self, ops: Vec<WriteOp>) -> Result<()> {
        let now = self.clock.now();
        let mut staged: HashMap<Vec<u8>, StoredDoc> = HashMap::new();
        let mut changes = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                WriteOp::Create { path, id, mut data } => {
                    let key = doc_key(&path, &id)?;
                    if !data.is_object() {
                        return Err(ChatError::InvalidArgument(format!(
                            "document {}/{} must be a JSON object",
                            path, id
                        )));
                    }
                    if staged.contains_key(&key) || self.load(&key)?.is_some() {
                        return Err(ChatError::Storage(format!(
                            "document {}/{} already exists",
                            path, id
                        )));
                    }
                    resolve_server_timestamps(&mut data, now);
                    let seq = self
                        .db
                        .generate_id()
                        .map_err(|e| ChatError::Storage(format!("Failed to assign seq: {}", e)))?;
                    staged.insert(key, StoredDoc { seq, data });
                    changes.push(Change { path, id, kind: ChangeKind::Added });
                }
                WriteOp::Update { path, id, update } => {
                    let key = doc_key(&path, &id)?;
                    let mut doc = match staged.remove(&key) {
                        Some(doc) => doc,
                        None => self
                            .load(&key)?
                            .ok_or_else(|| ChatError::NotFound(format!("{}/{}", path, id)))?,
                    };
                    update.apply(&mut doc.data, now);
                    staged.insert(key, doc);
                    changes.push(Change { path, id, kind: ChangeKind::Modified });
                }
            }
        }

        let mut batch = sled::Batch::default();
        for (key, doc) in &staged {
            batch.insert(key.as_slice(), serde_json::to_vec(doc)?);
        }
        batch.insert(CLOCK_KEY, &now.as_micros().to_be_bytes()[..]);

        self.db
            .apply_batch(batch)
            .map_err(|e| ChatError::Storage(format!("Failed to apply writes: {}", e)))?;

        for change in changes {
            debug!("{:?} {}/{}", change.kind, change.path, change.id);
            // No live queries is fine
            let _ = self.changes.send(change);
        }

        // The batch is applied; a failed flush only delays durability
        if self.flush_on_write {
            if let Err(e) = self.db.flush() {
                warn!("Failed to flush document store: {}", e);
            }
        }
        Ok(())
    }

    fn load(&self, key: &[u8]) -> Result<Option<StoredDoc>> {
        match self
            .db
            .get(key)
            .map_err(|e| ChatError::Storage(format!("Failed to read document: {}", e)))?
        {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, path: &str) -> Result<Vec<Document>> {
        validate_path(path)?;
        let prefix = format!("{}\0", path);
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, raw) =
                entry.map_err(|e| ChatError::Storage(format!("Failed to scan {}: {}", path, e)))?;
            let stored: StoredDoc = serde_json::from_slice(&raw)?;
            let id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            out.push(Document {
                id,
                seq: stored.seq,
                data: stored.data,
            });
        }
        Ok(out)
    }
}

fn generate_doc_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn validate_path(path: &str) -> Result<()> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty() || s.contains('\0'))
        || segments.len() % 2 == 0
        || path.starts_with('\x01')
    {
        return Err(ChatError::InvalidArgument(format!(
            "invalid collection path {:?}",
            path
        )));
    }
    Ok(())
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id.contains('\0') {
        return Err(ChatError::InvalidArgument(format!(
            "invalid document id {:?}",
            id
        )));
    }
    Ok(())
}

fn doc_key(path: &str, id: &str) -> Result<Vec<u8>> {
    validate_path(path)?;
    validate_id(id)?;
    Ok(format!("{}\0{}", path, id).into_bytes())
}

fn is_server_timestamp(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.len() == 1 && map.contains_key(SERVER_TIMESTAMP_KEY))
}

fn resolve_server_timestamps(value: &mut Value, now: Timestamp) {
    if is_server_timestamp(value) {
        *value = json!(now.as_micros());
        return;
    }
    match value {
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| resolve_server_timestamps(v, now)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| resolve_server_timestamps(v, now)),
        _ => {}
    }
}

fn set_field(data: &mut Value, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut cursor = data;
    for segment in parents {
        if !cursor.is_object() {
            *cursor = json!({});
        }
        cursor = match cursor {
            Value::Object(map) => map.entry(segment.clone()).or_insert_with(|| json!({})),
            _ => return,
        };
    }
    if !cursor.is_object() {
        *cursor = json!({});
    }
    if let Value::Object(map) = cursor {
        map.insert(last.clone(), value);
    }
}
