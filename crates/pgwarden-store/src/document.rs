// ABOUTME: Record store kept as a single JSON document holding every collection.
// ABOUTME: Writes are revision-checked against the file on disk and replaced atomically via temp file and rename.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use pgwarden_core::{FieldKind, Record, RecordId, Schema, ValidationError, decode_row, encode_draft};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{RecordStore, StoreError};

const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    revision: u64,
    #[serde(default)]
    collections: BTreeMap<String, CollectionData>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            revision: 0,
            collections: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CollectionData {
    /// Highest id ever allocated in this collection.
    sequence: RecordId,
    records: Vec<Map<String, Value>>,
}

/// Only the header, read before every write to detect concurrent writers.
#[derive(Deserialize)]
struct RevisionHeader {
    revision: u64,
}

/// Record store persisted as one JSON document.
pub struct DocumentStore {
    path: PathBuf,
    doc: StateDocument,
    schemas: HashMap<&'static str, &'static Schema>,
}

impl DocumentStore {
    /// Load the document at `path`, or start an empty one if it does not exist yet.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let doc = load(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            doc,
            schemas: HashMap::new(),
        })
    }

    /// Revision of the document as last loaded or written by this handle.
    pub fn revision(&self) -> u64 {
        self.doc.revision
    }

    /// Re-read the document from disk, discarding what this handle loaded earlier.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        self.doc = load(&self.path)?;
        Ok(())
    }

    fn schema_for<R: Record>(&self) -> Result<&'static Schema, StoreError> {
        let schema = R::schema();
        if self.schemas.contains_key(schema.collection) {
            Ok(schema)
        } else {
            Err(StoreError::UndefinedCollection(schema.collection))
        }
    }

    fn rows(&self, collection: &str) -> &[Map<String, Value>] {
        self.doc
            .collections
            .get(collection)
            .map(|c| c.records.as_slice())
            .unwrap_or(&[])
    }

    fn disk_revision(&self) -> Result<u64, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str::<RevisionHeader>(&contents)?.revision),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

fn load(path: &Path) -> Result<StateDocument, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StateDocument::default()),
        Err(e) => return Err(e.into()),
    };
    let doc: StateDocument = serde_json::from_str(&contents)?;
    if doc.version != DOCUMENT_VERSION {
        return Err(StoreError::UnsupportedVersion(doc.version));
    }
    Ok(doc)
}

/// Write the document using atomic write (write to .tmp, fsync, rename, fsync dir).
fn write_atomic(path: &Path, doc: &StateDocument) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state.json".to_string());
    let tmp_path = dir.join(format!("{file_name}.tmp"));

    let json = serde_json::to_string_pretty(doc)?;
    let mut file = File::create(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    File::open(&dir)?.sync_all()?;
    Ok(())
}

/// Ordering used by `fetch_latest_by`, matching SQLite's: null first, then
/// integers, then text compared bytewise.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            _ => 3,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        _ => rank(a).cmp(&rank(b)),
    }
}

impl RecordStore for DocumentStore {
    fn define(&mut self, schema: &'static Schema) -> Result<(), StoreError> {
        self.schemas.entry(schema.collection).or_insert(schema);
        debug!(collection = schema.collection, "defined document collection");
        Ok(())
    }

    fn insert<R: Record>(&mut self, draft: &R::Draft) -> Result<R, StoreError> {
        let schema = self.schema_for::<R>()?;
        let mut columns = encode_draft::<R>(draft)?;

        for field in schema.insert_fields() {
            let FieldKind::ForeignKey { references, .. } = field.kind else {
                continue;
            };
            let Some(id) = columns.get(field.name).and_then(Value::as_i64) else {
                continue;
            };
            let target = self
                .schemas
                .get(references)
                .ok_or(StoreError::UndefinedCollection(references))?;
            let key = target.primary_key();
            let exists = self
                .rows(references)
                .iter()
                .any(|row| row.get(key).and_then(Value::as_i64) == Some(id));
            if !exists {
                return Err(ValidationError::DanglingReference {
                    collection: schema.collection,
                    field: field.name,
                    references,
                    id,
                }
                .into());
            }
        }

        let found = self.disk_revision()?;
        if found != self.doc.revision {
            return Err(StoreError::Conflict {
                expected: self.doc.revision,
                found,
            });
        }

        let mut next = self.doc.clone();
        let collection = next
            .collections
            .entry(schema.collection.to_string())
            .or_default();
        let highest = collection
            .records
            .iter()
            .filter_map(|row| row.get(schema.primary_key()).and_then(Value::as_i64))
            .max()
            .unwrap_or(0);
        let id = collection.sequence.max(highest) + 1;

        columns.insert(schema.primary_key().to_string(), Value::Number(id.into()));
        let record = decode_row::<R>(&columns)?;

        collection.sequence = id;
        collection.records.push(columns);
        next.revision += 1;

        write_atomic(&self.path, &next)?;
        self.doc = next;
        debug!(
            collection = schema.collection,
            id,
            revision = self.doc.revision,
            "inserted record"
        );
        Ok(record)
    }

    fn fetch_all<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let schema = self.schema_for::<R>()?;
        self.rows(schema.collection)
            .iter()
            .map(|row| decode_row::<R>(row).map_err(StoreError::from))
            .collect()
    }

    fn fetch_by_id<R: Record>(&self, id: RecordId) -> Result<Option<R>, StoreError> {
        let schema = self.schema_for::<R>()?;
        let key = schema.primary_key();
        match self
            .rows(schema.collection)
            .iter()
            .find(|row| row.get(key).and_then(Value::as_i64) == Some(id))
        {
            Some(row) => Ok(Some(decode_row::<R>(row)?)),
            None => Ok(None),
        }
    }

    fn fetch_latest_by<R: Record>(&self, field: &str) -> Result<Option<R>, StoreError> {
        let schema = self.schema_for::<R>()?;
        let field = schema.require_field(field)?;

        // Rows are kept in insertion order, so `>=` lets the later row win a tie.
        let mut best: Option<&Map<String, Value>> = None;
        for row in self.rows(schema.collection) {
            let candidate = row.get(field.name).unwrap_or(&Value::Null);
            let replace = match best {
                None => true,
                Some(current) => {
                    let current = current.get(field.name).unwrap_or(&Value::Null);
                    compare_values(candidate, current) != Ordering::Less
                }
            };
            if replace {
                best = Some(row);
            }
        }

        match best {
            Some(row) => Ok(Some(decode_row::<R>(row)?)),
            None => Ok(None),
        }
    }
}
