// ABOUTME: SQLite-backed record store, one table per collection rendered from its schema.
// ABOUTME: Inserts run in a single transaction covering the reference check, the write and the read-back validation.

use std::collections::HashMap;
use std::path::Path;

use pgwarden_core::{FieldKind, Record, RecordId, Schema, ValidationError, decode_row, encode_draft};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::{RecordStore, StoreError};

/// Record store persisted in a SQLite database.
pub struct SqliteStore {
    conn: Connection,
    schemas: HashMap<&'static str, &'static Schema>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // Committed rows must land in the main file: `state push` uploads only that file.
        conn.execute_batch("PRAGMA journal_mode=DELETE;")?;
        Self::with_connection(conn)
    }

    /// An in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            schemas: HashMap::new(),
        })
    }

    fn schema_for<R: Record>(&self) -> Result<&'static Schema, StoreError> {
        let schema = R::schema();
        if self.schemas.contains_key(schema.collection) {
            Ok(schema)
        } else {
            Err(StoreError::UndefinedCollection(schema.collection))
        }
    }

    fn select_sql(schema: &Schema) -> String {
        let columns: Vec<&str> = schema.fields.iter().map(|f| f.name).collect();
        format!("SELECT {} FROM {}", columns.join(", "), schema.collection)
    }
}

/// Render the `CREATE TABLE` statement for a schema.
fn create_table_sql(schema: &Schema, schemas: &HashMap<&'static str, &'static Schema>) -> String {
    let columns: Vec<String> = schema
        .fields
        .iter()
        .map(|field| match field.kind {
            FieldKind::PrimaryKey => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", field.name),
            FieldKind::ForeignKey {
                references,
                nullable,
            } => {
                let target_key = schemas
                    .get(references)
                    .map(|s| s.primary_key())
                    .unwrap_or("id");
                format!(
                    "{} INTEGER{} REFERENCES {references}({target_key})",
                    field.name,
                    if nullable { "" } else { " NOT NULL" }
                )
            }
            FieldKind::Bytes | FieldKind::Timestamp => format!("{} INTEGER NOT NULL", field.name),
            FieldKind::AbsolutePath => format!("{} TEXT NOT NULL", field.name),
            FieldKind::FixedText(len) => format!("{} VARCHAR({len}) NOT NULL", field.name),
        })
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        schema.collection,
        columns.join(",\n    ")
    )
}

fn to_sql(collection: &'static str, field: &'static str, value: &Value) -> Result<SqlValue, ValidationError> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .ok_or_else(|| ValidationError::InvalidField {
                collection,
                field,
                reason: "must be an integer".to_string(),
            }),
        _ => Err(ValidationError::InvalidField {
            collection,
            field,
            reason: "has no column representation".to_string(),
        }),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        // Reals never pass validation; keep them so the error names the field.
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn read_row(schema: &Schema, row: &Row<'_>) -> rusqlite::Result<Map<String, Value>> {
    let mut map = Map::new();
    for (i, field) in schema.fields.iter().enumerate() {
        map.insert(field.name.to_string(), from_sql(row.get_ref(i)?));
    }
    Ok(map)
}

impl RecordStore for SqliteStore {
    fn define(&mut self, schema: &'static Schema) -> Result<(), StoreError> {
        if self.schemas.contains_key(schema.collection) {
            return Ok(());
        }
        let sql = create_table_sql(schema, &self.schemas);
        self.conn.execute_batch(&sql)?;
        self.schemas.insert(schema.collection, schema);
        debug!(collection = schema.collection, "defined sqlite collection");
        Ok(())
    }

    fn insert<R: Record>(&mut self, draft: &R::Draft) -> Result<R, StoreError> {
        let schema = self.schema_for::<R>()?;
        let mut columns = encode_draft::<R>(draft)?;

        let tx = self.conn.transaction()?;

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
            let exists: bool = tx.query_row(
                &format!(
                    "SELECT EXISTS(SELECT 1 FROM {references} WHERE {} = ?1)",
                    target.primary_key()
                ),
                params![id],
                |row| row.get(0),
            )?;
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

        let names: Vec<&'static str> = schema.insert_fields().map(|f| f.name).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let values = names
            .iter()
            .map(|name| match columns.get(*name) {
                Some(value) => to_sql(schema.collection, *name, value),
                None => Ok(SqlValue::Null),
            })
            .collect::<Result<Vec<_>, _>>()?;

        tx.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({})",
                schema.collection,
                names.join(", "),
                placeholders.join(", ")
            ),
            params_from_iter(values.iter()),
        )?;
        let id = tx.last_insert_rowid();

        columns.insert(schema.primary_key().to_string(), Value::Number(id.into()));
        let record = decode_row::<R>(&columns)?;

        tx.commit()?;
        debug!(collection = schema.collection, id, "inserted record");
        Ok(record)
    }

    fn fetch_all<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let schema = self.schema_for::<R>()?;
        let mut stmt = self.conn.prepare(&format!(
            "{} ORDER BY {} ASC",
            Self::select_sql(schema),
            schema.primary_key()
        ))?;
        let rows = stmt.query_map([], |row| read_row(schema, row))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(decode_row::<R>(&row?)?);
        }
        Ok(records)
    }

    fn fetch_by_id<R: Record>(&self, id: RecordId) -> Result<Option<R>, StoreError> {
        let schema = self.schema_for::<R>()?;
        let row = self
            .conn
            .query_row(
                &format!(
                    "{} WHERE {} = ?1",
                    Self::select_sql(schema),
                    schema.primary_key()
                ),
                params![id],
                |row| read_row(schema, row),
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(decode_row::<R>(&row)?)),
            None => Ok(None),
        }
    }

    fn fetch_latest_by<R: Record>(&self, field: &str) -> Result<Option<R>, StoreError> {
        let schema = self.schema_for::<R>()?;
        let field = schema.require_field(field)?;
        let row = self
            .conn
            .query_row(
                &format!(
                    "{} ORDER BY {} DESC, {} DESC LIMIT 1",
                    Self::select_sql(schema),
                    field.name,
                    schema.primary_key()
                ),
                [],
                |row| read_row(schema, row),
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(decode_row::<R>(&row)?)),
            None => Ok(None),
        }
    }
}
