// ABOUTME: Declarative collection schemas with per-field validation rules.
// ABOUTME: The same rules run on every write and every read so corrupted rows are caught at the storage edge.

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised when a record or row fails schema or invariant checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{collection}.{field} is required")]
    MissingField {
        collection: &'static str,
        field: &'static str,
    },

    #[error("{collection} has no field named {field}")]
    UnknownField {
        collection: &'static str,
        field: String,
    },

    #[error("{collection}.{field} {reason}")]
    InvalidField {
        collection: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("{collection}.{field} references missing {references} record {id}")]
    DanglingReference {
        collection: &'static str,
        field: &'static str,
        references: &'static str,
        id: i64,
    },

    #[error("{collection} record is malformed: {reason}")]
    Malformed {
        collection: &'static str,
        reason: String,
    },

    #[error("{collection} invariant violated: {reason}")]
    Invariant {
        collection: &'static str,
        reason: String,
    },
}

/// The storage type and validation rule of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Store-allocated identifier, integer >= 1.
    PrimaryKey,
    /// Reference to the id of a record in another (or the same) collection.
    ForeignKey {
        references: &'static str,
        nullable: bool,
    },
    /// Non-negative byte count.
    Bytes,
    /// Milliseconds since the Unix epoch.
    Timestamp,
    /// Non-empty absolute path or object key; trailing slashes are stripped.
    AbsolutePath,
    /// String of exactly this many characters.
    FixedText(usize),
}

/// A named field within a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// A collection definition: its name and the ordered list of its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    pub collection: &'static str,
    pub fields: &'static [FieldSpec],
}

impl Schema {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by name, reporting an unknown field as a validation error.
    pub fn require_field(&self, name: &str) -> Result<&FieldSpec, ValidationError> {
        self.field(name).ok_or_else(|| ValidationError::UnknownField {
            collection: self.collection,
            field: name.to_string(),
        })
    }

    /// Name of the primary key field.
    pub fn primary_key(&self) -> &'static str {
        self.fields
            .iter()
            .find(|f| f.kind == FieldKind::PrimaryKey)
            .map(|f| f.name)
            .unwrap_or("id")
    }

    /// All fields except the primary key, in declaration order.
    pub fn insert_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(|f| f.kind != FieldKind::PrimaryKey)
    }

    /// Validate a draft record (no primary key) and return its normalized columns.
    pub fn validate_draft(&self, draft: &Value) -> Result<Map<String, Value>, ValidationError> {
        let object = draft.as_object().ok_or_else(|| ValidationError::Malformed {
            collection: self.collection,
            reason: "expected an object".to_string(),
        })?;
        self.validate(object, false)
    }

    /// Validate a persisted row (primary key included) and return its normalized columns.
    pub fn validate_row(&self, row: &Map<String, Value>) -> Result<Map<String, Value>, ValidationError> {
        self.validate(row, true)
    }

    fn validate(
        &self,
        object: &Map<String, Value>,
        with_id: bool,
    ) -> Result<Map<String, Value>, ValidationError> {
        if let Some(unknown) = object.keys().find(|k| self.field(k).is_none()) {
            return Err(ValidationError::UnknownField {
                collection: self.collection,
                field: unknown.clone(),
            });
        }

        let mut normalized = Map::new();
        for spec in self.fields {
            if spec.kind == FieldKind::PrimaryKey && !with_id {
                if object.get(spec.name).is_some_and(|v| !v.is_null()) {
                    return Err(ValidationError::InvalidField {
                        collection: self.collection,
                        field: spec.name,
                        reason: "is allocated by the store and must not be supplied".to_string(),
                    });
                }
                continue;
            }

            let value = object.get(spec.name).cloned().unwrap_or(Value::Null);
            let value = spec
                .kind
                .normalize(value)
                .map_err(|problem| match problem {
                    FieldProblem::Missing => ValidationError::MissingField {
                        collection: self.collection,
                        field: spec.name,
                    },
                    FieldProblem::Invalid(reason) => ValidationError::InvalidField {
                        collection: self.collection,
                        field: spec.name,
                        reason,
                    },
                })?;
            normalized.insert(spec.name.to_string(), value);
        }

        Ok(normalized)
    }
}

enum FieldProblem {
    Missing,
    Invalid(String),
}

impl FieldKind {
    fn normalize(&self, value: Value) -> Result<Value, FieldProblem> {
        match self {
            FieldKind::ForeignKey { nullable: true, .. } if value.is_null() => Ok(Value::Null),
            _ if value.is_null() => Err(FieldProblem::Missing),
            FieldKind::PrimaryKey | FieldKind::ForeignKey { .. } => match value.as_i64() {
                Some(id) if id >= 1 => Ok(value),
                _ => Err(FieldProblem::Invalid("must be an integer >= 1".to_string())),
            },
            FieldKind::Bytes => match value.as_i64() {
                Some(n) if n >= 0 => Ok(value),
                _ => Err(FieldProblem::Invalid("must be a non-negative integer".to_string())),
            },
            FieldKind::Timestamp => match value.as_i64() {
                Some(_) => Ok(value),
                None => Err(FieldProblem::Invalid(
                    "must be milliseconds since the epoch".to_string(),
                )),
            },
            FieldKind::AbsolutePath => {
                let Some(path) = value.as_str() else {
                    return Err(FieldProblem::Invalid("must be a string".to_string()));
                };
                if path.is_empty() {
                    return Err(FieldProblem::Invalid("cannot be empty".to_string()));
                }
                if !path.starts_with('/') {
                    return Err(FieldProblem::Invalid("must be an absolute path".to_string()));
                }
                let trimmed = path.trim_end_matches('/');
                let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
                Ok(Value::String(trimmed.to_string()))
            }
            FieldKind::FixedText(len) => match value.as_str() {
                Some(text) if text.chars().count() == *len => Ok(value),
                Some(_) => Err(FieldProblem::Invalid(format!(
                    "must be exactly {len} characters"
                ))),
                None => Err(FieldProblem::Invalid("must be a string".to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FIELDS: [FieldSpec; 5] = [
        FieldSpec::new("id", FieldKind::PrimaryKey),
        FieldSpec::new(
            "parent_id",
            FieldKind::ForeignKey {
                references: "things",
                nullable: true,
            },
        ),
        FieldSpec::new("path", FieldKind::AbsolutePath),
        FieldSpec::new("size", FieldKind::Bytes),
        FieldSpec::new("digest", FieldKind::FixedText(4)),
    ];

    const THINGS: Schema = Schema {
        collection: "things",
        fields: &FIELDS,
    };

    #[test]
    fn draft_is_normalized() {
        let row = THINGS
            .validate_draft(&json!({"path": "/a/b/", "size": 3, "digest": "abcd"}))
            .unwrap();

        assert_eq!(row["path"], json!("/a/b"));
        assert_eq!(row["parent_id"], Value::Null);
        assert!(!row.contains_key("id"));
    }

    #[test]
    fn draft_rejects_supplied_id() {
        let err = THINGS
            .validate_draft(&json!({"id": 4, "path": "/a", "size": 3, "digest": "abcd"}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "id", .. }));
    }

    #[test]
    fn relative_path_is_rejected() {
        let err = THINGS
            .validate_draft(&json!({"path": "a/b", "size": 3, "digest": "abcd"}))
            .unwrap_err();
        assert!(err.to_string().contains("absolute"), "{err}");
    }

    #[test]
    fn negative_size_is_rejected() {
        let err = THINGS
            .validate_draft(&json!({"path": "/a", "size": -1, "digest": "abcd"}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "size", .. }));
    }

    #[test]
    fn fixed_text_length_is_enforced() {
        let err = THINGS
            .validate_draft(&json!({"path": "/a", "size": 1, "digest": "abc"}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "digest", .. }));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = THINGS
            .validate_draft(&json!({"path": "/a", "size": 1, "digest": "abcd", "extra": true}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownField { .. }));
    }

    #[test]
    fn row_requires_primary_key() {
        let mut row = Map::new();
        row.insert("path".into(), json!("/a"));
        row.insert("size".into(), json!(1));
        row.insert("digest".into(), json!("abcd"));

        let err = THINGS.validate_row(&row).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                collection: "things",
                field: "id"
            }
        );

        row.insert("id".into(), json!(7));
        assert!(THINGS.validate_row(&row).is_ok());
    }

    #[test]
    fn require_field_reports_unknown_names() {
        assert!(THINGS.require_field("size").is_ok());
        assert!(matches!(
            THINGS.require_field("nope"),
            Err(ValidationError::UnknownField { .. })
        ));
        assert_eq!(THINGS.primary_key(), "id");
        assert_eq!(THINGS.insert_fields().count(), 4);
    }
}
