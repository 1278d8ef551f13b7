//! Target model schemas
//!
//! A `TargetSchema` lists the fields a bulk operation may filter on, write to,
//! or export. Filters and payloads are compiled against it when an operation
//! is created, so execution only ever sees typed values.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use super::DomainError;
use super::bulk::{FilterOperator, FilterPredicate, OperationPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Real,
    Text,
    Boolean,
    /// `YYYY-MM-DD`, stored as text
    Date,
    /// RFC 3339 or `YYYY-MM-DD HH:MM:SS`, stored as text
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub writable: bool,
}

impl FieldSpec {
    pub const fn writable(name: &'static str, kind: FieldKind, nullable: bool) -> Self {
        Self {
            name,
            kind,
            nullable,
            writable: true,
        }
    }

    pub const fn read_only(name: &'static str, kind: FieldKind, nullable: bool) -> Self {
        Self {
            name,
            kind,
            nullable,
            writable: false,
        }
    }
}

/// A JSON value coerced to a field's kind
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null(FieldKind),
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl FieldKind {
    /// Coerce a JSON scalar into this kind. Numeric strings are accepted for
    /// numeric kinds since form input arrives as text.
    pub fn coerce(&self, value: &Value) -> Result<FieldValue, String> {
        match (self, value) {
            (kind, Value::Null) => Ok(FieldValue::Null(*kind)),
            (FieldKind::Integer, Value::Number(n)) => n
                .as_i64()
                .map(FieldValue::Integer)
                .ok_or_else(|| format!("{} is not an integer", n)),
            (FieldKind::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| format!("'{}' is not an integer", s)),
            (FieldKind::Real, Value::Number(n)) => n
                .as_f64()
                .map(FieldValue::Real)
                .ok_or_else(|| format!("{} is not a number", n)),
            (FieldKind::Real, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(FieldValue::Real)
                .map_err(|_| format!("'{}' is not a number", s)),
            (FieldKind::Text, Value::String(s)) => Ok(FieldValue::Text(s.clone())),
            (FieldKind::Text, Value::Number(n)) => Ok(FieldValue::Text(n.to_string())),
            (FieldKind::Boolean, Value::Bool(b)) => Ok(FieldValue::Boolean(*b)),
            (FieldKind::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(0) => Ok(FieldValue::Boolean(false)),
                Some(1) => Ok(FieldValue::Boolean(true)),
                _ => Err(format!("{} is not a boolean", n)),
            },
            (FieldKind::Boolean, Value::String(s)) => match s.as_str() {
                "true" | "1" => Ok(FieldValue::Boolean(true)),
                "false" | "0" => Ok(FieldValue::Boolean(false)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },
            (FieldKind::Date, Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|_| FieldValue::Text(s.clone()))
                .map_err(|_| format!("'{}' is not a YYYY-MM-DD date", s)),
            (FieldKind::Timestamp, Value::String(s)) => {
                let valid = DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok();
                if valid {
                    Ok(FieldValue::Text(s.clone()))
                } else {
                    Err(format!("'{}' is not a timestamp", s))
                }
            }
            (kind, other) => Err(format!("{} is not a valid {:?} value", other, kind)),
        }
    }
}

/// Right-hand side of a compiled predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Scalar(FieldValue),
    List(Vec<FieldValue>),
    Pattern(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPredicate {
    pub field: &'static str,
    pub operator: FilterOperator,
    pub operand: Operand,
}

/// A field assignment ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: &'static str,
    pub value: FieldValue,
}

#[derive(Debug)]
pub struct TargetSchema {
    /// Canonical name, e.g. `Patient`
    pub name: &'static str,
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
    /// Column set by soft deletes; rows with it set are invisible to bulk work
    pub soft_delete_column: Option<&'static str>,
}

impl TargetSchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `name` refers to this target (canonical, lower-case or table name)
    pub fn answers_to(&self, name: &str) -> bool {
        let name = name.trim();
        name == self.name || name.eq_ignore_ascii_case(self.name) || name == self.table
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn exportable_columns(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    pub fn compile_filters(
        &self,
        filters: &[FilterPredicate],
    ) -> Result<Vec<CompiledPredicate>, DomainError> {
        filters.iter().map(|p| self.compile_predicate(p)).collect()
    }

    fn compile_predicate(&self, pred: &FilterPredicate) -> Result<CompiledPredicate, DomainError> {
        let spec = self.field(&pred.field).ok_or_else(|| {
            DomainError::Validation(format!(
                "unknown field '{}' for {}",
                pred.field, self.name
            ))
        })?;
        let invalid = |msg: String| {
            DomainError::Validation(format!(
                "filter on '{}' ({:?}): {}",
                pred.field, pred.operator, msg
            ))
        };

        let operand = if pred.operator.takes_no_value() {
            Operand::None
        } else if pred.operator.takes_list() {
            let items = pred
                .value
                .as_array()
                .ok_or_else(|| invalid("expects an array value".to_string()))?;
            if items.is_empty() {
                return Err(invalid("expects a non-empty array".to_string()));
            }
            let values = items
                .iter()
                .map(|v| match v {
                    Value::Null | Value::Array(_) | Value::Object(_) => {
                        Err(format!("{} is not a scalar", v))
                    }
                    _ => spec.kind.coerce(v),
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid)?;
            Operand::List(values)
        } else if pred.operator.is_pattern() {
            if spec.kind != FieldKind::Text {
                return Err(invalid("pattern matching needs a text field".to_string()));
            }
            let pattern = pred
                .value
                .as_str()
                .ok_or_else(|| invalid("expects a string pattern".to_string()))?;
            Operand::Pattern(pattern.to_string())
        } else {
            match &pred.value {
                Value::Null => {
                    return Err(invalid(
                        "expects a value, use is_null/is_not_null for nulls".to_string(),
                    ));
                }
                Value::Array(_) | Value::Object(_) => {
                    return Err(invalid("expects a scalar value".to_string()));
                }
                v => Operand::Scalar(spec.kind.coerce(v).map_err(invalid)?),
            }
        };

        Ok(CompiledPredicate {
            field: spec.name,
            operator: pred.operator,
            operand,
        })
    }

    /// Coerce a `{field: value}` map into assignments on writable fields
    pub fn compile_assignments(
        &self,
        values: &Map<String, Value>,
    ) -> Result<Vec<Assignment>, DomainError> {
        values
            .iter()
            .map(|(name, value)| {
                let spec = self.writable_field(name)?;
                if value.is_null() && !spec.nullable {
                    return Err(DomainError::Validation(format!(
                        "field '{}' cannot be null",
                        name
                    )));
                }
                let value = spec.kind.coerce(value).map_err(|msg| {
                    DomainError::Validation(format!("field '{}': {}", name, msg))
                })?;
                Ok(Assignment {
                    field: spec.name,
                    value,
                })
            })
            .collect()
    }

    fn writable_field(&self, name: &str) -> Result<&'static FieldSpec, DomainError> {
        match self.field(name) {
            Some(spec) if spec.writable => Ok(spec),
            Some(_) => Err(DomainError::Validation(format!(
                "field '{}' of {} is read-only",
                name, self.name
            ))),
            None => Err(DomainError::Validation(format!(
                "unknown field '{}' for {}",
                name, self.name
            ))),
        }
    }

    /// Check a payload against this schema. Create records are only checked
    /// for unknown or read-only keys; their values are judged row by row.
    pub fn validate_payload(&self, payload: &OperationPayload) -> Result<(), DomainError> {
        match payload {
            OperationPayload::Update(update) => {
                if update.fields.is_empty() {
                    return Err(DomainError::Validation(
                        "update payload needs at least one field".to_string(),
                    ));
                }
                self.compile_assignments(&update.fields).map(|_| ())
            }
            OperationPayload::Create(create) => {
                if create.records.is_empty() {
                    return Err(DomainError::Validation(
                        "create payload needs at least one record".to_string(),
                    ));
                }
                for record in &create.records {
                    for name in record.keys() {
                        self.writable_field(name)?;
                    }
                }
                Ok(())
            }
            OperationPayload::Export(export) => {
                if let Some(columns) = &export.columns {
                    if columns.is_empty() {
                        return Err(DomainError::Validation(
                            "export columns must not be empty".to_string(),
                        ));
                    }
                    if let Some(unknown) = columns.iter().find(|c| !self.has_field(c)) {
                        return Err(DomainError::Validation(format!(
                            "unknown export column '{}' for {}",
                            unknown, self.name
                        )));
                    }
                }
                Ok(())
            }
            OperationPayload::Delete => Ok(()),
        }
    }
}
