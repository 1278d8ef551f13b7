//! Bulk operation vocabulary
//!
//! Operation kinds, lifecycle states, filter predicates and payloads. Records
//! store these as strings/JSON; the types here are what the service reasons with.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Kind of bulk job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Export,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Export => "export",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            "export" => Ok(OperationType::Export),
            other => Err(DomainError::Validation(format!(
                "unknown operation type '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle state of a bulk operation.
///
/// `pending -> processing -> {completed | failed | cancelled}`, with
/// `pending -> cancelled` as the only shortcut. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    /// States from which `self` may be entered
    pub fn predecessors(&self) -> &'static [OperationStatus] {
        match self {
            OperationStatus::Pending => &[],
            OperationStatus::Processing => &[OperationStatus::Pending],
            OperationStatus::Completed | OperationStatus::Failed => &[OperationStatus::Processing],
            OperationStatus::Cancelled => &[OperationStatus::Pending, OperationStatus::Processing],
        }
    }

    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "processing" => Ok(OperationStatus::Processing),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            "cancelled" => Ok(OperationStatus::Cancelled),
            other => Err(DomainError::Internal(format!(
                "unknown operation status '{}'",
                other
            ))),
        }
    }
}

/// Comparison applied by a filter predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    #[serde(alias = "=", alias = "eq")]
    Equals,
    #[serde(alias = "!=", alias = "<>", alias = "ne")]
    NotEquals,
    #[serde(alias = ">", alias = "gt")]
    GreaterThan,
    #[serde(alias = ">=", alias = "gte")]
    GreaterOrEqual,
    #[serde(alias = "<", alias = "lt")]
    LessThan,
    #[serde(alias = "<=", alias = "lte")]
    LessOrEqual,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl FilterOperator {
    pub fn takes_list(&self) -> bool {
        matches!(self, FilterOperator::In | FilterOperator::NotIn)
    }

    pub fn takes_no_value(&self) -> bool {
        matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, FilterOperator::Like | FilterOperator::NotLike)
    }
}

/// A single `{field, operator, value}` condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl FilterPredicate {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// Serialization format of an export artifact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePayload {
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportPayload {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePayload {
    pub records: Vec<Map<String, Value>>,
}

/// Operation-specific data, shaped by the operation type
#[derive(Debug, Clone, PartialEq)]
pub enum OperationPayload {
    Create(CreatePayload),
    Update(UpdatePayload),
    Delete,
    Export(ExportPayload),
}

impl OperationPayload {
    /// Interpret a raw JSON payload for the given operation type
    pub fn parse(operation_type: OperationType, raw: &Value) -> Result<Self, DomainError> {
        let invalid =
            |e: serde_json::Error| DomainError::Validation(format!("invalid payload: {}", e));

        match operation_type {
            OperationType::Create => Ok(OperationPayload::Create(
                serde_json::from_value(raw.clone()).map_err(invalid)?,
            )),
            OperationType::Update => Ok(OperationPayload::Update(
                serde_json::from_value(raw.clone()).map_err(invalid)?,
            )),
            OperationType::Delete => match raw {
                Value::Null => Ok(OperationPayload::Delete),
                Value::Object(map) if map.is_empty() => Ok(OperationPayload::Delete),
                _ => Err(DomainError::Validation(
                    "delete operations take an empty payload".to_string(),
                )),
            },
            OperationType::Export => match raw {
                Value::Null => Ok(OperationPayload::Export(ExportPayload::default())),
                _ => Ok(OperationPayload::Export(
                    serde_json::from_value(raw.clone()).map_err(invalid)?,
                )),
            },
        }
    }

    pub fn to_value(&self) -> Value {
        let value = match self {
            OperationPayload::Create(p) => serde_json::to_value(p),
            OperationPayload::Update(p) => serde_json::to_value(p),
            OperationPayload::Delete => Ok(Value::Object(Map::new())),
            OperationPayload::Export(p) => serde_json::to_value(p),
        };
        value.unwrap_or(Value::Null)
    }
}
