//! Serialization of exported rows into CSV or JSON artifacts

use serde_json::{Map, Value};

use crate::domain::{DomainError, ExportFormat};

/// Accumulates rows into the bytes of one export artifact.
///
/// CSV output always starts with a header row, so an export of an empty
/// result set is a header-only file.
pub enum ExportWriter {
    Csv {
        columns: Vec<String>,
        writer: csv::Writer<Vec<u8>>,
    },
    Json {
        columns: Vec<String>,
        rows: Vec<Value>,
    },
}

fn csv_error(e: impl std::fmt::Display) -> DomainError {
    DomainError::Internal(format!("CSV serialization failed: {}", e))
}

fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

impl ExportWriter {
    pub fn new(format: ExportFormat, columns: &[&str]) -> Result<Self, DomainError> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        match format {
            ExportFormat::Csv => {
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(Vec::new());
                writer.write_record(&columns).map_err(csv_error)?;
                Ok(ExportWriter::Csv { columns, writer })
            }
            ExportFormat::Json => Ok(ExportWriter::Json {
                columns,
                rows: Vec::new(),
            }),
        }
    }

    /// Append one row; keys outside the selected columns are ignored and
    /// missing keys export as empty/null.
    pub fn write_row(&mut self, row: &Value) -> Result<(), DomainError> {
        match self {
            ExportWriter::Csv { columns, writer } => {
                let record: Vec<String> = columns.iter().map(|c| csv_cell(row.get(c))).collect();
                writer.write_record(&record).map_err(csv_error)
            }
            ExportWriter::Json { columns, rows } => {
                let object: Map<String, Value> = columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                    .collect();
                rows.push(Value::Object(object));
                Ok(())
            }
        }
    }

    pub fn finish(self) -> Result<Vec<u8>, DomainError> {
        match self {
            ExportWriter::Csv { writer, .. } => writer.into_inner().map_err(csv_error),
            ExportWriter::Json { rows, .. } => serde_json::to_vec_pretty(&rows)
                .map_err(|e| DomainError::Internal(format!("JSON serialization failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_header_only_for_empty_export() {
        let writer = ExportWriter::new(ExportFormat::Csv, &["id", "name"]).unwrap();
        let bytes = writer.finish().unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "id,name\n");
    }

    #[test]
    fn csv_quotes_and_blanks_nulls() {
        let mut writer = ExportWriter::new(ExportFormat::Csv, &["id", "name", "phone"]).unwrap();
        writer
            .write_row(&json!({"id": 7, "name": "Putri, S.Ked", "phone": null}))
            .unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert_eq!(text, "id,name,phone\n7,\"Putri, S.Ked\",\n");
    }

    #[test]
    fn json_keeps_only_selected_columns() {
        let mut writer = ExportWriter::new(ExportFormat::Json, &["id", "tariff"]).unwrap();
        writer
            .write_row(&json!({"id": 1, "tariff": 75000.0, "notes": "x"}))
            .unwrap();
        let parsed: Value = serde_json::from_slice(&writer.finish().unwrap()).unwrap();
        assert_eq!(parsed, json!([{"id": 1, "tariff": 75000.0}]));
    }

    #[test]
    fn json_empty_export_is_empty_array() {
        let writer = ExportWriter::new(ExportFormat::Json, &["id"]).unwrap();
        let parsed: Value = serde_json::from_slice(&writer.finish().unwrap()).unwrap();
        assert_eq!(parsed, json!([]));
    }
}
