//! Schema records: the retrieval unit of the whole system
//!
//! A [`SchemaRecord`] describes one database table (name plus ordered
//! columns). The external schema parser produces these; this crate consumes
//! them as-is, renders a natural-language description per table for
//! embedding, and ships the same records back out as retrieval context.

use crate::error::{AskDbError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Referenced table/column for a foreign key column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

/// One column of a schema table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub foreign_key: Option<ForeignKeyRef>,
}

fn default_nullable() -> bool {
    true
}

/// Structured description of one database table.
///
/// Immutable once the index is built; `id` is the record's ordinal and keys
/// both the vector artifact and the metadata artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRecord {
    #[serde(default)]
    pub id: usize,
    pub table_name: String,
    pub columns: Vec<SchemaColumn>,
    #[serde(default)]
    pub description: Option<String>,
}

impl SchemaRecord {
    /// Look up a column by name, case-insensitively.
    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Render the natural-language-ish description that gets embedded and
    /// dropped into prompts.
    ///
    /// Format:
    /// ```text
    /// Table Customers. Stores data related to customers.
    /// Columns:
    /// - customer_id (int) [PK] NOT NULL - Unique customer identifier
    /// - org_id (int) [FK] NULL
    /// Foreign keys:
    /// - org_id references Orgs(org_id)
    /// ```
    pub fn render_description(&self) -> String {
        let table_summary = match &self.description {
            Some(text) => text.clone(),
            None => format!(
                "Stores data related to {}.",
                humanize_table_name(&self.table_name)
            ),
        };

        let mut lines = Vec::with_capacity(self.columns.len() + 4);
        lines.push(format!("Table {}. {}", self.table_name, table_summary));
        lines.push("Columns:".to_string());

        let mut fk_lines = Vec::new();
        for column in &self.columns {
            let mut parts = vec![format!("- {} ({})", column.name, column.data_type)];
            if column.primary_key {
                parts.push("[PK]".to_string());
            }
            if column.foreign_key.is_some() {
                parts.push("[FK]".to_string());
            }
            parts.push(if column.nullable {
                "NULL".to_string()
            } else {
                "NOT NULL".to_string()
            });
            if let Some(desc) = &column.description {
                parts.push(format!("- {desc}"));
            }
            lines.push(parts.join(" "));

            if let Some(fk) = &column.foreign_key {
                fk_lines.push(format!(
                    "- {} references {}({})",
                    column.name, fk.table, fk.column
                ));
            }
        }

        if !fk_lines.is_empty() {
            lines.push("Foreign keys:".to_string());
            lines.extend(fk_lines);
        }

        lines.join("\n")
    }
}

/// Turn `CUSTOMER_ORDERS` into "customer orders" to help the embedding a bit.
pub fn humanize_table_name(name: &str) -> String {
    name.replace('_', " ").to_lowercase()
}

/// Load the external parser's output: a JSON array of schema records.
///
/// Record ids are reassigned from array position so that ordinals always
/// match the order vectors are written in, regardless of what the parser put
/// in the file.
pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<SchemaRecord>> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).map_err(|e| {
        AskDbError::Schema(format!("cannot read schema records from '{}': {e}", path.display()))
    })?;
    let mut records: Vec<SchemaRecord> = serde_json::from_str(&data).map_err(|e| {
        AskDbError::Schema(format!("invalid schema records in '{}': {e}", path.display()))
    })?;

    for (ordinal, record) in records.iter_mut().enumerate() {
        record.id = ordinal;
        if record.table_name.trim().is_empty() {
            return Err(AskDbError::Schema(format!(
                "schema record {ordinal} has an empty table name"
            )));
        }
        if record.columns.is_empty() {
            log::warn!("schema record '{}' has no columns", record.table_name);
        }
    }

    log::info!("Loaded {} schema records from {}", records.len(), path.display());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customers() -> SchemaRecord {
        SchemaRecord {
            id: 0,
            table_name: "Customers".to_string(),
            description: None,
            columns: vec![
                SchemaColumn {
                    name: "customer_id".to_string(),
                    data_type: "int".to_string(),
                    description: Some("Unique customer identifier".to_string()),
                    nullable: false,
                    primary_key: true,
                    foreign_key: None,
                },
                SchemaColumn {
                    name: "org_id".to_string(),
                    data_type: "int".to_string(),
                    description: None,
                    nullable: true,
                    primary_key: false,
                    foreign_key: Some(ForeignKeyRef {
                        table: "Orgs".to_string(),
                        column: "org_id".to_string(),
                    }),
                },
            ],
        }
    }

    #[test]
    fn test_render_description() {
        let text = customers().render_description();
        assert!(text.starts_with("Table Customers."));
        assert!(text.contains("Stores data related to customers."));
        assert!(text.contains("- customer_id (int) [PK] NOT NULL - Unique customer identifier"));
        assert!(text.contains("- org_id (int) [FK] NULL"));
        assert!(text.contains("- org_id references Orgs(org_id)"));
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let record = customers();
        assert!(record.has_column("CUSTOMER_ID"));
        assert!(record.has_column("Org_Id"));
        assert!(!record.has_column("missing"));
    }

    #[test]
    fn test_humanize_table_name() {
        assert_eq!(humanize_table_name("CUSTOMER_ORDERS"), "customer orders");
        assert_eq!(humanize_table_name("t_billed"), "t billed");
    }

    #[test]
    fn test_load_records_reassigns_ordinals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let records = vec![
            SchemaRecord { id: 42, ..customers() },
            SchemaRecord {
                id: 42,
                table_name: "Orders".to_string(),
                columns: vec![SchemaColumn {
                    name: "order_id".to_string(),
                    data_type: "int".to_string(),
                    description: None,
                    nullable: false,
                    primary_key: true,
                    foreign_key: None,
                }],
                description: None,
            },
        ];
        std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

        let loaded = load_records(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, 0);
        assert_eq!(loaded[1].id, 1);
        assert_eq!(loaded[1].table_name, "Orders");
    }

    #[test]
    fn test_load_records_rejects_empty_table_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, r#"[{"table_name": " ", "columns": []}]"#).unwrap();
        assert!(matches!(load_records(&path), Err(AskDbError::Schema(_))));
    }
}
