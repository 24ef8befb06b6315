//! Candidate SQL validation against the retrieved schema fragment
//!
//! Two independent checks: the string must parse as a single T-SQL statement
//! (`sqlparser`, MsSql dialect), and every referenced table/column must
//! exist among the session's retrieved records or be a recognized alias.
//! Validation is a pure function of its inputs (no network, no index
//! access), so retries stay fast and deterministic under test.

use crate::ml::index::RetrievedTable;
use crate::schema::SchemaRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Expr, ObjectName, Statement, visit_expressions, visit_relations};
use sqlparser::dialect::MsSqlDialect;
use sqlparser::parser::Parser;
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::LazyLock;

/// Outcome of validating one candidate SQL string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Accepted,
    /// The candidate does not parse as a single valid statement
    RejectedSyntax(String),
    /// The candidate references tables/columns outside the retrieved records
    RejectedSchema(String),
    /// No SQL statement could be isolated from the model response
    ExtractionFailed,
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted)
    }

    /// Corrective guidance for the next prompt; `None` only for `Accepted`.
    pub fn feedback_reason(&self) -> Option<String> {
        match self {
            ValidationOutcome::Accepted => None,
            ValidationOutcome::RejectedSyntax(reason)
            | ValidationOutcome::RejectedSchema(reason) => Some(reason.clone()),
            ValidationOutcome::ExtractionFailed => Some(
                "the response did not contain a single extractable SQL statement; \
                 return exactly one statement inside a ```sql code block"
                    .to_string(),
            ),
        }
    }
}

// Table alias capture: `FROM Customers AS c` / `JOIN dbo.Orders o`.
static TABLE_ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_\[][\w.\[\]]*)\s+(?:AS\s+)?([A-Za-z_]\w*)")
        .expect("table-alias regex is valid")
});

// Any `AS name` declaration (select-list aliases, derived-table aliases).
static DECLARED_ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bAS\s+([A-Za-z_]\w*)").expect("declared-alias regex is valid")
});

// Keywords that the alias regex must never mistake for an alias.
const NON_ALIAS_KEYWORDS: [&str; 22] = [
    "WHERE", "ON", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "JOIN", "GROUP", "ORDER", "HAVING",
    "UNION", "EXCEPT", "INTERSECT", "SELECT", "SET", "AS", "AND", "OR", "WITH", "OUTER", "OPTION",
];

/// Schema-conformance and syntax validator
#[derive(Debug, Clone, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, sql: &str, retrieval: &[RetrievedTable]) -> ValidationOutcome {
        let sql = sql.trim();
        if sql.is_empty() {
            return ValidationOutcome::RejectedSyntax("empty SQL statement".to_string());
        }

        let statements = match Parser::parse_sql(&MsSqlDialect {}, sql) {
            Ok(statements) => statements,
            Err(e) => {
                return ValidationOutcome::RejectedSyntax(format!("not parseable as T-SQL: {e}"));
            }
        };
        if statements.len() != 1 {
            return ValidationOutcome::RejectedSyntax(format!(
                "expected a single SQL statement, found {}",
                statements.len()
            ));
        }
        let statement = &statements[0];

        let records: Vec<&SchemaRecord> = retrieval.iter().map(|r| &r.record).collect();
        let cte_names = cte_names(statement);
        let table_aliases = table_aliases(sql);
        let declared = declared_aliases(sql);

        let mut errors: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut push_error = |errors: &mut Vec<String>, message: String| {
            if seen.insert(message.clone()) {
                errors.push(message);
            }
        };

        // Check 2a: every referenced relation must be a retrieved table, a
        // CTE defined in this statement, or a known table alias.
        let mut relations: Vec<(String, String)> = Vec::new();
        let _: ControlFlow<()> = visit_relations(statement, |relation: &ObjectName| {
            relations.push((relation.to_string(), base_name(relation)));
            ControlFlow::Continue(())
        });

        for (full, base) in &relations {
            let base_lower = base.to_lowercase();
            if cte_names.contains(&base_lower) || find_record(&records, base).is_some() {
                continue;
            }
            // A relation name that is really an alias (e.g. a qualified
            // wildcard's qualifier) is fine when its base table is known.
            if let Some(alias_base) = table_aliases.get(&base_lower) {
                if cte_names.contains(alias_base) || find_record(&records, alias_base).is_some() {
                    continue;
                }
            }
            push_error(
                &mut errors,
                format!(
                    "table '{full}' not found among retrieved schema records (available: {})",
                    available_tables(&records)
                ),
            );
        }

        // Check 2b: column references.
        let mut qualified: Vec<(String, String)> = Vec::new();
        let mut bare: Vec<String> = Vec::new();
        let _: ControlFlow<()> = visit_expressions(statement, |expr: &Expr| {
            match expr {
                Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                    let qualifier = parts[parts.len() - 2].value.clone();
                    let column = parts[parts.len() - 1].value.clone();
                    qualified.push((qualifier, column));
                }
                Expr::Identifier(ident) => bare.push(ident.value.clone()),
                _ => {}
            }
            ControlFlow::Continue(())
        });

        for (qualifier, column) in &qualified {
            let qualifier_lower = qualifier.to_lowercase();
            if cte_names.contains(&qualifier_lower) {
                continue;
            }
            let base = table_aliases
                .get(&qualifier_lower)
                .cloned()
                .unwrap_or(qualifier_lower.clone());
            if cte_names.contains(&base) {
                continue;
            }
            match find_record(&records, &base) {
                Some(record) => {
                    if !record.has_column(column) {
                        push_error(
                            &mut errors,
                            format!(
                                "column '{column}' not found on table '{}' (available columns: {})",
                                record.table_name,
                                column_list(record)
                            ),
                        );
                    }
                }
                None => {
                    // Derived-table aliases have no known shape; skip them.
                    if !declared.contains(&qualifier_lower) {
                        push_error(
                            &mut errors,
                            format!(
                                "unknown table or alias '{qualifier}' in reference \
                                 '{qualifier}.{column}'"
                            ),
                        );
                    }
                }
            }
        }

        for column in &bare {
            let column_lower = column.to_lowercase();
            if declared.contains(&column_lower)
                || table_aliases.contains_key(&column_lower)
                || cte_names.contains(&column_lower)
                || find_record(&records, column).is_some()
            {
                continue;
            }
            if !records.iter().any(|r| r.has_column(column)) {
                push_error(
                    &mut errors,
                    format!("column '{column}' not found on any retrieved table"),
                );
            }
        }

        if errors.is_empty() {
            ValidationOutcome::Accepted
        } else {
            ValidationOutcome::RejectedSchema(errors.join("; "))
        }
    }
}

/// Last identifier part, so `dbo.Customers` matches the record `Customers`.
fn base_name(relation: &ObjectName) -> String {
    relation
        .0
        .last()
        .map(|ident| ident.value.clone())
        .unwrap_or_default()
}

fn find_record<'a>(records: &'a [&SchemaRecord], name: &str) -> Option<&'a SchemaRecord> {
    records
        .iter()
        .find(|r| r.table_name.eq_ignore_ascii_case(name))
        .copied()
}

fn available_tables(records: &[&SchemaRecord]) -> String {
    if records.is_empty() {
        return "none".to_string();
    }
    records
        .iter()
        .map(|r| r.table_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_list(record: &SchemaRecord) -> String {
    const SHOWN: usize = 12;
    let names: Vec<&str> = record
        .columns
        .iter()
        .take(SHOWN)
        .map(|c| c.name.as_str())
        .collect();
    if record.columns.len() > SHOWN {
        format!("{}, ...", names.join(", "))
    } else {
        names.join(", ")
    }
}

/// CTE names defined by the statement itself (lowercased).
fn cte_names(statement: &Statement) -> HashSet<String> {
    let mut names = HashSet::new();
    if let Statement::Query(query) = statement {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                names.insert(cte.alias.name.value.to_lowercase());
            }
        }
    }
    names
}

/// Map of table alias (lowercased) to base table name (lowercased).
fn table_aliases(sql: &str) -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    for captures in TABLE_ALIAS.captures_iter(sql) {
        let alias = captures[2].to_lowercase();
        if NON_ALIAS_KEYWORDS
            .iter()
            .any(|kw| alias.eq_ignore_ascii_case(kw))
        {
            continue;
        }
        let table = captures[1]
            .rsplit('.')
            .next()
            .unwrap_or(&captures[1])
            .trim_matches(['[', ']'])
            .to_lowercase();
        aliases.insert(alias, table);
    }
    aliases
}

/// Every `AS name` declaration in the statement (lowercased).
fn declared_aliases(sql: &str) -> HashSet<String> {
    DECLARED_ALIAS
        .captures_iter(sql)
        .map(|captures| captures[1].to_lowercase())
        .collect()
}
