//! SQL text for the PostgreSQL backend.
//!
//! Only identifiers are interpolated into statements, and only after
//! [`quote_ident`] has validated them. Every value travels as a bound
//! `jsonb` parameter and is coerced to the column types by
//! `jsonb_populate_record(set)`.

use std::collections::BTreeSet;

use super::Record;
use crate::error::RelayError;

/// PostgreSQL truncates identifiers longer than this.
const MAX_IDENT_LEN: usize = 63;

/// Validates a bare identifier and returns it double-quoted.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to 63 bytes.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] for anything else.
pub fn quote_ident(name: &str) -> Result<String, RelayError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid || name.len() > MAX_IDENT_LEN {
        return Err(RelayError::InvalidRequest(format!(
            "invalid identifier: {name:?}"
        )));
    }
    Ok(format!("\"{name}\""))
}

/// A validated, schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    qualified: String,
}

impl TableRef {
    /// Builds `"schema"."table"`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] if either name is not a bare
    /// identifier.
    pub fn new(schema: &str, table: &str) -> Result<Self, RelayError> {
        Ok(Self {
            qualified: format!("{}.{}", quote_ident(schema)?, quote_ident(table)?),
        })
    }

    /// The quoted, qualified name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.qualified
    }
}

/// Union of the keys of `rows`, sorted.
#[must_use]
pub fn column_union(rows: &[Record]) -> Vec<String> {
    rows.iter()
        .flat_map(|row| row.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn quote_all(columns: &[String]) -> Result<Vec<String>, RelayError> {
    columns.iter().map(|c| quote_ident(c)).collect()
}

fn match_clause(filter: &[String]) -> Result<String, RelayError> {
    Ok(quote_all(filter)?
        .iter()
        .map(|col| format!("target.{col} = cond.{col}"))
        .collect::<Vec<_>>()
        .join(" AND "))
}

/// `INSERT` returning every created row as `jsonb`.
///
/// With columns, `$1` is a `jsonb` array of records. Without columns the
/// statement inserts one row of defaults and takes no parameter.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] for an invalid column name.
pub fn insert(table: &TableRef, columns: &[String]) -> Result<String, RelayError> {
    let t = table.as_str();
    if columns.is_empty() {
        return Ok(format!(
            "INSERT INTO {t} AS target DEFAULT VALUES RETURNING to_jsonb(target.*)"
        ));
    }
    let cols = quote_all(columns)?.join(", ");
    Ok(format!(
        "INSERT INTO {t} AS target ({cols}) \
         SELECT {cols} FROM jsonb_populate_recordset(NULL::{t}, $1) \
         RETURNING to_jsonb(target.*)"
    ))
}

/// `UPDATE` with `$1` the change set and `$2` the equality filter.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] for an invalid column name or
/// an empty change set or filter.
pub fn update(
    table: &TableRef,
    changes: &[String],
    filter: &[String],
) -> Result<String, RelayError> {
    if changes.is_empty() || filter.is_empty() {
        return Err(RelayError::InvalidRequest(
            "update needs at least one column and one filter".to_string(),
        ));
    }
    let t = table.as_str();
    let assignments = quote_all(changes)?
        .iter()
        .map(|col| format!("{col} = src.{col}"))
        .collect::<Vec<_>>()
        .join(", ");
    let matches = match_clause(filter)?;
    Ok(format!(
        "UPDATE {t} AS target SET {assignments} \
         FROM jsonb_populate_record(NULL::{t}, $1) AS src, \
         jsonb_populate_record(NULL::{t}, $2) AS cond \
         WHERE {matches}"
    ))
}

/// `DELETE` with `$1` the equality filter.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] for an invalid column name or
/// an empty filter.
pub fn delete(table: &TableRef, filter: &[String]) -> Result<String, RelayError> {
    if filter.is_empty() {
        return Err(RelayError::InvalidRequest(
            "delete needs at least one filter".to_string(),
        ));
    }
    let t = table.as_str();
    let matches = match_clause(filter)?;
    Ok(format!(
        "DELETE FROM {t} AS target \
         USING jsonb_populate_record(NULL::{t}, $1) AS cond \
         WHERE {matches}"
    ))
}

/// `SELECT` returning each row as `jsonb`.
///
/// With a filter, `$1` is the filter and `$2`/`$3` are limit and offset;
/// without one, limit and offset are `$1`/`$2`. A `NULL` limit or offset
/// means none.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] for an invalid column name.
pub fn select(
    table: &TableRef,
    columns: Option<&[String]>,
    filter: &[String],
) -> Result<String, RelayError> {
    let t = table.as_str();
    let projection = match columns {
        Some(cols) if !cols.is_empty() => quote_all(cols)?
            .iter()
            .map(|col| format!("target.{col}"))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "target.*".to_string(),
    };
    let inner = if filter.is_empty() {
        format!("SELECT {projection} FROM {t} AS target LIMIT $1 OFFSET $2")
    } else {
        let matches = match_clause(filter)?;
        format!(
            "SELECT {projection} FROM {t} AS target, \
             jsonb_populate_record(NULL::{t}, $1) AS cond \
             WHERE {matches} LIMIT $2 OFFSET $3"
        )
    };
    Ok(format!("SELECT to_jsonb(picked.*) FROM ({inner}) AS picked"))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    fn items() -> TableRef {
        let Ok(t) = TableRef::new("public", "items") else {
            panic!("valid table");
        };
        t
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn identifiers_are_validated() {
        assert_eq!(
            quote_ident("laterp_characters").ok().as_deref(),
            Some("\"laterp_characters\"")
        );
        assert_eq!(quote_ident("_x1").ok().as_deref(), Some("\"_x1\""));
        assert!(quote_ident("").is_err());
        assert!(quote_ident("1items").is_err());
        assert!(quote_ident("items; DROP TABLE items").is_err());
        assert!(quote_ident("it\"ems").is_err());
        assert!(quote_ident(&"a".repeat(64)).is_err());
    }

    #[test]
    fn table_ref_is_schema_qualified() {
        assert_eq!(items().as_str(), "\"public\".\"items\"");
        assert!(TableRef::new("public", "bad-name").is_err());
    }

    #[test]
    fn column_union_merges_rows() {
        let rows = vec![
            json!({"name": "a", "qty": 1}),
            json!({"name": "b", "color": "red"}),
        ];
        let records: Vec<Record> = rows
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        assert_eq!(column_union(&records), cols(&["color", "name", "qty"]));
    }

    #[test]
    fn insert_with_columns() {
        let Ok(sql) = insert(&items(), &cols(&["name", "qty"])) else {
            panic!("valid insert");
        };
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"items\" AS target (\"name\", \"qty\") \
             SELECT \"name\", \"qty\" FROM jsonb_populate_recordset(NULL::\"public\".\"items\", $1) \
             RETURNING to_jsonb(target.*)"
        );
    }

    #[test]
    fn insert_without_columns_uses_defaults() {
        let Ok(sql) = insert(&items(), &[]) else {
            panic!("valid insert");
        };
        assert!(sql.contains("DEFAULT VALUES"));
        assert!(!sql.contains("$1"));
    }

    #[test]
    fn update_assigns_from_source_and_matches_filter() {
        let Ok(sql) = update(&items(), &cols(&["name"]), &cols(&["id", "owner"])) else {
            panic!("valid update");
        };
        assert!(
            sql.starts_with("UPDATE \"public\".\"items\" AS target SET \"name\" = src.\"name\"")
        );
        assert!(
            sql.ends_with("WHERE target.\"id\" = cond.\"id\" AND target.\"owner\" = cond.\"owner\"")
        );
    }

    #[test]
    fn update_rejects_empty_filter() {
        assert!(update(&items(), &cols(&["name"]), &[]).is_err());
        assert!(update(&items(), &[], &cols(&["id"])).is_err());
    }

    #[test]
    fn delete_requires_filter() {
        assert!(delete(&items(), &[]).is_err());
        let Ok(sql) = delete(&items(), &cols(&["id"])) else {
            panic!("valid delete");
        };
        assert!(sql.starts_with("DELETE FROM \"public\".\"items\" AS target USING"));
        assert!(sql.ends_with("WHERE target.\"id\" = cond.\"id\""));
    }

    #[test]
    fn select_without_filter_binds_limit_first() {
        let Ok(sql) = select(&items(), None, &[]) else {
            panic!("valid select");
        };
        assert_eq!(
            sql,
            "SELECT to_jsonb(picked.*) FROM (SELECT target.* FROM \"public\".\"items\" AS target \
             LIMIT $1 OFFSET $2) AS picked"
        );
    }

    #[test]
    fn select_with_projection_and_filter() {
        let projection = cols(&["id", "name"]);
        let Ok(sql) = select(&items(), Some(&projection), &cols(&["id"])) else {
            panic!("valid select");
        };
        assert!(sql.contains("SELECT target.\"id\", target.\"name\" FROM"));
        assert!(sql.contains("WHERE target.\"id\" = cond.\"id\" LIMIT $2 OFFSET $3"));
    }

    #[test]
    fn select_rejects_bad_column() {
        let projection = cols(&["id", "name) FROM secrets --"]);
        assert!(select(&items(), Some(&projection), &[]).is_err());
    }
}
