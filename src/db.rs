use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::warn;

use crate::error::{PersistFailure, StartupError};
use crate::persist::PersistReport;
use crate::record::Record;
use crate::schema::{FieldDefinition, Schema, SqlType};

pub const LISTING_TABLE: &str = "zip_codes_by_county";

pub fn connect(path: &Path) -> Result<Connection, StartupError> {
    let open = || -> rusqlite::Result<Connection> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    };
    open().map_err(|source| StartupError::Database {
        path: path.to_path_buf(),
        source,
    })
}

/// Creates the stats table for `schema` and the county listing table.
pub fn init_schema(conn: &Connection, schema: &Schema) -> Result<(), StartupError> {
    conn.execute_batch(&create_table_sql(schema))
        .map_err(|source| StartupError::CreateTable {
            table: schema.table.to_string(),
            source,
        })?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {LISTING_TABLE} (
            zip_code TEXT PRIMARY KEY,
            state    TEXT NOT NULL,
            county   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_listing_county ON {LISTING_TABLE}(state, county);"
    ))
    .map_err(|source| StartupError::CreateTable {
        table: LISTING_TABLE.to_string(),
        source,
    })
}

/// Identifiers come from a validated schema, never from documents.
pub fn create_table_sql(schema: &Schema) -> String {
    let columns: Vec<String> = std::iter::once(format!("{} TEXT PRIMARY KEY", schema.key_column))
        .chain(
            schema
                .fields
                .iter()
                .map(|f| format!("{} {} NOT NULL", f.column, f.sql_type.as_sql())),
        )
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        schema.table,
        columns.join(",\n    ")
    )
}

pub fn insert_sql(schema: &Schema) -> String {
    let columns: Vec<&str> = std::iter::once(schema.key_column)
        .chain(schema.fields.iter().map(|f| f.column))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        schema.table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn sql_value(field: &FieldDefinition, value: &str) -> Value {
    let typed = match field.sql_type {
        SqlType::Integer => value.parse::<i64>().ok().map(Value::Integer),
        SqlType::Real => value.parse::<f64>().ok().map(Value::Real),
    };
    typed.unwrap_or_else(|| Value::Text(value.to_string()))
}

// ── Records ──

/// Inserts every record inside one transaction. A row that fails is reported
/// against its key and the rest are still attempted; the transaction commits
/// whatever succeeded.
pub fn write_relational(
    conn: &Connection,
    schema: &Schema,
    records: &[Record],
) -> rusqlite::Result<PersistReport> {
    let mut report = PersistReport::default();
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(&insert_sql(schema))?;
        for record in records {
            let params = std::iter::once(Value::Text(record.key().to_string())).chain(
                schema
                    .fields
                    .iter()
                    .zip(record.values())
                    .map(|(field, value)| sql_value(field, value)),
            );
            match stmt.execute(params_from_iter(params)) {
                Ok(_) => report.inserted += 1,
                Err(e) => {
                    warn!(key = %record.key(), error = %e, "insert failed");
                    report.failures.push(PersistFailure {
                        key: record.key().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
    tx.commit()?;
    Ok(report)
}

// ── County listings ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub state: String,
    pub county: String,
    pub zip_code: String,
}

pub fn write_listings(conn: &Connection, rows: &[ListingRow]) -> rusqlite::Result<PersistReport> {
    let mut report = PersistReport::default();
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {LISTING_TABLE} (zip_code, state, county) VALUES (?1, ?2, ?3)"
        ))?;
        for r in rows {
            match stmt.execute(rusqlite::params![r.zip_code, r.state, r.county]) {
                Ok(_) => report.inserted += 1,
                Err(e) => {
                    warn!(zip_code = %r.zip_code, error = %e, "listing insert failed");
                    report.failures.push(PersistFailure {
                        key: r.zip_code.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
    tx.commit()?;
    Ok(report)
}

#[cfg(test)]
pub fn count_rows(conn: &Connection, table: &str) -> rusqlite::Result<usize> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::schema::{COUNTY_SCHEMA, ZIP_SCHEMA};

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, &ZIP_SCHEMA).unwrap();
        conn
    }

    fn record(key: &str, html: &str) -> Record {
        parser::extract(html, &key.into(), &ZIP_SCHEMA)
    }

    #[test]
    fn table_matches_schema_order() {
        let conn = memory();
        let mut stmt = conn.prepare("SELECT * FROM zip_code_stats").unwrap();
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let expected: Vec<&str> = std::iter::once("zip_code")
            .chain(ZIP_SCHEMA.fields.iter().map(|f| f.column))
            .collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn insert_sql_is_parameterized() {
        let sql = insert_sql(&COUNTY_SCHEMA);
        assert!(sql.starts_with("INSERT INTO county_stats (county, population,"));
        assert!(sql.ends_with("VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"));
    }

    #[test]
    fn writes_one_row_per_record_with_numeric_types() {
        let conn = memory();
        let html = "<b>Estimated zip code population in 2016:</b> 12,345<br>\n\
                    <b>Foreign born population:</b> 1 (12.3%)";
        let records = vec![record("35004", html), record("90210", html)];
        let report = write_relational(&conn, &ZIP_SCHEMA, &records).unwrap();
        assert_eq!(report.inserted, 2);
        assert!(report.failures.is_empty());
        assert_eq!(count_rows(&conn, "zip_code_stats").unwrap(), 2);

        let (pop, fb): (i64, f64) = conn
            .query_row(
                "SELECT population, foreign_born_fraction FROM zip_code_stats WHERE zip_code = ?1",
                ["35004"],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(pop, 12345);
        assert!((fb - 0.123).abs() < 1e-9);
    }

    #[test]
    fn unreadable_decimals_still_store_as_real() {
        let conn = memory();
        let html = "<b>Land area:</b> about 3 sq. mi.<br>\n\
                    <b>Median resident age:</b> <span class=\"badge\">N/A</span>";
        write_relational(&conn, &ZIP_SCHEMA, &[record("35004", html)]).unwrap();
        let (land, age): (String, String) = conn
            .query_row(
                "SELECT typeof(land_area_sq_mi), typeof(median_resident_age) FROM zip_code_stats",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(land, "real");
        assert_eq!(age, "real");
    }

    #[test]
    fn failed_row_is_reported_and_the_rest_commit() {
        let conn = memory();
        let records = vec![record("35004", ""), record("35004", ""), record("90210", "")];
        let report = write_relational(&conn, &ZIP_SCHEMA, &records).unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, "35004");
        assert_eq!(count_rows(&conn, "zip_code_stats").unwrap(), 2);
    }

    #[test]
    fn values_with_quotes_are_bound_not_spliced() {
        let conn = memory();
        let key = "x'); DROP TABLE zip_code_stats; --";
        let report = write_relational(&conn, &ZIP_SCHEMA, &[record(key, "")]).unwrap();
        assert_eq!(report.inserted, 1);
        let stored: String = conn
            .query_row("SELECT zip_code FROM zip_code_stats", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, key);
    }

    #[test]
    fn listings_keep_leading_zeros() {
        let conn = memory();
        let rows = vec![
            ListingRow { state: "MA".into(), county: "Hampden County".into(), zip_code: "01001".into() },
            ListingRow { state: "MA".into(), county: "Hampden County".into(), zip_code: "01001".into() },
        ];
        let report = write_listings(&conn, &rows).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.failures.len(), 1);
        let zip: String = conn
            .query_row(&format!("SELECT zip_code FROM {LISTING_TABLE}"), [], |r| r.get(0))
            .unwrap();
        assert_eq!(zip, "01001");
    }

    #[test]
    fn reopening_keeps_existing_table() {
        let conn = memory();
        write_relational(&conn, &ZIP_SCHEMA, &[record("35004", "")]).unwrap();
        init_schema(&conn, &ZIP_SCHEMA).unwrap();
        assert_eq!(count_rows(&conn, "zip_code_stats").unwrap(), 1);
    }
}
