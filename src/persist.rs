use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use rusqlite::Connection;
use tracing::{info, warn};

use crate::db;
use crate::error::{PersistFailure, StartupError};
use crate::export::CsvExport;
use crate::record::{Record, RecordStore};
use crate::schema::Schema;

/// Outcome of writing a batch of rows to one sink.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub inserted: usize,
    pub failures: Vec<PersistFailure>,
}

impl PersistReport {
    pub fn merge(&mut self, other: PersistReport) {
        self.inserted += other.inserted;
        self.failures.extend(other.failures);
    }
}

/// Both outputs of a run, acquired together before the first key is fetched.
/// Dropping the value releases the file and the connection on every path.
pub struct Sinks {
    schema: &'static Schema,
    csv: CsvExport<BufWriter<File>>,
    conn: Connection,
    exported: usize,
}

impl Sinks {
    pub fn open(schema: &'static Schema, csv_path: &Path, db_path: &Path) -> Result<Self, StartupError> {
        schema.validate()?;

        let conn = db::connect(db_path)?;
        db::init_schema(&conn, schema)?;

        let output = |source| StartupError::Output {
            path: csv_path.to_path_buf(),
            source,
        };
        let file = File::create(csv_path).map_err(output)?;
        let csv = CsvExport::new(BufWriter::new(file), schema)
            .map_err(|e| output(std::io::Error::other(e)))?;

        info!(csv = %csv_path.display(), db = %db_path.display(), table = schema.table, "sinks open");
        Ok(Sinks {
            schema,
            csv,
            conn,
            exported: 0,
        })
    }

    /// Incremental mode: one CSV row (flushed) and one committed insert.
    pub fn persist_one(&mut self, record: &Record) -> PersistReport {
        let mut report = PersistReport::default();
        if let Err(failure) = self.export(record).and_then(|_| {
            self.csv.flush().map_err(|e| PersistFailure {
                key: record.key().to_string(),
                reason: e.to_string(),
            })
        }) {
            report.failures.push(failure);
        }
        report.merge(self.insert(std::slice::from_ref(record)));
        report
    }

    /// Batch mode: every record to the CSV, then all rows in one transaction.
    pub fn persist_all(&mut self, store: &RecordStore) -> PersistReport {
        let failures = self.csv.write_store(store);
        for f in &failures {
            warn!(key = %f.key, error = %f.reason, "csv write failed");
        }
        self.exported += store.len() - failures.len();
        let mut report = PersistReport {
            inserted: 0,
            failures,
        };
        report.merge(self.insert(store.records()));
        report
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Flushes the CSV and closes the connection, surfacing errors drop would hide.
    pub fn close(self) -> anyhow::Result<()> {
        let exported = self.exported;
        self.csv.into_inner()?;
        self.conn.close().map_err(|(_, e)| e)?;
        info!(rows = exported, "sinks closed");
        Ok(())
    }

    fn export(&mut self, record: &Record) -> Result<(), PersistFailure> {
        match self.csv.write(record) {
            Ok(()) => {
                self.exported += 1;
                Ok(())
            }
            Err(e) => {
                warn!(key = %record.key(), error = %e, "csv write failed");
                Err(PersistFailure {
                    key: record.key().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// A transaction that cannot even begin or commit fails every row in it.
    fn insert(&self, records: &[Record]) -> PersistReport {
        match db::write_relational(&self.conn, self.schema, records) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, rows = records.len(), "transaction failed");
                PersistReport {
                    inserted: 0,
                    failures: records
                        .iter()
                        .map(|r| PersistFailure {
                            key: r.key().to_string(),
                            reason: e.to_string(),
                        })
                        .collect(),
                }
            }
        }
    }
}
