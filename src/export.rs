use std::io::Write;

use csv::{QuoteStyle, Terminator, WriterBuilder};

use crate::error::PersistFailure;
use crate::record::{Record, RecordStore};
use crate::schema::Schema;

/// Row-at-a-time CSV writer: key column first, every value quoted, `\n` endings.
pub struct CsvExport<W: Write> {
    writer: csv::Writer<W>,
    width: usize,
}

impl<W: Write> CsvExport<W> {
    /// Writes the header row straight away.
    pub fn new(sink: W, schema: &Schema) -> csv::Result<Self> {
        let mut writer = builder().from_writer(sink);
        writer.write_record(std::iter::once(schema.key_name).chain(schema.field_names()))?;
        Ok(CsvExport {
            writer,
            width: schema.len(),
        })
    }

    pub fn write(&mut self, record: &Record) -> csv::Result<()> {
        debug_assert_eq!(record.len(), self.width);
        self.writer
            .write_record(std::iter::once(record.key().as_str()).chain(record.values()))
    }

    /// One row per record, in store order. A row that cannot be written is
    /// reported against its key and the rest are still written.
    pub fn write_store(&mut self, store: &RecordStore) -> Vec<PersistFailure> {
        store
            .iter()
            .filter_map(|record| {
                self.write(record).err().map(|e| PersistFailure {
                    key: record.key().to_string(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> anyhow::Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("flushing csv export: {}", e.error()))
    }
}

fn builder() -> WriterBuilder {
    let mut b = WriterBuilder::new();
    b.quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .has_headers(false);
    b
}

/// Plain three-column listing rows (`state`, `county`, `zip_code`).
pub fn listing_writer<W: Write>(sink: W) -> csv::Result<csv::Writer<W>> {
    let mut writer = builder().from_writer(sink);
    writer.write_record(["state", "county", "zip_code"])?;
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::schema::ZIP_SCHEMA;

    fn export_store(store: &RecordStore, schema: &Schema, sink: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        let mut export = CsvExport::new(sink, schema)?;
        assert!(export.write_store(store).is_empty());
        export.into_inner()
    }

    fn store() -> RecordStore {
        let mut store = RecordStore::new();
        let html = "<b>Estimated zip code population in 2016:</b> 12,345<br>";
        store.append(parser::extract(html, &"35004".into(), &ZIP_SCHEMA));
        store.append(parser::extract("", &"90210".into(), &ZIP_SCHEMA));
        store
    }

    #[test]
    fn header_and_rows() {
        let out = String::from_utf8(export_store(&store(), &ZIP_SCHEMA, Vec::new()).unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            "\"Zip Code\",\"Population\",\"Median Household Income\",\"Foreign Born Population\",\
             \"Median Resident Age\",\"Average Household Size\",\"Median House Value\",\
             \"Unemployment\",\"Land Area\""
        );
        assert!(lines[1].starts_with("\"35004\",\"12345\",\"0\",\"0.0\","));
        assert_eq!(lines[2], "\"90210\",\"0\",\"0\",\"0.0\",\"0.0\",\"0.0\",\"0\",\"0.0\",\"0.0\"");
        assert_eq!(lines.len(), 3);
        assert!(out.ends_with('\n'));
        assert!(!out.contains('\r'));
    }

    #[test]
    fn store_rows_follow_insertion_order() {
        let mut store = store();
        store.append(parser::extract("", &"35004".into(), &ZIP_SCHEMA));
        let mut export = CsvExport::new(Vec::new(), &ZIP_SCHEMA).unwrap();
        assert!(export.write_store(&store).is_empty());
        let out = String::from_utf8(export.into_inner().unwrap()).unwrap();
        let keys: Vec<&str> = out.lines().skip(1).map(|l| &l[..7]).collect();
        assert_eq!(keys, ["\"35004\"", "\"90210\"", "\"35004\""]);
    }

    #[test]
    fn export_is_deterministic() {
        let store = store();
        let a = export_store(&store, &ZIP_SCHEMA, Vec::new()).unwrap();
        let b = export_store(&store, &ZIP_SCHEMA, Vec::new()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_store_is_header_only() {
        let out = export_store(&RecordStore::new(), &ZIP_SCHEMA, Vec::new()).unwrap();
        assert_eq!(out.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn quotes_embedded_quotes() {
        let mut w = listing_writer(Vec::new()).unwrap();
        w.write_record(["NM", "Dona \"Ana\"", "88001"]).unwrap();
        w.flush().unwrap();
        let out = std::str::from_utf8(w.get_ref()).unwrap();
        assert_eq!(out, "\"state\",\"county\",\"zip_code\"\n\"NM\",\"Dona \"\"Ana\"\"\",\"88001\"\n");
    }
}
