use std::fmt;

use serde::Serialize;

/// Identifier of one county (`AL-Autauga-County`) or one zip code (`35004`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(key: impl Into<String>) -> Self {
        EntityKey(key.into())
    }

    /// `state` + `county` with spaces turned into dashes, as the county pages name them.
    pub fn county(state: &str, county: &str) -> Self {
        let name = county.trim().split_whitespace().collect::<Vec<_>>().join("-");
        EntityKey(format!("{}-{}", state.trim(), name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        EntityKey::new(s)
    }
}

/// One extracted document: a value for every schema field, in schema order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    key: EntityKey,
    fields: Vec<(&'static str, String)>,
}

impl Record {
    pub(crate) fn new(key: EntityKey, fields: Vec<(&'static str, String)>) -> Self {
        Record { key, fields }
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, v)| v.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// Append-only accumulator between extraction and persistence.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<Record>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a RecordStore {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(key: &str) -> Record {
        Record::new(key.into(), vec![("Population", "1".to_string())])
    }

    #[test]
    fn county_key_joins_words() {
        assert_eq!(EntityKey::county("AL", "Autauga County").as_str(), "AL-Autauga-County");
        assert_eq!(EntityKey::county(" NM ", "Dona  Ana County\r").as_str(), "NM-Dona-Ana-County");
    }

    #[test]
    fn store_keeps_insertion_order_and_duplicates() {
        let mut store = RecordStore::new();
        store.append(rec("90210"));
        store.append(rec("35004"));
        store.append(rec("90210"));

        let keys: Vec<_> = store.iter().map(|r| r.key().as_str()).collect();
        assert_eq!(keys, ["90210", "35004", "90210"]);

        // iteration restarts from the beginning every time
        assert_eq!(store.iter().count(), 3);
        assert_eq!((&store).into_iter().count(), 3);
    }

    #[test]
    fn record_lookup_by_name() {
        let r = rec("35004");
        assert_eq!(r.get("Population"), Some("1"));
        assert_eq!(r.get("Missing"), None);
        assert_eq!(r.len(), 1);
    }
}
