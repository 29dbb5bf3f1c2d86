use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::error::StartupError;
use crate::record::EntityKey;
use crate::schema::EntityKind;

static ZIP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{5}$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountySeed {
    pub state: String,
    pub county: String,
}

impl CountySeed {
    pub fn key(&self) -> EntityKey {
        EntityKey::county(&self.state, &self.county)
    }
}

pub fn load_keys(path: &Path, kind: EntityKind) -> Result<Vec<EntityKey>, StartupError> {
    let keys: Vec<EntityKey> = match kind {
        EntityKind::Zip => parse_zip_list(&read(path)?),
        EntityKind::County => load_counties(path)?.iter().map(CountySeed::key).collect(),
    };
    info!(path = %path.display(), kind = %kind, keys = keys.len(), "seed list loaded");
    Ok(keys)
}

pub fn load_counties(path: &Path) -> Result<Vec<CountySeed>, StartupError> {
    parse_county_list(read(path)?.as_bytes()).map_err(|source| StartupError::SeedFormat {
        path: path.to_path_buf(),
        source,
    })
}

fn read(path: &Path) -> Result<String, StartupError> {
    std::fs::read_to_string(path).map_err(|source| StartupError::Seeds {
        path: path.to_path_buf(),
        source,
    })
}

/// Whitespace separated five digit codes; anything else is skipped with a warning.
pub fn parse_zip_list(text: &str) -> Vec<EntityKey> {
    text.split_whitespace()
        .filter(|token| {
            let ok = ZIP_RE.is_match(token);
            if !ok {
                warn!(token, "skipping malformed zip code");
            }
            ok
        })
        .map(EntityKey::from)
        .collect()
}

/// One zip code per line, first occurrence only, for a later zip run.
pub fn zip_list_text<'a>(codes: impl IntoIterator<Item = &'a str>) -> String {
    let mut seen = HashSet::new();
    codes
        .into_iter()
        .filter(|code| seen.insert(*code))
        .map(|code| format!("{}\n", code))
        .collect()
}

/// `STATE,County Name` lines without a header row.
pub fn parse_county_list<R: Read>(input: R) -> csv::Result<Vec<CountySeed>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut seeds = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row?;
        match (row.get(0), row.get(1)) {
            (Some(state), Some(county)) if !state.is_empty() && !county.is_empty() => {
                seeds.push(CountySeed {
                    state: state.to_string(),
                    county: county.to_string(),
                });
            }
            _ => warn!(line = line + 1, "skipping county seed without state and name"),
        }
    }
    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_list_tokens() {
        let keys = parse_zip_list("35004 90210\n\n01001\r\n8800 abcde\n");
        let keys: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        assert_eq!(keys, ["35004", "90210", "01001"]);
    }

    #[test]
    fn zip_list_skips_codes_shared_by_counties() {
        let text = zip_list_text(["36003", "36006", "36003", "01001"]);
        assert_eq!(text, "36003\n36006\n01001\n");
        assert_eq!(parse_zip_list(&text).len(), 3);
    }

    #[test]
    fn county_list_lines() {
        let input = "AL,Autauga County\nNM, Dona Ana County \r\n\nTX\n";
        let seeds = parse_county_list(input.as_bytes()).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[1].state, "NM");
        assert_eq!(seeds[1].county, "Dona Ana County");
        assert_eq!(seeds[1].key().as_str(), "NM-Dona-Ana-County");
    }

    #[test]
    fn missing_seed_file_is_fatal() {
        let err = load_keys(Path::new("does/not/exist.txt"), EntityKind::Zip).unwrap_err();
        assert!(matches!(err, StartupError::Seeds { .. }));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("counties.csv");
        std::fs::write(&path, "AL,Autauga County\nAL,Baldwin County\n").unwrap();
        let keys = load_keys(&path, EntityKind::County).unwrap();
        assert_eq!(keys, vec![EntityKey::from("AL-Autauga-County"), EntityKey::from("AL-Baldwin-County")]);
    }
}
