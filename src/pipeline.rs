use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rayon::prelude::*;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::db::ListingRow;
use crate::fetch::{Fetch, UrlTemplate};
use crate::parser;
use crate::persist::{PersistReport, Sinks};
use crate::record::{EntityKey, Record, RecordStore};
use crate::schema::Schema;
use crate::seeds::CountySeed;

/// Request slots spaced `interval` apart, shared by every worker. The slot is
/// taken before the request goes out, so the spacing holds whatever happens to
/// the previous key.
pub struct Pacer {
    interval: Duration,
    next: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Pacer {
            interval,
            next: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut next = self.next.lock().await;
        if let Some(at) = *next {
            tokio::time::sleep_until(at).await;
        }
        *next = Some(Instant::now() + self.interval);
    }
}

/// Counters for one run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub keys: usize,
    pub fetched: usize,
    pub fetch_errors: usize,
    pub persisted: PersistReport,
    pub interrupted: bool,
}

/// Fetch → extract → append (→ persist) for every key.
pub struct Driver<F> {
    fetcher: Arc<F>,
    schema: &'static Schema,
    urls: UrlTemplate,
    pacer: Arc<Pacer>,
    concurrency: usize,
}

impl<F: Fetch + 'static> Driver<F> {
    pub fn new(
        fetcher: Arc<F>,
        schema: &'static Schema,
        urls: UrlTemplate,
        pace: Duration,
        concurrency: usize,
    ) -> Self {
        Driver {
            fetcher,
            schema,
            urls,
            pacer: Arc::new(Pacer::new(pace)),
            concurrency: concurrency.max(1),
        }
    }

    /// Processes `keys` in order. With `sinks`, each record is persisted as soon
    /// as it is appended. Setting `stop` ends the run before the next key.
    pub async fn run(
        &self,
        keys: Vec<EntityKey>,
        store: &mut RecordStore,
        mut sinks: Option<&mut Sinks>,
        stop: &Arc<AtomicBool>,
        pb: &ProgressBar,
    ) -> RunSummary {
        let mut summary = RunSummary {
            keys: keys.len(),
            ..Default::default()
        };

        let mut accept = |fetched: bool, record: Record, summary: &mut RunSummary| {
            if fetched {
                summary.fetched += 1;
            } else {
                summary.fetch_errors += 1;
            }
            if let Some(sinks) = sinks.as_deref_mut() {
                summary.persisted.merge(sinks.persist_one(&record));
            }
            store.append(record);
            pb.inc(1);
        };

        if self.concurrency == 1 {
            for key in keys {
                if stop.load(Ordering::SeqCst) {
                    summary.interrupted = true;
                    break;
                }
                let (fetched, record) =
                    fetch_and_extract(&*self.fetcher, &self.pacer, &self.urls, self.schema, key).await;
                accept(fetched, record, &mut summary);
            }
            return summary;
        }

        // Workers finish out of order; the buffer hands records on in key order.
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) =
            tokio::sync::mpsc::channel::<(usize, Option<(bool, Record)>)>(self.concurrency * 2);

        for (idx, key) in keys.into_iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let pacer = Arc::clone(&self.pacer);
            let sem = Arc::clone(&semaphore);
            let stop = Arc::clone(stop);
            let urls = self.urls.clone();
            let schema = self.schema;
            let tx = tx.clone();

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                let outcome = if stop.load(Ordering::SeqCst) {
                    None
                } else {
                    Some(fetch_and_extract(&*fetcher, &pacer, &urls, schema, key).await)
                };
                let _ = tx.send((idx, outcome)).await;
            });
        }
        drop(tx);

        let mut pending = BTreeMap::new();
        let mut next_idx = 0;
        while let Some((idx, outcome)) = rx.recv().await {
            pending.insert(idx, outcome);
            while let Some(outcome) = pending.remove(&next_idx) {
                if let Some((fetched, record)) = outcome {
                    accept(fetched, record, &mut summary);
                }
                next_idx += 1;
            }
        }
        // only non-empty if a worker died without reporting
        for (_, outcome) in pending {
            if let Some((fetched, record)) = outcome {
                accept(fetched, record, &mut summary);
            }
        }

        summary.interrupted = stop.load(Ordering::SeqCst);
        summary
    }
}

async fn fetch_and_extract<F: Fetch>(
    fetcher: &F,
    pacer: &Pacer,
    urls: &UrlTemplate,
    schema: &Schema,
    key: EntityKey,
) -> (bool, Record) {
    let (body, fetched) = fetch_document(fetcher, pacer, urls, &key).await;
    (fetched, parser::extract(&body, &key, schema))
}

/// A failed fetch yields empty text so the key still gets an all-default record.
async fn fetch_document<F: Fetch>(
    fetcher: &F,
    pacer: &Pacer,
    urls: &UrlTemplate,
    key: &EntityKey,
) -> (String, bool) {
    pacer.wait().await;
    let url = urls.url_for(key);
    match fetcher.fetch(&url).await {
        Ok(body) => (body, true),
        Err(e) => {
            warn!(key = %key, error = %e, "fetch failed, record falls back to defaults");
            (String::new(), false)
        }
    }
}

// ── County discovery ──

/// Fetches each county page and collects the zip codes it lists.
pub async fn discover<F: Fetch>(
    fetcher: &F,
    urls: &UrlTemplate,
    pace: Duration,
    counties: &[CountySeed],
    stop: &AtomicBool,
    pb: &ProgressBar,
) -> (Vec<ListingRow>, usize) {
    let pacer = Pacer::new(pace);
    let mut rows = Vec::new();
    let mut errors = 0;

    for seed in counties {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let key = seed.key();
        let (body, fetched) = fetch_document(fetcher, &pacer, urls, &key).await;
        if !fetched {
            errors += 1;
        }
        let codes = parser::listing::zip_codes(&body);
        info!(county = %key, zip_codes = codes.len(), "county listed");
        rows.extend(codes.into_iter().map(|zip_code| ListingRow {
            state: seed.state.clone(),
            county: seed.county.clone(),
            zip_code,
        }));
        pb.inc(1);
    }
    (rows, errors)
}

// ── Offline extraction ──

/// Extracts every `<key>.html` in `dir`, in parallel, into a store ordered by key.
pub fn extract_documents(dir: &Path, schema: &Schema, pb: &ProgressBar) -> Result<RecordStore> {
    let mut docs: Vec<(EntityKey, std::path::PathBuf)> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "html"))
        .filter_map(|p| {
            let key = EntityKey::new(p.file_stem()?.to_str()?);
            Some((key, p))
        })
        .collect();
    docs.sort();
    pb.set_length(docs.len() as u64);

    let records: Vec<Record> = docs
        .par_iter()
        .map(|(key, path)| {
            let body = std::fs::read_to_string(path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "unreadable document");
                String::new()
            });
            let record = parser::extract(&body, key, schema);
            pb.inc(1);
            record
        })
        .collect();

    let mut store = RecordStore::new();
    for record in records {
        store.append(record);
    }
    Ok(store)
}
