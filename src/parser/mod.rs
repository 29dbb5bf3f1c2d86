pub mod listing;
pub mod normalize;
pub mod rules;

use std::collections::HashMap;

use tracing::debug;

use crate::record::{EntityKey, Record};
use crate::schema::{Rule, Schema};

/// Builds one record from a raw document. Never fails: any field whose anchor is
/// absent, or whose value cannot be sliced or normalized, keeps its default.
///
/// Lines are scanned in order. On each line, the unresolved fields whose anchor
/// occurs there are tried in the order their anchors appear, so badge fields
/// consume shared markers in document order. The first successful value wins.
pub fn extract(raw: &str, key: &EntityKey, schema: &Schema) -> Record {
    let mut values: Vec<Option<String>> = vec![None; schema.len()];
    let mut cursors: HashMap<&str, usize> = HashMap::new();
    let mut line_start = 0;

    for line in raw.split('\n') {
        let mut hits: Vec<(usize, usize)> = schema
            .fields
            .iter()
            .enumerate()
            .filter(|(i, _)| values[*i].is_none())
            .filter_map(|(i, f)| line.find(f.anchor).map(|pos| (pos, i)))
            .collect();
        hits.sort_unstable();

        for (pos, i) in hits {
            let field = &schema.fields[i];
            let after_anchor = pos + field.anchor.len();
            let tail = &line[after_anchor..];

            let sliced = match field.rule {
                Rule::TagBounded { after, marker, offset, strip } => {
                    rules::tag_bounded(tail, after, marker, offset, strip)
                }
                Rule::Parenthesized { strip_sign } => rules::parenthesized(tail, strip_sign),
                Rule::Badge { marker } => {
                    let cursor = cursors.entry(marker).or_insert(0);
                    rules::badge(raw, line_start + after_anchor, cursor, marker)
                }
            };

            match sliced.and_then(|s| normalize::apply(field.normalize, s)) {
                Some(value) => values[i] = Some(value),
                None => debug!(key = %key, field = field.name, raw = ?sliced, "extraction miss"),
            }
        }

        line_start += line.len() + 1;
    }

    let fields = schema
        .fields
        .iter()
        .zip(values)
        .map(|(field, value)| {
            let value = value.unwrap_or_else(|| {
                debug!(key = %key, field = field.name, "no value found, using default");
                field.default.to_string()
            });
            (field.name, value)
        })
        .collect();

    Record::new(key.clone(), fields)
}

// ── Tests ──
