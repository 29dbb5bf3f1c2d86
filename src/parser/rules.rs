//! Slicing strategies. Each takes the text that follows a matched anchor and
//! returns the raw value, or `None` when a delimiter it needs is missing.

use std::iter;

const DELIMITERS: [&str; 2] = [" ", "<"];

/// `</b> 12,345<br>` -> `12,345`.
pub fn tag_bounded<'a>(
    tail: &'a str,
    after: Option<&str>,
    marker: &str,
    offset: usize,
    strip: Option<char>,
) -> Option<&'a str> {
    let mut pos = 0;
    if let Some(label) = after {
        pos = tail.find(label)? + label.len();
    }
    let start = pos + tail[pos..].find(marker)? + marker.len() + offset;
    let rest = tail.get(start..)?;
    let end = DELIMITERS
        .iter()
        .copied()
        .chain(iter::once(marker))
        .filter_map(|d| rest.find(d))
        .min()?;
    let value = &rest[..end];
    Some(match strip {
        Some(c) => value.strip_prefix(c).unwrap_or(value),
        None => value,
    })
}

/// `1,234 (5.6%)` -> `5.6%`.
pub fn parenthesized(tail: &str, strip_sign: bool) -> Option<&str> {
    let open = tail.find('(')? + 1;
    let close = open + tail[open..].find(')')?;
    let value = &tail[open..close];
    if strip_sign {
        if let Some(first) = value.chars().next().filter(|c| !c.is_ascii_digit()) {
            return Some(&value[first.len_utf8()..]);
        }
    }
    Some(value)
}

/// Claims the first `marker` at or after both `from` and `cursor` in the whole
/// document. The cursor moves past every claimed marker, so the Nth badge anchor
/// pairs with the Nth marker occurrence in document order.
pub fn badge<'a>(text: &'a str, from: usize, cursor: &mut usize, marker: &str) -> Option<&'a str> {
    let search = from.max(*cursor);
    let start = search + text.get(search..)?.find(marker)? + marker.len();
    *cursor = start;
    let rest = &text[start..];
    let end = DELIMITERS
        .iter()
        .copied()
        .chain(iter::once("\n"))
        .filter_map(|d| rest.find(d))
        .min()?;
    Some(&rest[..end])
}
