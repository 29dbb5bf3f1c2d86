use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static ZIP_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"title="ZIP Code (\d{5})""#).unwrap());

const STAT_TABLE: &str = "class=\"statTable\"";

/// Zip codes listed in the stat table of a county page, in page order.
pub fn zip_codes(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.lines()
        .filter(|line| line.contains(STAT_TABLE))
        .flat_map(|line| ZIP_TITLE_RE.captures_iter(line))
        .map(|caps| caps[1].to_string())
        .filter(|code| seen.insert(code.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn county_fixture_listing() {
        let html = std::fs::read_to_string("tests/fixtures/county_al_autauga.html").unwrap();
        assert_eq!(zip_codes(&html), ["36003", "36006", "36008", "36066", "36067"]);
    }

    #[test]
    fn ignores_titles_outside_stat_table() {
        let html = "<a title=\"ZIP Code 99999\">\n\
                    <table class=\"statTable\"><a title=\"ZIP Code 01001\"></a><a title=\"ZIP Code 01001\"></a>";
        assert_eq!(zip_codes(html), ["01001"]);
    }

    #[test]
    fn empty_page_lists_nothing() {
        assert!(zip_codes("").is_empty());
    }
}
