//! Clean-up rules applied to every value a source returns.

use std::sync::LazyLock;

use regex::Regex;

/// Placeholder some registries print instead of leaving a field blank.
const PLACEHOLDER: &str = "N/A";

static ACTIVITY_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2,3}[-.]?\d{2,3}$").expect("valid activity code regex"));

/// Collapse runs of whitespace (including newlines) into single spaces.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip quotes and excess whitespace from a company name.
/// Returns `None` for blank or placeholder values.
pub fn clean_company_name(raw: &str) -> Option<String> {
    let cleaned = collapse_whitespace(&raw.replace('"', ""));
    non_placeholder(cleaned)
}

/// Normalise an activity code: `62-01` becomes `62.01`.
/// Returns `None` for blank or placeholder values.
pub fn clean_activity_code(raw: &str) -> Option<String> {
    let cleaned = raw.trim();
    let cleaned = if ACTIVITY_CODE.is_match(cleaned) {
        cleaned.replace('-', ".")
    } else {
        cleaned.to_string()
    };
    non_placeholder(cleaned)
}

/// Collapse whitespace in a free-text description.
pub fn clean_description(raw: &str) -> Option<String> {
    non_placeholder(collapse_whitespace(raw))
}

fn non_placeholder(s: String) -> Option<String> {
    if s.is_empty() || s.eq_ignore_ascii_case(PLACEHOLDER) {
        None
    } else {
        Some(s)
    }
}
