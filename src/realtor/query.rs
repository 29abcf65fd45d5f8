//! Query strings derived from agent records.

use super::record::AgentRecord;

/// State appended to extraction queries when none is configured.
pub const DEFAULT_STATE: &str = "North Dakota";

const SEARCH_SUFFIX: &str = "(email OR contact)";
const EXTRACTION_KEYWORD: &str = "real estate";

/// Web search query: quoted name, company and city, then `(email OR contact)`.
///
/// Blank fields are left out, so a record with none of them still yields a
/// usable query.
pub fn search_query(record: &AgentRecord) -> String {
    let mut parts: Vec<String> = [record.name(), record.company(), record.city()]
        .into_iter()
        .flatten()
        .map(|part| format!("\"{}\"", part))
        .collect();
    parts.push(SEARCH_SUFFIX.to_string());
    parts.join(" ")
}

/// Description of the agent handed to the language model alongside the
/// search results: name, company, city, county and state, then `real estate`.
pub fn extraction_query(record: &AgentRecord, state: Option<&str>) -> String {
    let state = state.map(str::trim).filter(|s| !s.is_empty());
    let mut parts: Vec<&str> = [
        record.name(),
        record.company(),
        record.city(),
        record.county(),
        state,
    ]
    .into_iter()
    .flatten()
    .collect();
    parts.push(EXTRACTION_KEYWORD);
    parts.join(" ")
}

/// Drops every non-ASCII character.
pub fn ascii_only(text: &str) -> String {
    text.chars().filter(char::is_ascii).collect()
}
