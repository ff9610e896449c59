use regex::{Regex, RegexBuilder};

/// Case-insensitive literal matcher for the active search text.
pub fn build_highlight_regex(search: &str) -> Option<Regex> {
    let needle = search.trim_end_matches(['\r', '\n']);
    if needle.is_empty() {
        return None;
    }
    RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Splits `text` into runs, flagging the ones the search matched.
pub fn split_matches<'a>(text: &'a str, regex: Option<&Regex>) -> Vec<(&'a str, bool)> {
    let Some(regex) = regex else {
        return vec![(text, false)];
    };
    let mut runs = Vec::new();
    let mut last = 0;
    for found in regex.find_iter(text) {
        if found.start() > last {
            runs.push((&text[last..found.start()], false));
        }
        runs.push((found.as_str(), true));
        last = found.end();
    }
    if last < text.len() || runs.is_empty() {
        runs.push((&text[last..], false));
    }
    runs
}
