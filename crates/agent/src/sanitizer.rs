//! Response sanitizer.
//!
//! Models sometimes repeat their attribution block ("Sources: ...") two or
//! more times. [`sanitize`] collects every attribution block, removes them
//! from the body and emits exactly one trailing `Sources:` line with one
//! entry per source name, in first-seen order.
//!
//! An entry's name is its text before any parenthesized detail, compared
//! case-insensitively. Entries sharing a name are merged and their details
//! listed together: `Travel guide (a#1)` and `Travel guide (a#3)` become
//! `Travel guide (a#1, a#3)`.
//!
//! Text without any attribution block is returned unchanged, which makes
//! the function idempotent.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static SOURCES_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[ \t>*_#]*sources?[*_]*[ \t]*:[*_]*[ \t]*(.*)$")
        .expect("sources header pattern is valid")
});

static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t]*(?:[-*•]|\d+[.)])[ \t]+(.+)$").expect("list item pattern is valid")
});

/// Body text with attribution blocks removed, plus the entries they listed.
struct Extracted {
    body: String,
    entries: Vec<String>,
    found_block: bool,
}

/// Split on `,` and `;` outside parentheses.
fn split_entries(raw: &str, out: &mut Vec<String>) {
    let mut depth = 0usize;
    let mut start = 0;
    let mut push = |piece: &str| {
        let entry = piece.trim().trim_matches(|c: char| c == '*' || c == '_').trim();
        if !entry.is_empty() {
            out.push(entry.to_string());
        }
    };
    for (i, c) in raw.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' | ';' if depth == 0 => {
                push(&raw[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    push(&raw[start..]);
}

fn extract(text: &str) -> Extracted {
    let mut body: Vec<&str> = Vec::new();
    let mut entries = Vec::new();
    let mut found_block = false;
    let mut in_block = false;

    for line in text.lines() {
        if let Some(caps) = SOURCES_HEADER.captures(line) {
            found_block = true;
            in_block = true;
            split_entries(caps.get(1).map_or("", |m| m.as_str()), &mut entries);
            continue;
        }
        if in_block {
            if let Some(caps) = LIST_ITEM.captures(line) {
                split_entries(caps.get(1).map_or("", |m| m.as_str()), &mut entries);
                continue;
            }
            in_block = false;
        }
        body.push(line);
    }

    Extracted {
        body: body.join("\n").trim_end().to_string(),
        entries,
        found_block,
    }
}

/// `"Travel guide (a#1, a#2)"` → `("Travel guide", ["a#1", "a#2"])`.
fn split_attribution(entry: &str) -> (&str, Vec<&str>) {
    match (entry.find('('), entry.rfind(')')) {
        (Some(open), Some(close)) if open > 0 && close > open => (
            entry[..open].trim(),
            entry[open + 1..close]
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .collect(),
        ),
        _ => (entry, Vec::new()),
    }
}

struct Attribution {
    name: String,
    details: Vec<String>,
}

impl Attribution {
    fn render(&self) -> String {
        if self.details.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.details.join(", "))
        }
    }
}

/// One entry per source name, first-seen order, details merged.
pub fn dedupe_sources<I, S>(sources: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut merged: Vec<Attribution> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for source in sources {
        let source = source.as_ref().trim();
        if source.is_empty() {
            continue;
        }
        let (name, details) = split_attribution(source);
        let slot = *index.entry(name.to_lowercase()).or_insert_with(|| {
            merged.push(Attribution {
                name: name.to_string(),
                details: Vec::new(),
            });
            merged.len() - 1
        });
        let known = &mut merged[slot].details;
        for detail in details {
            if !known.iter().any(|d| d.eq_ignore_ascii_case(detail)) {
                known.push(detail.to_string());
            }
        }
    }
    merged.iter().map(Attribution::render).collect()
}

fn render(body: &str, sources: &[String]) -> String {
    if sources.is_empty() {
        return body.to_string();
    }
    let line = format!("Sources: {}", sources.join(", "));
    if body.is_empty() {
        line
    } else {
        format!("{body}\n\n{line}")
    }
}

/// Collapse duplicate attribution blocks into a single trailing line.
pub fn sanitize(text: &str) -> String {
    let extracted = extract(text);
    if !extracted.found_block {
        return text.to_string();
    }
    render(&extracted.body, &dedupe_sources(&extracted.entries))
}

/// Like [`sanitize`], but merges `extra` attributions (from capability
/// observations) after the ones the model cited.
///
/// Returns the final text and the merged source list.
pub fn sanitize_with_sources(text: &str, extra: &[String]) -> (String, Vec<String>) {
    let extracted = extract(text);
    let sources = dedupe_sources(extracted.entries.iter().chain(extra));
    if !extracted.found_block && sources.is_empty() {
        return (text.to_string(), sources);
    }
    (render(&extracted.body, &sources), sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_sources_lines(text: &str) -> usize {
        text.lines()
            .filter(|l| l.trim_start().to_lowercase().starts_with("sources:"))
            .count()
    }

    #[test]
    fn duplicate_blocks_collapse_to_one() {
        let raw = "Expect showers on Saturday.\n\nSources: Open-Meteo\n\nSources: Open-Meteo";
        let clean = sanitize(raw);
        assert_eq!(clean, "Expect showers on Saturday.\n\nSources: Open-Meteo");
        assert_eq!(count_sources_lines(&clean), 1);
    }

    #[test]
    fn entries_from_all_blocks_are_merged() {
        let raw = "Budget is about $500.\nSources:\n- Travel guide (tasmania.md#2)\n\
                   - Budget estimator\n\nSource: budget estimator, Open-Meteo";
        assert_eq!(
            sanitize(raw),
            "Budget is about $500.\n\n\
             Sources: Travel guide (tasmania.md#2), Budget estimator, Open-Meteo"
        );
    }

    #[test]
    fn entries_from_one_source_share_a_single_attribution() {
        let raw = "Try the Dove Lake circuit.\n\
                   Sources: Travel guide (tas.md#1), travel guide (tas.md#3)\n\
                   Sources: Travel Guide (tas.md#1), Open-Meteo";
        let clean = sanitize(raw);
        assert_eq!(
            clean,
            "Try the Dove Lake circuit.\n\nSources: Travel guide (tas.md#1, tas.md#3), Open-Meteo"
        );
        assert_eq!(sanitize(&clean), clean);
    }

    #[test]
    fn observed_passages_merge_into_the_cited_source() {
        let (text, sources) = sanitize_with_sources(
            "Hike at dawn.\nSources: Travel guide (tas.md#2)",
            &[
                "Travel guide (tas.md#2)".to_string(),
                "Travel guide (tas.md#5)".to_string(),
            ],
        );
        assert_eq!(sources, vec!["Travel guide (tas.md#2, tas.md#5)"]);
        assert_eq!(text, "Hike at dawn.\n\nSources: Travel guide (tas.md#2, tas.md#5)");
    }

    #[test]
    fn markdown_headers_are_recognized() {
        let raw = "Sunny.\n\n**Sources:** Open-Meteo\n**Sources:** Open-Meteo";
        assert_eq!(sanitize(raw), "Sunny.\n\nSources: Open-Meteo");
    }

    #[test]
    fn text_after_block_is_kept() {
        let raw = "Part one.\nSources: A\nPart two.\nSources: B";
        assert_eq!(sanitize(raw), "Part one.\nPart two.\n\nSources: A, B");
    }

    #[test]
    fn text_without_sources_is_unchanged() {
        let raw = "  Hobart is lovely in autumn.  \n";
        assert_eq!(sanitize(raw), raw);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "",
            "plain text",
            "Answer\nSources: a, A, b\nSources: b; c",
            "Sources:",
            "x\nSources:\n1. one\n2) two\n* three\n\nmore text\nsources: ONE",
            "**Source**: https://example.org/a, https://example.org/b\n\n\n",
        ];
        for sample in samples {
            let once = sanitize(sample);
            assert_eq!(sanitize(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn observation_sources_are_appended() {
        let (text, sources) = sanitize_with_sources(
            "Three days of rain.\nSources: Open-Meteo",
            &["open-meteo".to_string(), "Travel guide (tas.md#1)".to_string()],
        );
        assert_eq!(sources, vec!["Open-Meteo", "Travel guide (tas.md#1)"]);
        assert_eq!(
            text,
            "Three days of rain.\n\nSources: Open-Meteo, Travel guide (tas.md#1)"
        );
        assert_eq!(sanitize(&text), text);
    }

    #[test]
    fn no_sources_anywhere_leaves_text_alone() {
        let (text, sources) = sanitize_with_sources("Hello!", &[]);
        assert_eq!(text, "Hello!");
        assert!(sources.is_empty());
    }
}
