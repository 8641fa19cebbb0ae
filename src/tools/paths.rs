//! `@path` references
//!
//! Claude Code resolves file references written as `@relative/path`. Tools
//! rewrite user-supplied paths into that form before building prompts.

use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Source-like file paths in free text, e.g. `src/lib.rs` or `./a/b.tsx`.
static SOURCE_PATH: OnceLock<Regex> = OnceLock::new();

fn source_path_regex() -> &'static Regex {
    SOURCE_PATH.get_or_init(|| {
        Regex::new(
            r"(\./)?\b([A-Za-z0-9_-]+/)*[A-Za-z0-9_-]+\.(js|jsx|ts|tsx|py|java|cpp|c|h|go|rb|php|swift|kt|rs|vue|svelte|json|xml|yaml|yml|md|txt|css|scss|less|html)\b",
        )
        .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Format one path as an `@` reference.
///
/// A single leading `/` is dropped; paths already starting with `@` are
/// returned unchanged. Empty input stays empty.
#[must_use]
pub fn format_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let clean = path.strip_prefix('/').unwrap_or(path);
    if clean.starts_with('@') {
        clean.to_string()
    } else {
        format!("@{clean}")
    }
}

/// Format every path in `paths`.
#[must_use]
pub fn format_paths<S: AsRef<str>>(paths: &[S]) -> Vec<String> {
    paths.iter().map(|p| format_path(p.as_ref())).collect()
}

/// Whether `path` is already an `@` reference.
#[must_use]
pub fn is_claude_code_path(path: &str) -> bool {
    path.starts_with('@')
}

/// Strip the `@` prefix, if any.
#[must_use]
pub fn extract_file_path(path: &str) -> &str {
    path.strip_prefix('@').unwrap_or(path)
}

/// Rewrite paths mentioned in `text` as `@` references.
///
/// `known_paths` are replaced first (whole-token matches), then anything
/// that looks like a source file. A path already preceded by `@`, or sitting
/// inside a URL, is left untouched.
#[must_use]
pub fn format_paths_in_text<S: AsRef<str>>(text: &str, known_paths: &[S]) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut formatted = text.to_string();
    for known in known_paths {
        let known = known.as_ref();
        if known.is_empty() || is_claude_code_path(known) {
            continue;
        }
        let Ok(re) = Regex::new(&known_path_pattern(known)) else {
            continue;
        };
        let replacement = format_path(known);
        formatted = replace_unprefixed(&re, &formatted, |_| replacement.clone());
    }

    replace_unprefixed(source_path_regex(), &formatted, format_path)
}

/// Pattern for an exact known path, with word boundaries only where the
/// path itself starts or ends with a word character.
fn known_path_pattern(path: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let lead = if path.starts_with(is_word) { r"\b" } else { "" };
    let trail = if path.ends_with(is_word) { r"\b" } else { "" };
    format!("{lead}{}{trail}", regex::escape(path))
}

/// Replace matches of `re` in `text` with `render(match)`, skipping matches
/// already prefixed with `@` or embedded in a URL.
fn replace_unprefixed<F>(re: &Regex, text: &str, render: F) -> String
where
    F: Fn(&str) -> String,
{
    re.replace_all(text, |caps: &Captures<'_>| {
        let Some(m) = caps.get(0) else {
            return String::new();
        };
        if is_referenced(text, m.start()) || in_url(text, m.start(), m.end()) {
            m.as_str().to_string()
        } else {
            render(m.as_str())
        }
    })
    .into_owned()
}

fn is_referenced(text: &str, start: usize) -> bool {
    text[..start].ends_with('@')
}

/// Whether the whitespace-delimited token around `start..end` is a URL.
fn in_url(text: &str, start: usize, end: usize) -> bool {
    let token_start = text[..start]
        .rfind(char::is_whitespace)
        .map_or(0, |i| i + 1);
    let token_end = text[end..]
        .find(char::is_whitespace)
        .map_or(text.len(), |i| end + i);
    text[token_start..token_end].contains("://")
}
