//! The root-file marker engine.
//!
//! Root files (`AGENTS.md`, `CLAUDE.md`, …) host sections from multiple
//! packages, delimited by HTML comments:
//!
//! ```text
//! <!-- package: my-pkg id:6f9e… -->
//! …section body…
//! <!-- -->
//! ```
//!
//! The `package:` key is case-insensitive and whitespace-tolerant; the close
//! marker is shared and non-nested (the first `<!-- -->` after an open
//! closes it). Bodies are stored in the registry without markers and
//! re-wrapped on install, preserving any pre-existing id.
//!
//! This is a two-pass scanner, not a regex: locate the open marker, locate
//! the next close, yield the slice between.

use uuid::Uuid;

const COMMENT_OPEN: &str = "<!--";
const COMMENT_CLOSE: &str = "-->";
const PACKAGE_KEY: &str = "package:";

/// One parsed section of a root file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSection {
    /// The package name as written in the marker (normalized lowercase)
    pub name: String,
    /// The marker's id, if it has one
    pub id: Option<String>,
    /// The section body, without markers or their adjacent newlines
    pub body: String,
}

/// What [`ensure_marker_id_and_extract`][] found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredSection {
    /// The section body
    pub body: String,
    /// The marker's id (freshly minted if it was missing)
    pub id: String,
    /// The rewritten file contents, present only when an id was injected
    pub updated_content: Option<String>,
}

/// An open marker located in the text
struct OpenMarker {
    /// byte offset of `<!--`
    start: usize,
    /// byte offset just past `-->`
    end: usize,
    name: String,
    id: Option<String>,
}

/// Scan for the next HTML comment at or after `from`; returns
/// `(start, end_exclusive, inner)`
fn next_comment(content: &str, from: usize) -> Option<(usize, usize, &str)> {
    let start = content[from..].find(COMMENT_OPEN)? + from;
    let inner_start = start + COMMENT_OPEN.len();
    let close = content[inner_start..].find(COMMENT_CLOSE)? + inner_start;
    Some((start, close + COMMENT_CLOSE.len(), &content[inner_start..close]))
}

fn parse_open_marker(inner: &str) -> Option<(String, Option<String>)> {
    let inner = inner.trim();
    let prefix = inner.get(..PACKAGE_KEY.len())?;
    if !prefix.eq_ignore_ascii_case(PACKAGE_KEY) {
        return None;
    }
    let rest = inner[PACKAGE_KEY.len()..].trim();
    let mut tokens = rest.split_whitespace();
    let name = tokens.next()?.to_ascii_lowercase();
    let id = tokens.find_map(|token| {
        let lowered = token.to_ascii_lowercase();
        lowered.strip_prefix("id:").map(ToOwned::to_owned)
    });
    Some((name, id))
}

fn find_open_marker(content: &str, name: &str) -> Option<OpenMarker> {
    let wanted = name.to_ascii_lowercase();
    let mut cursor = 0;
    while let Some((start, end, inner)) = next_comment(content, cursor) {
        if let Some((found, id)) = parse_open_marker(inner) {
            if found == wanted {
                return Some(OpenMarker {
                    start,
                    end,
                    name: found,
                    id,
                });
            }
        }
        cursor = end;
    }
    None
}

/// Find the close marker (`<!-- -->`) at or after `from`
fn find_close_marker(content: &str, from: usize) -> Option<(usize, usize)> {
    let mut cursor = from;
    while let Some((start, end, inner)) = next_comment(content, cursor) {
        if inner.trim().is_empty() {
            return Some((start, end));
        }
        cursor = end;
    }
    None
}

fn body_between(content: &str, open_end: usize, close_start: usize) -> String {
    content[open_end..close_start]
        .trim_matches('\n')
        .to_owned()
}

/// Render a section with markers around a body
pub fn wrap_section(name: &str, id: &str, body: &str) -> String {
    format!("<!-- package: {name} id:{id} -->\n{body}\n<!-- -->")
}

/// Read-only extraction of one package's section
pub fn extract_package_section(content: &str, name: &str) -> Option<PackageSection> {
    let open = find_open_marker(content, name)?;
    let (close_start, _) = find_close_marker(content, open.end)?;
    Some(PackageSection {
        name: open.name,
        id: open.id,
        body: body_between(content, open.end, close_start),
    })
}

/// Every section in the file, in document order
pub fn extract_all_package_sections(content: &str) -> Vec<PackageSection> {
    let mut sections = vec![];
    let mut cursor = 0;
    while let Some((_, open_end, inner)) = next_comment(content, cursor) {
        cursor = open_end;
        let Some((name, id)) = parse_open_marker(inner) else {
            continue;
        };
        let Some((close_start, close_end)) = find_close_marker(content, open_end) else {
            break;
        };
        sections.push(PackageSection {
            name,
            id,
            body: body_between(content, open_end, close_start),
        });
        cursor = close_end;
    }
    sections
}

/// Extract a section for saving, minting an id into the open marker when it
/// lacks one.
///
/// Returns `None` when the file has no marker for `name` (nothing to save).
/// When an id was injected, `updated_content` carries the rewritten file so
/// the caller can persist it once.
pub fn ensure_marker_id_and_extract(content: &str, name: &str) -> Option<EnsuredSection> {
    let open = find_open_marker(content, name)?;
    let (close_start, _) = find_close_marker(content, open.end)?;
    let body = body_between(content, open.end, close_start);

    if let Some(id) = open.id {
        return Some(EnsuredSection {
            body,
            id,
            updated_content: None,
        });
    }

    let id = Uuid::new_v4().to_string();
    let mut updated = String::with_capacity(content.len() + 40);
    updated.push_str(&content[..open.start]);
    updated.push_str(&format!("<!-- package: {} id:{id} -->", open.name));
    updated.push_str(&content[open.end..]);
    Some(EnsuredSection {
        body,
        id,
        updated_content: Some(updated),
    })
}

/// Insert or replace a package's section.
///
/// An existing section keeps its open marker (and therefore its id); a new
/// section is appended with a single blank line before the open marker,
/// using `id` or a fresh UUID.
pub fn upsert_package_section(
    content: &str,
    name: &str,
    body: &str,
    id: Option<&str>,
) -> String {
    if let Some(open) = find_open_marker(content, name) {
        if let Some((close_start, _)) = find_close_marker(content, open.end) {
            let mut updated = String::with_capacity(content.len() + body.len());
            updated.push_str(&content[..open.end]);
            updated.push('\n');
            updated.push_str(body);
            updated.push('\n');
            updated.push_str(&content[close_start..]);
            return updated;
        }
    }

    let id = id
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut updated = content.to_owned();
    if !updated.is_empty() {
        while !updated.ends_with("\n\n") {
            updated.push('\n');
        }
    }
    updated.push_str(&wrap_section(&name.to_ascii_lowercase(), &id, body));
    updated.push('\n');
    updated
}

/// Delete a package's markers and body. Returns the rewritten contents, or
/// `None` if the file had no such section.
pub fn remove_package_section(content: &str, name: &str) -> Option<String> {
    let open = find_open_marker(content, name)?;
    let (_, close_end) = find_close_marker(content, open.end)?;
    let mut start = open.start;
    // also eat the blank line that introduced the section
    while start > 0 && content.as_bytes()[start - 1] == b'\n' {
        start -= 1;
    }
    let mut rest = &content[close_end..];
    if rest.starts_with('\n') {
        rest = &rest[1..];
    }
    let mut updated = String::with_capacity(content.len());
    updated.push_str(&content[..start]);
    if !updated.is_empty() && !rest.trim().is_empty() {
        updated.push('\n');
    }
    updated.push_str(rest);
    Some(updated)
}

/// Whether a root file is now just whitespace (and can be deleted)
pub fn is_effectively_empty(content: &str) -> bool {
    content.trim().is_empty()
}
