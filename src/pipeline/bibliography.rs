//! Bibliography: BibTeX reading and reference-unit rendering.
//!
//! Only entries whose key was cited in the body survive. Each one yields a
//! Markdown link-reference definition (`[3]: url "citation"`), which makes
//! the `[[3]]` citation links in the body resolve, plus a compact visible
//! reference line for the end of the document.

use super::context::CitationTable;
use super::files::load_source;
use crate::error::Tex2MdError;
use crate::output::{ContentUnit, UnitKind};
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One parsed `@type{key, field = value, …}` record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BibEntry {
    /// Lower-cased entry type (`article`, `inproceedings`, …).
    pub kind: String,
    pub key: String,
    /// Lower-cased field name → value with outer delimiters removed.
    pub fields: HashMap<String, String>,
}

impl BibEntry {
    /// A non-empty field value.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

const SKIPPED_KINDS: &[&str] = &["comment", "string", "preamble"];

/// Parse every entry of a BibTeX database.
///
/// The reader tracks brace depth so nested groups in values survive
/// intact. Malformed entries are skipped.
pub fn parse_bibtex(text: &str) -> Vec<BibEntry> {
    let bytes = text.as_bytes();
    let mut entries = Vec::new();
    let mut cursor = 0;

    while let Some(at) = text[cursor..].find('@').map(|i| cursor + i) {
        let kind_end = text[at + 1..]
            .find(|c: char| !c.is_ascii_alphanumeric())
            .map_or(text.len(), |i| at + 1 + i);
        let kind = text[at + 1..kind_end].to_ascii_lowercase();

        let open = kind_end + count_whitespace(&text[kind_end..]);
        let close_char = match bytes.get(open) {
            Some(b'{') => b'}',
            Some(b'(') => b')',
            _ => {
                cursor = at + 1;
                continue;
            }
        };
        let Some(close) = matching_close(bytes, open, close_char) else {
            break;
        };
        cursor = close + 1;

        if kind.is_empty() || SKIPPED_KINDS.contains(&kind.as_str()) {
            continue;
        }
        let body = &text[open + 1..close];
        let (key, rest) = body.split_once(',').unwrap_or((body, ""));
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        entries.push(BibEntry {
            kind,
            key: key.to_string(),
            fields: parse_fields(rest),
        });
    }
    entries
}

fn count_whitespace(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

/// Index of the delimiter closing the group opened at `open`.
fn matching_close(bytes: &[u8], open: usize, close: u8) -> Option<usize> {
    let opener = bytes[open];
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b if b == opener => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn parse_fields(text: &str) -> HashMap<String, String> {
    let bytes = text.as_bytes();
    let mut fields = HashMap::new();
    let mut i = 0;

    while i < bytes.len() {
        let Some(eq) = text[i..].find('=').map(|j| i + j) else {
            break;
        };
        let name = text[i..eq]
            .trim_matches(|c: char| c.is_whitespace() || c == ',')
            .to_ascii_lowercase();
        let start = eq + 1 + count_whitespace(&text[eq + 1..]);

        let (value, next) = match bytes.get(start) {
            Some(b'{') => match matching_close(bytes, start, b'}') {
                Some(end) => (&text[start + 1..end], end + 1),
                None => (&text[start + 1..], text.len()),
            },
            Some(b'"') => match quoted_end(bytes, start) {
                Some(end) => (&text[start + 1..end], end + 1),
                None => (&text[start + 1..], text.len()),
            },
            _ => {
                let end = text[start..].find(',').map_or(text.len(), |j| start + j);
                (text[start..end].trim(), end)
            }
        };
        if !name.is_empty() {
            fields
                .entry(name)
                .or_insert_with(|| value.split_whitespace().collect::<Vec<_>>().join(" "));
        }
        i = next;
    }
    fields
}

/// Closing quote of a `"…"` value; quotes inside braces do not count.
fn quoted_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b'"' if depth == 0 => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// The first bibliography file directly inside `dir`, by file name.
pub fn find_bibliography(dir: &Path, extension: &str) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == extension))
        .collect();
    found.sort();
    found.into_iter().next()
}

/// Read and parse the bibliography of `dir`, if it has one.
pub fn load_bibliography(dir: &Path, extension: &str) -> Result<Option<Vec<BibEntry>>, Tex2MdError> {
    let Some(path) = find_bibliography(dir, extension) else {
        return Ok(None);
    };
    let entries = parse_bibtex(&load_source(&path)?);
    debug!("Read {} entries from {}", entries.len(), path.display());
    Ok(Some(entries))
}

// ── Rendering ────────────────────────────────────────────────────────────────

/// Characters left bare by form encoding; space is turned into `+` after.
const FORM: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b' ')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

static RE_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\href\s*\{([^}]*)\}\s*\{([^}]*)\}").unwrap());

fn strip_braces(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '{' | '}')).collect::<String>().trim().to_string()
}

/// Surname of the first author: `Last, First` or `First Last`.
pub fn first_author_surname(authors: &str) -> String {
    let first = authors.split(" and ").next().unwrap_or_default().trim();
    let surname = match first.split_once(',') {
        Some((last, _)) => last,
        None => first.split_whitespace().last().unwrap_or_default(),
    };
    let surname = strip_braces(surname);
    if surname.is_empty() {
        "Unknown".to_string()
    } else {
        surname
    }
}

/// Display title and embedded link of a title that may hold `\href{url}{text}`.
fn split_title(title: &str) -> (String, Option<String>) {
    match RE_HREF.captures(title) {
        Some(caps) => (strip_braces(&caps[2]), Some(caps[1].trim().to_string())),
        None => (strip_braces(title), None),
    }
}

/// Link target for an entry: embedded title link, then DOI, then a search
/// for the title.
fn entry_link(
    href: Option<&str>,
    doi: Option<&str>,
    title: &str,
    search_url: &str,
    doi_resolver: &str,
) -> String {
    let link = match href.filter(|h| !h.is_empty()).or(doi) {
        Some(link) => link.to_string(),
        None => format!(
            "{search_url}{}",
            utf8_percent_encode(title, FORM).to_string().replace(' ', "+")
        ),
    };
    if link.starts_with("http") {
        link
    } else {
        format!("{doi_resolver}{link}")
    }
}

/// `Author et al., Title, Venue, Year` and the entry's link.
pub fn cite_entry(entry: &BibEntry, search_url: &str, doi_resolver: &str) -> (String, String) {
    let author = entry
        .field("author")
        .map_or_else(|| "Unknown".to_string(), first_author_surname);
    let year = entry.field("year").unwrap_or("n.d.");
    let venue = entry
        .field("journal")
        .or_else(|| entry.field("booktitle"))
        .or_else(|| entry.field("publisher"))
        .map(strip_braces)
        .unwrap_or_default();
    let (title, href) = split_title(entry.field("title").unwrap_or("Untitled"));

    let link = entry_link(
        href.as_deref(),
        entry.field("doi"),
        &title,
        search_url,
        doi_resolver,
    );
    (format!("{author} et al., {title}, {venue}, {year}"), link)
}

/// Render the cited entries as two reference units: link definitions and
/// the visible reference list. `None` when nothing in `entries` was cited.
pub fn render_references(
    entries: &[BibEntry],
    citations: &CitationTable,
    search_url: &str,
    doi_resolver: &str,
) -> Option<(ContentUnit, ContentUnit)> {
    let mut cited: BTreeMap<usize, (String, String)> = BTreeMap::new();
    for entry in entries {
        let Some(number) = citations.get(&entry.key) else {
            continue;
        };
        cited
            .entry(number)
            .or_insert_with(|| cite_entry(entry, search_url, doi_resolver));
    }
    if cited.is_empty() {
        return None;
    }

    let definitions: Vec<String> = cited
        .iter()
        .map(|(n, (citation, link))| format!("[{n}]: {link} \"{citation}\""))
        .collect();
    let listing: Vec<String> = cited
        .iter()
        .map(|(n, (citation, _))| format!("[\\[{n}\\] {citation}][{n}]"))
        .collect();
    debug!("Rendered {} of {} bibliography entries", cited.len(), entries.len());

    Some((
        ContentUnit::new(UnitKind::Reference, definitions.join("\n\n")),
        ContentUnit::new(UnitKind::Reference, listing.join("\n\n")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BIB: &str = r#"
@comment{ignored, x = {y}}
@string{acl = "Proc. ACL"}
@Article{vaswani2017,
  Author  = {Vaswani, Ashish and Shazeer, Noam},
  title   = {Attention Is {All} You
             Need},
  journal = {NeurIPS},
  year    = 2017,
}
@inproceedings{devlin2019,
  author = "Jacob Devlin and Ming-Wei Chang",
  title = "{BERT}: Pre-training",
  booktitle = {NAACL},
  doi = {10.18653/v1/N19-1423},
  year = {2019}
}
@misc{uncited, title = {Never}}
"#;

    #[test]
    fn reader_handles_delimiters_and_skips_meta_entries() {
        let entries = parse_bibtex(BIB);
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["vaswani2017", "devlin2019", "uncited"]);

        let first = &entries[0];
        assert_eq!(first.kind, "article");
        assert_eq!(first.field("author"), Some("Vaswani, Ashish and Shazeer, Noam"));
        assert_eq!(first.field("title"), Some("Attention Is {All} You Need"));
        assert_eq!(first.field("year"), Some("2017"));
        assert_eq!(entries[1].field("title"), Some("{BERT}: Pre-training"));
    }

    #[test]
    fn surname_rules() {
        assert_eq!(first_author_surname("Vaswani, Ashish and Shazeer, Noam"), "Vaswani");
        assert_eq!(first_author_surname("Jacob Devlin and Ming-Wei Chang"), "Devlin");
        assert_eq!(first_author_surname("{OpenAI}"), "OpenAI");
        assert_eq!(first_author_surname(""), "Unknown");
    }

    #[test]
    fn link_fallback_chain() {
        let href = BibEntry {
            key: "a".into(),
            fields: HashMap::from([
                ("title".into(), "\\href{https://x.org/p}{Paper A}".into()),
                ("doi".into(), "10.1/zzz".into()),
            ]),
            ..Default::default()
        };
        let (citation, link) = cite_entry(&href, "https://s?q=", "https://doi.org/");
        assert_eq!(link, "https://x.org/p");
        assert_eq!(citation, "Unknown et al., Paper A, , n.d.");

        let bare = BibEntry {
            key: "b".into(),
            fields: HashMap::from([("title".into(), "A B & C".into())]),
            ..Default::default()
        };
        let (_, link) = cite_entry(&bare, "https://s?q=", "https://doi.org/");
        assert_eq!(link, "https://s?q=A+B+%26+C");
    }

    #[test]
    fn only_cited_entries_in_number_order() {
        let entries = parse_bibtex(BIB);
        let mut citations = CitationTable::default();
        citations.number("devlin2019");
        citations.number("vaswani2017");
        citations.number("not-in-bib");

        let (defs, listing) =
            render_references(&entries, &citations, "https://s?q=", "https://doi.org/")
                .expect("two cited entries");
        assert_eq!(defs.kind, UnitKind::Reference);
        assert_eq!(
            defs.text,
            "[1]: https://doi.org/10.18653/v1/N19-1423 \"Devlin et al., BERT: Pre-training, NAACL, 2019\"\n\n\
             [2]: https://s?q=Attention+Is+All+You+Need \"Vaswani et al., Attention Is All You Need, NeurIPS, 2017\""
        );
        assert_eq!(
            listing.text,
            "[\\[1\\] Devlin et al., BERT: Pre-training, NAACL, 2019][1]\n\n\
             [\\[2\\] Vaswani et al., Attention Is All You Need, NeurIPS, 2017][2]"
        );
    }

    #[test]
    fn nothing_cited_renders_nothing() {
        let entries = parse_bibtex(BIB);
        assert!(render_references(&entries, &CitationTable::default(), "", "").is_none());
    }

    #[test]
    fn bibliography_discovery() {
        let dir = TempDir::new().unwrap();
        assert!(load_bibliography(dir.path(), "bib").unwrap().is_none());
        std::fs::write(dir.path().join("z.bib"), "@misc{z, title={Z}}").unwrap();
        std::fs::write(dir.path().join("a.bib"), "@misc{a, title={A}}").unwrap();
        let entries = load_bibliography(dir.path(), "bib").unwrap().unwrap();
        assert_eq!(entries[0].key, "a");
    }
}
