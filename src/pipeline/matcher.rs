//! Structural matching of citations, cross-references and headings.
//!
//! Each matcher is a single pattern scan returning position-tagged records.
//! Offsets are only valid against the exact text that was scanned; the
//! pre-processing pass re-runs each matcher on its current text copy
//! before splicing replacements in.

use once_cell::sync::Lazy;
use regex::Regex;

/// What a [`Match`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Citation,
    Ref,
    Heading,
    Label,
}

/// One matched construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub kind: MatchKind,
    /// Command name without the backslash (`citep`, `eqref`, `subsection`).
    pub command: String,
    /// Raw argument text; for headings, the numbered title.
    pub content: String,
    pub start: usize,
    pub end: usize,
    pub order: Option<usize>,
}

impl Match {
    /// Comma-separated keys of a citation or reference, trimmed, empties dropped.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.content.split(',').map(str::trim).filter(|k| !k.is_empty())
    }
}

/// A matched heading command with its hierarchical number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingMatch {
    pub matched: Match,
    /// 1 (`section`) … 5 (`subparagraph`).
    pub level: usize,
    /// Dotted number prefix, e.g. `"2.3 "`; empty below level 3.
    pub prefix: String,
    /// `section` or `paragraph`, used when the heading is cross-referenced.
    pub ref_kind: &'static str,
    /// A `\label` directly following the heading command.
    pub label: Option<String>,
}

static RE_CITE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(cite\w*|parencite|textcite)\*?\s*(?:\[[^\]]*\]\s*){0,2}\{([^}]*)\}").unwrap()
});

static RE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(ref|cref|Cref|vref|pageref|eqref|autoref)\{([^}]+)\}").unwrap());

static RE_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        \\(?P<command>section|subsection|subsubsection|paragraph|subparagraph)\*?
        (?:\[(?P<short>[^\]]+)\])?      # optional short title
        \{(?P<title>[^}]+)\}
        (?:\s*\\label\{(?P<label>[^}]+)\})?   # label on the same construct
        ",
    )
    .unwrap()
});

/// Find every citation command.
pub fn match_citations(text: &str) -> Vec<Match> {
    scan(&RE_CITE, text, MatchKind::Citation)
}

/// Find every cross-reference command.
pub fn match_refs(text: &str) -> Vec<Match> {
    scan(&RE_REF, text, MatchKind::Ref)
}

fn scan(re: &Regex, text: &str, kind: MatchKind) -> Vec<Match> {
    re.captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Match {
                kind,
                command: caps[1].to_string(),
                content: caps[2].to_string(),
                start: whole.start(),
                end: whole.end(),
                order: None,
            })
        })
        .collect()
}

fn heading_level(command: &str) -> usize {
    match command {
        "section" => 1,
        "subsection" => 2,
        "subsubsection" => 3,
        "paragraph" => 4,
        _ => 5,
    }
}

/// Find every heading command and number it.
///
/// A three-slot counter tracks levels 1–3: bumping a level zeroes every
/// level below it. Levels 4 and 5 are not numbered.
pub fn match_headings(text: &str) -> Vec<HeadingMatch> {
    let mut counts = [0usize; 3];
    let mut headings = Vec::new();

    for (n, caps) in RE_HEADING.captures_iter(text).enumerate() {
        let Some(whole) = caps.get(0) else { continue };
        let command = caps["command"].to_string();
        let level = heading_level(&command);
        let prefix = match level {
            1 => {
                counts = [counts[0] + 1, 0, 0];
                format!("{}. ", counts[0])
            }
            2 => {
                counts = [counts[0], counts[1] + 1, 0];
                format!("{}.{} ", counts[0], counts[1])
            }
            3 => {
                counts[2] += 1;
                format!("{}.{}.{} ", counts[0], counts[1], counts[2])
            }
            _ => String::new(),
        };
        headings.push(HeadingMatch {
            ref_kind: if command.contains("paragraph") {
                "paragraph"
            } else {
                "section"
            },
            matched: Match {
                kind: MatchKind::Heading,
                content: format!("{prefix}{}", &caps["title"]),
                command,
                start: whole.start(),
                end: whole.end(),
                order: Some(n + 1),
            },
            level,
            prefix,
            label: caps.name("label").map(|m| m.as_str().trim().to_string()),
        });
    }
    headings
}

/// Rebuild `text` with each `(start, end, replacement)` edit applied.
///
/// Edits must be sorted and non-overlapping; an edit starting inside the
/// previous one is skipped.
pub(crate) fn splice<I>(text: &str, edits: I) -> String
where
    I: IntoIterator<Item = (usize, usize, String)>,
{
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end, replacement) in edits {
        if start < cursor {
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str(&replacement);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}
