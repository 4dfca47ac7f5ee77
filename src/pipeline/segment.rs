//! Paragraph segmentation: post-processed Markdown → ordered units.
//!
//! By the time text reaches this stage every structured block has been
//! hoisted into the side-buffer and replaced by a one-line marker, so the
//! remaining document is plain lines: headings, prose, and markers.

use super::postprocess::unit_index;
use super::preprocess::{BLOCK_BEGIN, BLOCK_END, DOC_END, DOC_START};
use crate::error::ParseWarning;
use crate::output::{ContentUnit, UnitKind};
use tracing::warn;

/// Split converted text into the document body and whatever the converter
/// emitted after the end-of-document marker (typically footnotes).
///
/// Without both markers the whole text is the body.
pub fn split_document(text: &str) -> (&str, Option<&str>) {
    let trailing = text
        .rfind(DOC_END)
        .map(|i| text[i + DOC_END.len()..].trim())
        .filter(|t| !t.is_empty());

    let body = text.find(DOC_START).and_then(|start| {
        let rest = &text[start + DOC_START.len()..];
        rest.find(DOC_END).map(|end| &rest[..end])
    });
    match body {
        Some(body) => (body, trailing),
        None => (text, trailing),
    }
}

/// Start the body at the first top-level numbered heading or the first
/// hoisted block, whichever comes first.
pub fn trim_front_matter(body: &str) -> &str {
    let heading = body
        .match_indices("# 1. ")
        .map(|(i, _)| i)
        .find(|&i| i == 0 || body[..i].ends_with('\n'));
    let block = body.find("【UNIT:");
    match (heading, block) {
        (Some(a), Some(b)) => &body[a.min(b)..],
        (Some(a), None) | (None, Some(a)) => &body[a..],
        (None, None) => body,
    }
}

/// Turn body lines into units.
///
/// Marker lines are replaced by the hoisted unit they index; `#`-prefixed
/// lines become headings; everything else non-blank is body text.
pub fn segment_lines(
    body: &str,
    hoisted: &[ContentUnit],
    warnings: &mut Vec<ParseWarning>,
) -> Vec<ContentUnit> {
    let mut units = Vec::new();

    for line in body.lines().map(str::trim) {
        if line.is_empty() || line == DOC_START || line == DOC_END || line.starts_with(BLOCK_END)
        {
            continue;
        }
        if line.starts_with(BLOCK_BEGIN) {
            warn!("Unresolved block delimiter in output: {line}");
            warnings.push(ParseWarning::UnresolvedBlock {
                header: line.to_string(),
            });
            continue;
        }
        if let Some(index) = unit_index(line) {
            match hoisted.get(index) {
                Some(unit) => units.push(unit.clone()),
                None => {
                    warn!("Block marker {index} has no hoisted unit");
                    warnings.push(ParseWarning::UnresolvedBlock {
                        header: line.to_string(),
                    });
                }
            }
            continue;
        }
        units.push(heading(line).unwrap_or_else(|| ContentUnit::new(UnitKind::BodyText, line)));
    }
    units
}

fn heading(line: &str) -> Option<ContentUnit> {
    let (marks, title) = line.split_once(' ')?;
    if marks.is_empty() || !marks.chars().all(|c| c == '#') {
        return None;
    }
    Some(ContentUnit::heading(marks.len(), title.trim()))
}

/// Segment the full post-processed document, trailing content included.
pub fn segment(
    text: &str,
    hoisted: &[ContentUnit],
    trim: bool,
    warnings: &mut Vec<ParseWarning>,
) -> Vec<ContentUnit> {
    let (body, trailing) = split_document(text);
    let body = if trim { trim_front_matter(body) } else { body };

    let mut units = segment_lines(body, hoisted, warnings);
    if let Some(trailing) = trailing {
        units.push(ContentUnit::new(
            UnitKind::TrailingContent,
            trailing.replace("<span", "\n\n<span"),
        ));
    }
    units
}
