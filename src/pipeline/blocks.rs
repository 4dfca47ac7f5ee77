//! Block ("environment") tree building.
//!
//! Nested `\begin{x} … \end{x}` constructs are balanced with an explicit
//! stack, never by recursive descent: real papers nest lists inside
//! minipages inside figures inside custom wrappers, and a malformed file
//! must degrade rather than blow the call stack.
//!
//! The same stack assembler serves three grammars: raw LaTeX environments
//! (pre-processing), type-tagged block delimiters in converter output
//! (post-processing) and rendered figure/table/equation/code markers
//! (hoisting). Each grammar only supplies how to turn a matched
//! opener/closer pair into a [`BlockNode`].
//!
//! Offsets are absolute while scanning. After the scan [`rebase`] rewrites
//! every node's span relative to its parent's start, so a child can be
//! located inside its parent's content sliced out on its own.

use crate::error::ParseWarning;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

/// One matched block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockNode {
    /// Type tag: the environment name without a trailing `*`.
    pub kind: String,
    /// The name as written, star included.
    pub command: String,
    /// Grammar-specific content: the full span for LaTeX environments and
    /// delimiters, the trimmed inner text for rendered markers.
    pub content: String,
    pub start: usize,
    pub end: usize,
    /// Running number, unique per `kind` across the whole document.
    pub order: usize,
    pub caption: Option<String>,
    pub label: Option<String>,
    /// Index path into the pre-processing forest (delimiter grammar only).
    pub path: Vec<usize>,
    pub children: Vec<BlockNode>,
}

impl BlockNode {
    /// Number of nodes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        let mut n = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            n += 1;
            stack.extend(node.children.iter());
        }
        n
    }
}

/// An opening or closing marker found by a grammar's pattern.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Marker<'t> {
    pub open: bool,
    pub name: &'t str,
    pub start: usize,
    pub end: usize,
}

struct Frame<'t> {
    open: Marker<'t>,
    children: Vec<BlockNode>,
}

/// Balance `markers` with an explicit stack.
///
/// A closing marker whose name differs from the innermost open block, or
/// that arrives with nothing open, is discarded with a warning; the stack
/// is left as it was so later properly paired markers still match. Blocks
/// left open at the end are dropped but their completed children are kept
/// in the enclosing level.
///
/// Returned offsets are absolute; call [`rebase`] afterwards.
pub(crate) fn assemble<'t, I, F>(
    markers: I,
    mut close: F,
    warnings: &mut Vec<ParseWarning>,
) -> Vec<BlockNode>
where
    I: IntoIterator<Item = Marker<'t>>,
    F: FnMut(Marker<'t>, Marker<'t>, Vec<BlockNode>) -> BlockNode,
{
    let mut forest = Vec::new();
    let mut stack: Vec<Frame<'t>> = Vec::new();

    for m in markers {
        if m.open {
            stack.push(Frame {
                open: m,
                children: Vec::new(),
            });
            continue;
        }
        match stack.last() {
            Some(top) if top.open.name == m.name => {}
            _ => {
                warn!("Discarding unpaired closing marker '{}' at {}", m.name, m.start);
                warnings.push(ParseWarning::UnbalancedBlock {
                    name: m.name.to_string(),
                    offset: m.start,
                });
                continue;
            }
        }
        let Some(frame) = stack.pop() else { continue };
        let node = close(frame.open, m, frame.children);
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => forest.push(node),
        }
    }

    while let Some(frame) = stack.pop() {
        warn!(
            "Block '{}' opened at {} is never closed",
            frame.open.name, frame.open.start
        );
        warnings.push(ParseWarning::UnclosedBlock {
            name: frame.open.name.to_string(),
            offset: frame.open.start,
        });
        let orphans = frame.children;
        match stack.last_mut() {
            Some(parent) => parent.children.extend(orphans),
            None => forest.extend(orphans),
        }
    }
    forest.sort_by_key(|n| n.start);
    forest
}

/// Make every node's span relative to its parent's absolute start.
///
/// Top-level nodes keep their absolute offsets (their parent is the whole
/// text). Walks depth-first with an explicit work list.
pub(crate) fn rebase(forest: &mut [BlockNode]) {
    let mut work: Vec<(&mut [BlockNode], usize)> = vec![(forest, 0)];
    while let Some((nodes, base)) = work.pop() {
        for node in nodes {
            let BlockNode {
                start,
                end,
                children,
                ..
            } = node;
            let absolute = *start;
            *start -= base;
            *end -= base;
            children.sort_by_key(|c| c.start);
            work.push((children.as_mut_slice(), absolute));
        }
    }
}

/// Follow an index path down a forest.
pub fn node_at<'a>(forest: &'a [BlockNode], path: &[usize]) -> Option<&'a BlockNode> {
    let (first, rest) = path.split_first()?;
    let mut node = forest.get(*first)?;
    for &idx in rest {
        node = node.children.get(idx)?;
    }
    Some(node)
}

// ── LaTeX environment grammar ────────────────────────────────────────────────

static RE_ENV_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(begin|end)\{(\w+\*?)\}").unwrap());

static RE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\label\{([^}]+)\}").unwrap());

/// Match every LaTeX environment in `text` into a rebased forest.
///
/// Sequence numbers are assigned per type in closing order, so siblings of
/// one type are numbered in document order.
pub fn match_environments(text: &str, warnings: &mut Vec<ParseWarning>) -> Vec<BlockNode> {
    let markers = RE_ENV_MARKER.captures_iter(text).filter_map(|caps| {
        let whole = caps.get(0)?;
        Some(Marker {
            open: &caps[1] == "begin",
            name: caps.get(2)?.as_str(),
            start: whole.start(),
            end: whole.end(),
        })
    });

    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut forest = assemble(
        markers,
        |open, close, children| {
            let kind = open.name.trim_end_matches('*').to_string();
            let order = counters.entry(kind.clone()).or_insert(0);
            *order += 1;
            let content = &text[open.start..close.end];
            let own = own_level_text(content, open.start, &children);
            BlockNode {
                caption: extract_caption(&own).or_else(|| extract_caption(content)),
                label: extract_label(&own).or_else(|| extract_label(content)),
                kind,
                command: open.name.to_string(),
                content: content.to_string(),
                start: open.start,
                end: close.end,
                order: *order,
                path: Vec::new(),
                children,
            }
        },
        warnings,
    );
    rebase(&mut forest);
    forest
}

/// `content` with the spans of its (still absolute) children cut out, so a
/// figure's own caption is not confused with a sub-figure's.
fn own_level_text(content: &str, base: usize, children: &[BlockNode]) -> String {
    let mut spans: Vec<(usize, usize)> = children
        .iter()
        .map(|c| (c.start - base, c.end - base))
        .collect();
    spans.sort_unstable();
    let mut own = String::with_capacity(content.len());
    let mut cursor = 0;
    for (s, e) in spans {
        if s >= cursor {
            own.push_str(&content[cursor..s]);
            cursor = e;
        }
    }
    own.push_str(&content[cursor.min(content.len())..]);
    own
}

/// Extract the argument of the first `\caption`, counting brace depth so
/// nested groups (`\textbf{…}`, inline math) do not end it early.
pub fn extract_caption(text: &str) -> Option<String> {
    let at = text
        .find("\\caption{")
        .or_else(|| text.find("\\caption["))?;
    braced_after(text, at)
}

/// The trimmed content of the first top-level `{…}` group at or after `at`.
/// Escaped braces do not count.
pub(crate) fn braced_after(text: &str, at: usize) -> Option<String> {
    let mut depth = 0usize;
    let mut open_at = 0;
    let mut escaped = false;
    for (i, ch) in text[at..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '{' => {
                if depth == 0 {
                    open_at = i + 1;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[at + open_at..at + i].trim().to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// The name of the first `\label{…}` in `text`.
pub fn extract_label(text: &str) -> Option<String> {
    RE_LABEL.captures(text).map(|c| c[1].trim().to_string())
}
