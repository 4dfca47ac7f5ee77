//! Pre-processing: protect structure from the prose converter.
//!
//! The flattened document is rewritten so that everything the converter
//! would mangle or lose is replaced with inert placeholders:
//!
//! 1. `\cal X` shorthand becomes `\mathcal{X}`
//! 2. citation commands become numeric lists (`[1, 2]`), filling the
//!    citation table
//! 3. headings get their hierarchical number, and a label anchor when
//!    labelled
//! 4. blocks are wrapped in type-tagged delimiters carrying their index
//!    path into the block forest
//! 5. cross-references become reference placeholders
//! 6. remaining `\label`s become anchor placeholders
//!
//! Placeholders use fullwidth brackets (`【…】`) which no LaTeX reader
//! interprets, so they travel through the converter as plain text.

use super::blocks::{match_environments, BlockNode};
use super::context::{CitationTable, LabelTable, ParseContext};
use super::matcher::{match_citations, match_headings, match_refs, splice};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

// ── Placeholder vocabulary ───────────────────────────────────────────────────

pub const DOC_START: &str = "【-START-OF-DOCUMENT-】";
pub const DOC_END: &str = "【-END-OF-DOCUMENT-】";

pub(crate) const BLOCK_BEGIN: &str = "【-BEGIN-ENV-】";
pub(crate) const BLOCK_END: &str = "【-END-ENV-】";

pub(crate) fn label_placeholder(name: &str) -> String {
    format!("【LABEL:{name}】")
}

pub(crate) fn ref_placeholder(name: &str, note: &str) -> String {
    format!("【REF:{name}|{note}】")
}

/// Header line of a block delimiter. Path components are dot-separated.
pub(crate) fn block_header(path: &[usize], kind: &str, order: usize) -> String {
    let path = path
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(".");
    format!("{BLOCK_BEGIN}【path: {path}】【type: {kind}】【order: {order}】")
}

// ── Block classes ────────────────────────────────────────────────────────────

/// Blocks left to the converter: no delimiter, nested blocks still wrapped.
const PASS_THROUGH: &[&str] = &[
    "itemize",
    "enumerate",
    "titlepage",
    "description",
    "quote",
    "verse",
    "center",
    "flushleft",
    "flushright",
    "centering",
    "raggedright",
    "raggedleft",
    "minipage",
    "keywords",
    "cases",
    "AIbox",
    "compactitem",
];

/// Font-size switches used as environments.
const FONT_SIZES: &[&str] = &[
    "tiny",
    "scriptsize",
    "footnotesize",
    "small",
    "normalsize",
    "large",
    "Large",
    "LARGE",
    "huge",
    "Huge",
];

/// Math blocks kept verbatim and numbered as equations.
const DISPLAY_MATH: &[&str] = &[
    "equation",
    "align",
    "gather",
    "multline",
    "eqnarray",
    "displaymath",
];

pub(crate) fn is_pass_through(kind: &str) -> bool {
    PASS_THROUGH.contains(&kind) || FONT_SIZES.contains(&kind)
}

/// The type a block is numbered and rebuilt as.
pub(crate) fn display_kind(kind: &str) -> &str {
    match kind {
        "figure" | "wrapfigure" | "subfigure" => "figure",
        k if DISPLAY_MATH.contains(&k) => "equation",
        k => k,
    }
}

// ── Document extraction ──────────────────────────────────────────────────────

/// Keep the document body and wrap it in document markers.
///
/// The preamble is dropped. Sources without a `document` environment are
/// wrapped whole.
pub fn extract_document(text: &str) -> String {
    const BEGIN: &str = "\\begin{document}";
    let body = match text.find(BEGIN) {
        Some(start) => {
            let body = &text[start + BEGIN.len()..];
            match body.find("\\end{document}") {
                Some(end) => &body[..end],
                None => body,
            }
        }
        None => text,
    };
    format!("{DOC_START}\n\n{body}\n\n{DOC_END}")
}

/// Run every pre-processing step, filling `ctx` as a side effect.
pub fn preprocess(text: &str, ctx: &mut ParseContext) -> String {
    let text = normalize_font_shorthand(text);
    let text = replace_citations(&text, &mut ctx.citations);
    let text = replace_headings(&text, &mut ctx.labels);
    let text = replace_blocks(&text, ctx);
    let text = replace_refs(&text, &ctx.labels);
    let text = replace_labels(&text);
    debug!(
        "Pre-processed {} bytes: {} citations, {} labels, {} top-level blocks",
        text.len(),
        ctx.citations.len(),
        ctx.labels.len(),
        ctx.forest.len()
    );
    text
}

// ── Step 1: font shorthand ───────────────────────────────────────────────────

static RE_CAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\cal(?:\s+([A-Za-z])|\{\s*([A-Za-z])\s*\})").unwrap());

pub fn normalize_font_shorthand(text: &str) -> String {
    RE_CAL
        .replace_all(text, |caps: &regex::Captures| {
            let letter = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            format!("\\mathcal{{{letter}}}")
        })
        .into_owned()
}

// ── Step 2: citations ────────────────────────────────────────────────────────

/// Replace each citation with its keys' numbers, assigning new numbers to
/// unseen keys.
pub fn replace_citations(text: &str, citations: &mut CitationTable) -> String {
    let edits: Vec<(usize, usize, String)> = match_citations(text)
        .into_iter()
        .map(|m| {
            let numbers: Vec<String> = m
                .keys()
                .map(|key| citations.number(key).to_string())
                .collect();
            let replacement = if numbers.is_empty() {
                String::new()
            } else {
                format!("[{}]", numbers.join(", "))
            };
            (m.start, m.end, replacement)
        })
        .collect();
    splice(text, edits)
}

// ── Step 3: headings ─────────────────────────────────────────────────────────

/// Number headings and turn their labels into anchor placeholders on a
/// paragraph of their own.
pub fn replace_headings(text: &str, labels: &mut LabelTable) -> String {
    let edits: Vec<(usize, usize, String)> = match_headings(text)
        .into_iter()
        .map(|h| {
            let mut replacement = format!("\\{}{{{}}}", h.matched.command, h.matched.content);
            if let Some(label) = &h.label {
                labels.register(label, h.ref_kind, &h.prefix);
                replacement.push_str("\n\n");
                replacement.push_str(&label_placeholder(label));
                replacement.push_str("\n\n");
            }
            (h.matched.start, h.matched.end, replacement)
        })
        .collect();
    splice(text, edits)
}

// ── Step 4: blocks ───────────────────────────────────────────────────────────

/// Match the block forest, store it in `ctx` and wrap each block in
/// delimiters.
pub fn replace_blocks(text: &str, ctx: &mut ParseContext) -> String {
    let forest = match_environments(text, &mut ctx.warnings);
    let mut rewriter = BlockRewriter {
        labels: &mut ctx.labels,
        counters: HashMap::new(),
        path: Vec::new(),
    };
    let out = rewriter.rewrite(text, &forest);
    ctx.forest = forest;
    out
}

struct BlockRewriter<'c> {
    labels: &'c mut LabelTable,
    counters: HashMap<String, usize>,
    path: Vec<usize>,
}

impl BlockRewriter<'_> {
    /// Rewrite the `nodes` found in `text`, whose offsets are relative to
    /// its start.
    fn rewrite(&mut self, text: &str, nodes: &[BlockNode]) -> String {
        let mut edits = Vec::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            if matches!(node.kind.as_str(), "aligned" | "array") {
                if let Some(label) = &node.label {
                    self.labels.register(label, &node.kind, node.order);
                }
                continue;
            }
            let kind = display_kind(&node.kind).to_string();
            let order = {
                let n = self.counters.entry(kind.clone()).or_insert(0);
                *n += 1;
                *n
            };
            if let Some(label) = &node.label {
                self.labels.register(label, &kind, order);
            }

            self.path.push(idx);
            let span = &text[node.start..node.end];
            let inner = match kind.as_str() {
                "figure" | "table" => String::new(),
                "equation" => span.to_string(),
                _ => self.rewrite(span, &node.children),
            };
            let replacement = if is_pass_through(&node.kind) {
                inner
            } else {
                format!(
                    "\n{}\n\n{inner}\n\n{BLOCK_END}\n",
                    block_header(&self.path, &kind, order)
                )
            };
            self.path.pop();
            edits.push((node.start, node.end, replacement));
        }
        splice(text, edits)
    }
}

// ── Step 5: cross-references ─────────────────────────────────────────────────

/// Replace each reference with placeholders for its resolvable keys.
/// Unknown keys are dropped.
pub fn replace_refs(text: &str, labels: &LabelTable) -> String {
    let edits: Vec<(usize, usize, String)> = match_refs(text)
        .into_iter()
        .map(|m| {
            let resolved: Vec<String> = m
                .keys()
                .filter_map(|key| {
                    let target = labels.get(key)?;
                    Some(ref_placeholder(key, &target.reference_text()))
                })
                .collect();
            (m.start, m.end, resolved.join(" "))
        })
        .collect();
    splice(text, edits)
}

// ── Step 6: stray labels ─────────────────────────────────────────────────────

static RE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\label\{([^}]+)\}").unwrap());

pub fn replace_labels(text: &str) -> String {
    RE_LABEL
        .replace_all(text, |caps: &regex::Captures| {
            label_placeholder(caps[1].trim())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseWarning;

    #[test]
    fn document_body_is_extracted() {
        let text = "\\documentclass{article}\n\\begin{document}\nBody.\n\\end{document}\n";
        assert_eq!(
            extract_document(text),
            format!("{DOC_START}\n\n\nBody.\n\n\n{DOC_END}")
        );
        assert_eq!(
            extract_document("plain"),
            format!("{DOC_START}\n\nplain\n\n{DOC_END}")
        );
    }

    #[test]
    fn cal_shorthand() {
        assert_eq!(
            normalize_font_shorthand("$\\cal L + {\\cal{O}}$ \\calligra"),
            "$\\mathcal{L} + {\\mathcal{O}}$ \\calligra"
        );
    }

    #[test]
    fn citations_populate_table_in_first_seen_order() {
        let mut citations = CitationTable::default();
        let out = replace_citations(
            "A \\cite{x}. B \\citep{y, x}. C \\cite{z}.",
            &mut citations,
        );
        assert_eq!(out, "A [1]. B [2, 1]. C [3].");
        assert_eq!(citations.get("y"), Some(2));
    }

    #[test]
    fn labelled_heading_gets_anchor_paragraph() {
        let mut labels = LabelTable::default();
        let out = replace_headings(
            "\\section{Intro}\\label{sec:intro}\ntext\n\\subsection*{More}",
            &mut labels,
        );
        assert_eq!(
            out,
            "\\section{1. Intro}\n\n【LABEL:sec:intro】\n\n\ntext\n\\subsection{1.1 More}"
        );
        assert_eq!(
            labels.get("sec:intro").map(|t| t.reference_text()),
            Some("Section 1".to_string())
        );
    }

    #[test]
    fn figure_content_blanked_and_equation_kept() {
        let mut ctx = ParseContext::new();
        let text = "a \\begin{figure}\\includegraphics{x.png}\\caption{C}\\label{fig:x}\\end{figure} b \
                    \\begin{equation}E=mc^2\\label{eq:e}\\end{equation}";
        let out = replace_blocks(text, &mut ctx);
        assert_eq!(
            out,
            "a \n【-BEGIN-ENV-】【path: 0】【type: figure】【order: 1】\n\n\n\n【-END-ENV-】\n b \
             \n【-BEGIN-ENV-】【path: 1】【type: equation】【order: 1】\n\n\
             \\begin{equation}E=mc^2\\label{eq:e}\\end{equation}\n\n【-END-ENV-】\n"
        );
        assert_eq!(ctx.forest.len(), 2);
        assert_eq!(ctx.labels.get("fig:x").map(|t| t.reference_text()), Some("1".into()));
        assert_eq!(
            ctx.labels.get("eq:e").map(|t| t.reference_text()),
            Some("Equation 1".into())
        );
    }

    #[test]
    fn pass_through_blocks_recurse_with_paths() {
        let mut ctx = ParseContext::new();
        let text = "\\begin{itemize}\\item x \\begin{algorithm}A\\end{algorithm}\\end{itemize}";
        let out = replace_blocks(text, &mut ctx);
        assert!(out.starts_with(
            "\\begin{itemize}\\item x \n【-BEGIN-ENV-】【path: 0.0】【type: algorithm】"
        ));
        assert!(out.contains("\\begin{algorithm}A\\end{algorithm}"));
        assert!(out.ends_with("【-END-ENV-】\n\\end{itemize}"));
        assert!(!out.contains("【type: itemize】"));
    }

    #[test]
    fn figure_kinds_share_numbering() {
        let mut ctx = ParseContext::new();
        let text = "\\begin{figure}\\end{figure}\\begin{wrapfigure}\\label{w}\\end{wrapfigure}";
        let out = replace_blocks(text, &mut ctx);
        assert!(out.contains("【type: figure】【order: 2】"));
        assert_eq!(ctx.labels.get("w").map(|t| t.number.as_str()), Some("2"));
    }

    #[test]
    fn aligned_is_left_in_place() {
        let mut ctx = ParseContext::new();
        let text = "$\\begin{aligned}x\\end{aligned}$";
        assert_eq!(replace_blocks(text, &mut ctx), text);
    }

    #[test]
    fn unpaired_closer_is_warned_not_fatal() {
        let mut ctx = ParseContext::new();
        let out = replace_blocks("x \\end{figure} y", &mut ctx);
        assert_eq!(out, "x \\end{figure} y");
        assert!(matches!(
            ctx.warnings[0],
            ParseWarning::UnbalancedBlock { .. }
        ));
    }

    #[test]
    fn refs_resolve_known_keys_only() {
        let mut labels = LabelTable::default();
        labels.register("fig:a", "figure", 2);
        labels.register("sec:b", "section", "3.1 ");
        let out = replace_refs(
            "see \\ref{fig:a}, \\cref{sec:b, nope} and \\ref{gone}.",
            &labels,
        );
        assert_eq!(
            out,
            "see 【REF:fig:a|2】, 【REF:sec:b|Section 3.1】 and ."
        );
    }

    #[test]
    fn stray_labels_become_anchors() {
        assert_eq!(replace_labels("x\\label{ a }y"), "x【LABEL:a】y");
    }

    #[test]
    fn full_pass_keeps_reference_order() {
        let mut ctx = ParseContext::new();
        let text = "\\section{A}\\label{s:a}\nSee Fig. \\ref{f} and \\cite{k}.\n\
                    \\begin{figure}\\caption{Cap}\\label{f}\\end{figure}";
        let out = preprocess(text, &mut ctx);
        assert!(out.contains("See Fig. 【REF:f|1】 and [1]."), "{out}");
        assert!(out.contains("【LABEL:s:a】"));
        assert_eq!(ctx.citations.len(), 1);
    }
}
