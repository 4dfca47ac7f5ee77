//! Post-processing: rebuild protected structure in converter output.
//!
//! The converter returns Markdown in which every block is still framed by
//! the type-tagged delimiters written during pre-processing. This module
//! turns each delimited block into its final Markdown (figures and tables
//! from the raw source kept in the forest, equations from the converted
//! math), resolves anchors and cross-references, and hoists every rendered
//! block out of the running text into `ParseContext::hoisted` so the
//! segmenter only ever sees plain lines.
//!
//! ## Rule Order
//!
//! Math fences must become `$$` spans before blocks are rebuilt, because
//! the equation renderer looks for them. Anchors are resolved before
//! hoisting so hoisted units carry final HTML. Prose display math is
//! wrapped only after the first hoist, otherwise equations that were
//! already rendered would be wrapped twice.

use super::blocks::{assemble, node_at, rebase, BlockNode, Marker};
use super::context::{LabelTable, ParseContext};
use super::converter::MarkdownConverter;
use super::figures::{fenced_latex, render_figure, render_table};
use super::matcher::splice;
use super::preprocess::{label_placeholder, replace_labels, replace_refs, BLOCK_END};
use crate::error::ParseWarning;
use crate::output::{ContentUnit, UnitKind};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

const MATH_ORDER: &str = "【-MATH_ORDER-】";

/// Apply every post-processing rule to the converter output.
///
/// Rules (applied in order):
/// 1. Normalise: split literal `$$`, drop carriage returns
/// 2. Turn ` ``` math ` fences into `$$` spans, without labels or fills
/// 3. Strip backticks from inline `` $`…`$ `` math
/// 4. Drop `adjustwidth` wrapper containers
/// 5. Rebuild every delimited block by type
/// 6. Resolve label anchors and cross-reference links
/// 7. Hoist rendered blocks into the side buffer
/// 8. Wrap remaining prose display math as equations and hoist them
/// 9. Render citation lists as reference links
/// 10. Remove leftover equation-number markers
pub fn postprocess(
    markdown: &str,
    ctx: &mut ParseContext,
    converter: &dyn MarkdownConverter,
) -> String {
    let s = normalise(markdown);
    let s = rewrite_math_fences(&s);
    let s = strip_inline_math_backticks(&s);
    let s = strip_wrapper_containers(&s);
    let s = rebuild_blocks(&s, ctx, converter);
    let s = resolve_anchors(&s);
    let s = hoist_rendered(&s, ctx);
    let s = wrap_display_math(&s);
    let s = hoist_rendered(&s, ctx);
    let s = format_citations(&s);
    let s = strip_math_order(&s);
    debug!(
        "Post-processed {} bytes, {} hoisted blocks",
        s.len(),
        ctx.hoisted.len()
    );
    s
}

// ── Rule 1: Normalise ────────────────────────────────────────────────────────

fn normalise(input: &str) -> String {
    input.replace("$$", "$ $").replace('\r', "")
}

// ── Rule 2: Math fences ──────────────────────────────────────────────────────

static RE_MATH_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?ms)^[ \t]*``` ?math\n(.*?)```").unwrap());

static RE_LABEL_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"【LABEL:[^】]*】\s*").unwrap());

fn rewrite_math_fences(input: &str) -> String {
    RE_MATH_FENCE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let body = RE_LABEL_PLACEHOLDER.replace_all(&caps[1], "");
            let body = body.replace("\\hfill", "").replace("\\vfill", "");
            format!("$$\n{} {MATH_ORDER}\n$$", body.trim_end())
        })
        .into_owned()
}

// ── Rule 3: Inline math backticks ────────────────────────────────────────────

static RE_INLINE_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$`([^`\n]*)`\$").unwrap());

fn strip_inline_math_backticks(input: &str) -> String {
    RE_INLINE_MATH
        .replace_all(input, |caps: &regex::Captures<'_>| format!("${}$", &caps[1]))
        .into_owned()
}

// ── Rule 4: Wrapper containers ───────────────────────────────────────────────

static RE_ADJUSTWIDTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<div\s+class="adjustwidth">.*?</div>"#).unwrap());

fn strip_wrapper_containers(input: &str) -> String {
    RE_ADJUSTWIDTH.replace_all(input, "").into_owned()
}

// ── Rule 5: Block reconstruction ─────────────────────────────────────────────

static RE_DELIMITER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"【-(BEGIN|END)-ENV-】(?:【[^】\n]*】)*").unwrap());

static RE_HEADER_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"【(path|type|order): ([^】]*)】").unwrap());

static RE_DISPLAY_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\$\$(.*?)\$\$").unwrap());

/// Block kinds whose content is handled upstream from article metadata.
const DROPPED: &[&str] = &["title", "author", "abstract"];

/// Parse converter output delimiters into a rebased forest. Each node's
/// `path`, `kind` and `order` come from its header.
pub(crate) fn match_delimiters(text: &str, warnings: &mut Vec<ParseWarning>) -> Vec<BlockNode> {
    let markers = RE_DELIMITER.captures_iter(text).filter_map(|caps| {
        let whole = caps.get(0)?;
        Some(Marker {
            open: &caps[1] == "BEGIN",
            name: "ENV",
            start: whole.start(),
            end: whole.end(),
        })
    });
    let mut forest = assemble(
        markers,
        |open, close, children| {
            let mut node = BlockNode {
                content: text[open.start..close.end].to_string(),
                start: open.start,
                end: close.end,
                children,
                ..Default::default()
            };
            for field in RE_HEADER_FIELD.captures_iter(&text[open.start..open.end]) {
                match &field[1] {
                    "path" => {
                        node.path = field[2]
                            .split('.')
                            .filter_map(|p| p.trim().parse().ok())
                            .collect()
                    }
                    "type" => node.kind = field[2].trim().to_string(),
                    _ => node.order = field[2].trim().parse().unwrap_or(0),
                }
            }
            node.command = node.kind.clone();
            node
        },
        warnings,
    );
    rebase(&mut forest);
    forest
}

/// The converted text between a delimiter's header and footer.
fn delimited_inner(content: &str) -> &str {
    let body = match RE_DELIMITER.find(content) {
        Some(header) if header.start() == 0 => &content[header.end()..],
        _ => content,
    };
    body.strip_suffix(BLOCK_END).unwrap_or(body)
}

/// Wrap a rendered block in hoisting markers, with its label anchor first.
fn rendered(tag: &str, label: Option<&str>, body: &str) -> String {
    let anchor = label.map(label_placeholder).unwrap_or_default();
    format!("\n【-BEGIN-{tag}-】\n{anchor}\n{body}\n【-END-{tag}-】\n")
}

pub(crate) fn rebuild_blocks(
    text: &str,
    ctx: &mut ParseContext,
    converter: &dyn MarkdownConverter,
) -> String {
    let nodes = match_delimiters(text, &mut ctx.warnings);
    let ParseContext {
        forest,
        labels,
        warnings,
        ..
    } = ctx;
    let mut rebuilder = Rebuilder {
        forest,
        labels,
        warnings,
        converter,
    };
    rebuilder.rebuild(text, &nodes)
}

struct Rebuilder<'a> {
    forest: &'a [BlockNode],
    labels: &'a LabelTable,
    warnings: &'a mut Vec<ParseWarning>,
    converter: &'a dyn MarkdownConverter,
}

impl Rebuilder<'_> {
    fn rebuild(&mut self, text: &str, nodes: &[BlockNode]) -> String {
        let edits: Vec<(usize, usize, String)> = nodes
            .iter()
            .map(|node| (node.start, node.end, self.render(node)))
            .collect();
        splice(text, edits)
    }

    fn render(&mut self, node: &BlockNode) -> String {
        let forest = self.forest;
        let Some(source) = node_at(forest, &node.path) else {
            let header = node.content.lines().next().unwrap_or_default().to_string();
            warn!("Block delimiter does not resolve: {header}");
            self.warnings.push(ParseWarning::UnresolvedBlock { header });
            return delimited_inner(&node.content).to_string();
        };
        let label = source.label.as_deref();
        match node.kind.as_str() {
            "figure" => {
                let source = self.with_resolved_caption(source);
                let body = render_figure(&source, node.order, self.converter, self.warnings);
                rendered("FIGURE", label, &body)
            }
            "table" => {
                let source = self.with_resolved_caption(source);
                let body = render_table(&source, node.order, self.converter, self.warnings);
                rendered("TABLE", label, &body)
            }
            "equation" => {
                let body = render_equation(delimited_inner(&node.content), source, node.order);
                rendered("EQUATION", label, &body)
            }
            "algorithm" => rendered("LATEX", label, &fenced_latex(&source.content)),
            kind if DROPPED.contains(&kind) => String::new(),
            _ if !node.children.is_empty() => {
                let inner = self.rebuild(&node.content, &node.children);
                match label {
                    Some(l) => format!("{}{}", label_placeholder(l), delimited_inner(&inner)),
                    None => delimited_inner(&inner).to_string(),
                }
            }
            _ => rendered("LATEX", label, &fenced_latex(&source.content)),
        }
    }

    /// Captions were captured before cross-references were rewritten.
    fn with_resolved_caption(&self, source: &BlockNode) -> BlockNode {
        let mut node = source.clone();
        node.caption = node
            .caption
            .map(|c| replace_labels(&replace_refs(&c, self.labels)));
        node
    }
}

static RE_ENV_WRAPPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\\begin\{[^}]*\}|\\end\{[^}]*\}\s*$").unwrap());

static RE_RAW_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\label\{[^}]*\}").unwrap());

/// One numbered `$$` block for an equation.
///
/// The converter may split one environment into several display spans;
/// they are merged into a single block under one number. When no display
/// math survived conversion, the raw environment body is used instead.
fn render_equation(converted: &str, source: &BlockNode, number: usize) -> String {
    let spans: Vec<String> = RE_DISPLAY_MATH
        .captures_iter(converted)
        .map(|c| c[1].replace(MATH_ORDER, "").trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let body = match spans.as_slice() {
        [] => {
            let raw = RE_ENV_WRAPPER.replace_all(&source.content, "");
            let raw = RE_RAW_LABEL.replace_all(&raw, "");
            RE_LABEL_PLACEHOLDER.replace_all(&raw, "").trim().to_string()
        }
        [single] => single.clone(),
        many => format!("\\begin{{gathered}}\n{}\n\\end{{gathered}}", many.join(" \\\\\n")),
    };
    format!("$$\n{body} \\tag{{{number}}}\n$$")
}

// ── Rule 6: Anchors and cross-references ─────────────────────────────────────

static RE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"【LABEL:([^】]+)】").unwrap());

static RE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"【REF:([^】]+)】").unwrap());

/// Turn label placeholders into `<span id>` anchors and reference
/// placeholders into links. Backslashes the converter added while escaping
/// are dropped from keys.
fn resolve_anchors(input: &str) -> String {
    let s = RE_LABEL.replace_all(input, |caps: &regex::Captures<'_>| {
        format!("<span id=\"{}\"></span>", caps[1].replace('\\', "").trim())
    });
    RE_REF
        .replace_all(&s, |caps: &regex::Captures<'_>| {
            let raw = caps[1].replace('\\', "");
            let (key, note) = raw.rsplit_once('|').unwrap_or((raw.as_str(), ""));
            let note = note.trim().trim_end_matches('.');
            format!("<a href=\"#{}\">{note}</a>", key.trim())
        })
        .into_owned()
}

// ── Rule 7: Hoisting ─────────────────────────────────────────────────────────

static RE_RENDERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"【-(BEGIN|END)-(FIGURE|TABLE|EQUATION|LATEX)-】").unwrap());

static RE_UNIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"【UNIT:(\d+)】").unwrap());

pub(crate) fn unit_marker(index: usize) -> String {
    format!("【UNIT:{index}】")
}

/// The hoisted-block index a line refers to, if it holds a unit marker.
pub(crate) fn unit_index(line: &str) -> Option<usize> {
    RE_UNIT.captures(line).and_then(|c| c[1].parse().ok())
}

fn unit_kind(tag: &str) -> UnitKind {
    match tag {
        "FIGURE" => UnitKind::Figure,
        "TABLE" => UnitKind::Table,
        "EQUATION" => UnitKind::Equation,
        _ => UnitKind::CodeBlock,
    }
}

/// Move every top-level rendered block into `ctx.hoisted`, leaving an
/// index marker on its own line. Markers of nested blocks are dropped and
/// their content stays with the outer block.
pub(crate) fn hoist_rendered(text: &str, ctx: &mut ParseContext) -> String {
    let markers = RE_RENDERED.captures_iter(text).filter_map(|caps| {
        let whole = caps.get(0)?;
        Some(Marker {
            open: &caps[1] == "BEGIN",
            name: caps.get(2)?.as_str(),
            start: whole.start(),
            end: whole.end(),
        })
    });
    let forest = assemble(
        markers,
        |open, close, children| BlockNode {
            kind: open.name.to_string(),
            command: open.name.to_string(),
            content: format_citations(
                RE_RENDERED
                    .replace_all(text[open.end..close.start].trim(), "")
                    .trim(),
            ),
            start: open.start,
            end: close.end,
            children,
            ..Default::default()
        },
        &mut ctx.warnings,
    );

    let edits: Vec<(usize, usize, String)> = forest
        .into_iter()
        .map(|node| {
            let index = ctx.hoisted.len();
            ctx.hoisted
                .push(ContentUnit::new(unit_kind(&node.kind), node.content));
            (node.start, node.end, format!("\n{}\n", unit_marker(index)))
        })
        .collect();
    splice(text, edits)
}

// ── Rule 8: Prose display math ───────────────────────────────────────────────

fn wrap_display_math(input: &str) -> String {
    RE_DISPLAY_MATH
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let body = caps[1].replace(MATH_ORDER, "");
            format!(
                "\n【-BEGIN-EQUATION-】\n$$\n{}\n$$\n【-END-EQUATION-】\n",
                body.trim()
            )
        })
        .into_owned()
}

// ── Rule 9: Citation lists ───────────────────────────────────────────────────

static RE_CITE_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\\[(\d+(?:\s*,\s*\d+)*)\\\]").unwrap());

/// `\[1\]` → `[[1]]`, `\[1, 2\]` → `[[1], [2]]`: reference-style links
/// resolved by the bibliography unit.
fn format_citations(input: &str) -> String {
    RE_CITE_LIST
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let numbers: Vec<&str> = caps[1].split(',').map(str::trim).collect();
            match numbers.as_slice() {
                [one] => format!("[[{one}]]"),
                many => format!(
                    "[{}]",
                    many.iter()
                        .map(|n| format!("[{n}]"))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }
        })
        .into_owned()
}

// ── Rule 10: Leftover markers ────────────────────────────────────────────────

fn strip_math_order(input: &str) -> String {
    input.replace(&format!(" {MATH_ORDER}"), "").replace(MATH_ORDER, "")
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;
    use crate::pipeline::preprocess::{preprocess, replace_blocks};

    fn identity(s: &str) -> Result<String, ConvertError> {
        Ok(s.to_string())
    }

    #[test]
    fn test_normalise() {
        assert_eq!(normalise("a $$ b\r\n"), "a $ $ b\n");
    }

    #[test]
    fn test_math_fence_loses_labels_and_fills() {
        let input = "text\n  ``` math\nE = mc^2 【LABEL:eq:e】 \\hfill\n```\nafter";
        assert_eq!(
            rewrite_math_fences(input),
            "text\n$$\nE = mc^2 【-MATH_ORDER-】\n$$\nafter"
        );
    }

    #[test]
    fn test_inline_math_backticks() {
        assert_eq!(
            strip_inline_math_backticks("where $`x_i`$ and `code`"),
            "where $x_i$ and `code`"
        );
    }

    #[test]
    fn test_adjustwidth_removed() {
        assert_eq!(
            strip_wrapper_containers("a<div class=\"adjustwidth\">\nx\n</div>b"),
            "ab"
        );
    }

    #[test]
    fn test_anchors_and_links() {
        let input = "【LABEL:sec\\_a】 see 【REF:fig:b\\|3.】 and 【REF:sec:c|Section 2】";
        assert_eq!(
            resolve_anchors(input),
            "<span id=\"sec_a\"></span> see <a href=\"#fig:b\">3</a> and <a href=\"#sec:c\">Section 2</a>"
        );
    }

    #[test]
    fn test_citation_lists() {
        assert_eq!(
            format_citations("as in \\[3\\] and \\[1, 2\\] but not [4]"),
            "as in [[3]] and [[1], [2]] but not [4]"
        );
    }

    #[test]
    fn test_delimiters_parse_headers() {
        let text = "x\n【-BEGIN-ENV-】【path: 0.2】【type: algorithm】【order: 4】\n\nbody\n\n【-END-ENV-】\ny";
        let nodes = match_delimiters(text, &mut Vec::new());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].path, vec![0, 2]);
        assert_eq!(nodes[0].kind, "algorithm");
        assert_eq!(nodes[0].order, 4);
        assert_eq!(delimited_inner(&nodes[0].content), "\n\nbody\n\n");
    }

    #[test]
    fn test_figure_block_is_rebuilt_and_hoisted() {
        let mut ctx = ParseContext::new();
        let latex = "Intro.\n\\begin{figure}\\includegraphics{a.png}\\caption{Cap}\\label{fig:a}\\end{figure}\nAfter.";
        let pre = replace_blocks(latex, &mut ctx);
        let out = postprocess(&pre, &mut ctx, &identity);
        assert_eq!(ctx.hoisted.len(), 1);
        assert_eq!(ctx.hoisted[0].kind, UnitKind::Figure);
        assert_eq!(
            ctx.hoisted[0].text,
            "<span id=\"fig:a\"></span>\n![](a.png)\n\n**Figure 1**: Cap"
        );
        let lines: Vec<&str> = out.lines().filter(|l| !l.trim().is_empty()).collect();
        assert_eq!(lines, vec!["Intro.", "【UNIT:0】", "After."]);
    }

    #[test]
    fn test_equation_spans_merged_and_numbered() {
        let mut ctx = ParseContext::new();
        let pre = replace_blocks("\\begin{align}a\\\\b\\end{align}", &mut ctx);
        // A converter that splits the environment into two fenced spans.
        let converted = pre.replace(
            "\\begin{align}a\\\\b\\end{align}",
            "``` math\na\n```\n\n``` math\nb\n```",
        );
        postprocess(&converted, &mut ctx, &identity);
        assert_eq!(ctx.hoisted[0].kind, UnitKind::Equation);
        assert_eq!(
            ctx.hoisted[0].text,
            "$$\n\\begin{gathered}\na \\\\\nb\n\\end{gathered} \\tag{1}\n$$"
        );
    }

    #[test]
    fn test_equation_falls_back_to_source() {
        let mut ctx = ParseContext::new();
        let pre = preprocess("\\begin{equation}x+1\\label{eq:x}\\end{equation}", &mut ctx);
        postprocess(&pre, &mut ctx, &identity);
        assert_eq!(
            ctx.hoisted[0].text,
            "<span id=\"eq:x\"></span>\n$$\nx+1 \\tag{1}\n$$"
        );
    }

    #[test]
    fn test_prose_display_math_becomes_equation_unit() {
        let mut ctx = ParseContext::new();
        let out = postprocess("before\n\n``` math\ny = 2\n```\n\nafter", &mut ctx, &identity);
        assert_eq!(ctx.hoisted[0].text, "$$\ny = 2\n$$");
        assert!(out.contains("【UNIT:0】"));
        assert!(!out.contains("MATH_ORDER"));
    }

    #[test]
    fn test_container_recurses_and_abstract_dropped() {
        let mut ctx = ParseContext::new();
        let latex = "\\begin{abstract}gone\\end{abstract}\
                     \\begin{wrapper}keep \\begin{algorithm}A\\end{algorithm}\\end{wrapper}";
        let pre = replace_blocks(latex, &mut ctx);
        let out = postprocess(&pre, &mut ctx, &identity);
        assert!(!out.contains("gone"));
        assert!(out.contains("keep"));
        assert!(!out.contains("【-BEGIN-ENV-】"), "{out}");
        assert_eq!(ctx.hoisted[0].kind, UnitKind::CodeBlock);
        assert_eq!(
            ctx.hoisted[0].text,
            "```latex\n\\begin{algorithm}A\\end{algorithm}\n```"
        );
    }

    #[test]
    fn test_unknown_path_is_reported() {
        let mut ctx = ParseContext::new();
        let text = "【-BEGIN-ENV-】【path: 7】【type: figure】【order: 1】\n\nleft\n\n【-END-ENV-】";
        let out = postprocess(text, &mut ctx, &identity);
        assert!(out.contains("left"));
        assert!(matches!(
            ctx.warnings[0],
            ParseWarning::UnresolvedBlock { .. }
        ));
    }

    #[test]
    fn test_unit_index() {
        assert_eq!(unit_index(&unit_marker(12)), Some(12));
        assert_eq!(unit_index("plain"), None);
    }
}
