//! Figure and table reconstruction.
//!
//! Figures and tables are blanked before conversion and rebuilt here from
//! the raw block content kept in the forest. Only captions and the tabular
//! body go through the converter, each on its own.

use super::blocks::{braced_after, BlockNode};
use super::converter::MarkdownConverter;
use crate::error::ParseWarning;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// One image of a figure, with its own sub-caption when it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FigureImage {
    pub path: String,
    pub caption: String,
}

static RE_SUBFLOAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)\\subfloat\s*\[\s*(?P<caption>.*?)\s*(?:\\label\{[^}]*\})?\s*\]\s*\{\s*\\includegraphics(?:\[[^\]]*\])?\{\s*(?P<path>[^}]+)\}\s*\}",
    )
    .unwrap()
});

static RE_SUBFIGURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\\begin\{subfigure\}.*?\\end\{subfigure\}").unwrap());

static RE_MINIPAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\\begin\{minipage\}.*?\\end\{minipage\}").unwrap());

static RE_INCLUDEGRAPHICS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\includegraphics\s*(?:\[[^\]]*\])?\{\s*(?P<path>[^}]+?)\s*\}").unwrap()
});

fn clean_path(path: &str) -> String {
    path.trim().trim_start_matches(['.', '/']).to_string()
}

fn first_image(block: &str) -> Option<String> {
    RE_INCLUDEGRAPHICS
        .captures(block)
        .map(|c| clean_path(&c["path"]))
}

/// Collect a figure's images, trying in order: `\subfloat[cap]{…}`,
/// `subfigure` environments, `minipage`s with a `\caption*`, and finally
/// every bare `\includegraphics`. The first three are combined; the last
/// only applies when they find nothing.
pub fn figure_images(latex: &str) -> Vec<FigureImage> {
    let mut images: Vec<FigureImage> = RE_SUBFLOAT
        .captures_iter(latex)
        .map(|c| FigureImage {
            path: clean_path(&c["path"]),
            caption: c["caption"].trim().to_string(),
        })
        .collect();

    for block in RE_SUBFIGURE.find_iter(latex).map(|m| m.as_str()) {
        if let Some(path) = first_image(block) {
            let caption = block
                .find("\\caption{")
                .and_then(|at| braced_after(block, at))
                .unwrap_or_default();
            images.push(FigureImage { path, caption });
        }
    }

    for block in RE_MINIPAGE.find_iter(latex).map(|m| m.as_str()) {
        if let Some(path) = first_image(block) {
            let caption = block
                .find("\\caption*{")
                .and_then(|at| braced_after(block, at))
                .unwrap_or_default();
            images.push(FigureImage { path, caption });
        }
    }

    if images.is_empty() {
        images = RE_INCLUDEGRAPHICS
            .captures_iter(latex)
            .map(|c| FigureImage {
                path: clean_path(&c["path"]),
                caption: String::new(),
            })
            .collect();
    }
    images
}

/// Convert a caption on its own, keeping the raw text if conversion fails.
pub fn convert_caption(
    caption: Option<&str>,
    converter: &dyn MarkdownConverter,
    warnings: &mut Vec<ParseWarning>,
) -> String {
    let Some(caption) = caption.map(str::trim).filter(|c| !c.is_empty()) else {
        return String::new();
    };
    match converter.to_markdown(caption) {
        Ok(md) => md.trim().replace('\n', " "),
        Err(e) => {
            warn!("Caption conversion failed, keeping raw text: {e}");
            warnings.push(ParseWarning::ConversionAmbiguity {
                detail: format!("caption kept as raw markup: {e}"),
            });
            caption.to_string()
        }
    }
}

/// Markdown for a figure: its images, then a numbered caption line.
pub fn render_figure(
    node: &BlockNode,
    number: usize,
    converter: &dyn MarkdownConverter,
    warnings: &mut Vec<ParseWarning>,
) -> String {
    let images = figure_images(&node.content);
    if images.is_empty() {
        warn!("Figure {number} has no image");
        warnings.push(ParseWarning::ConversionAmbiguity {
            detail: format!("figure {number} has no recognisable image"),
        });
    }
    let body = images
        .iter()
        .map(|img| {
            if img.caption.is_empty() {
                format!("![]({})", img.path)
            } else {
                format!("![]({})\n\n{}", img.path, img.caption)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    let caption = convert_caption(node.caption.as_deref(), converter, warnings);
    format!("{body}\n\n**Figure {number}**: {caption}")
}

/// Markdown for a table: a numbered caption line, then the table body.
pub fn render_table(
    node: &BlockNode,
    number: usize,
    converter: &dyn MarkdownConverter,
    warnings: &mut Vec<ParseWarning>,
) -> String {
    let caption = convert_caption(node.caption.as_deref(), converter, warnings);
    let body = table_body(node, number, converter, warnings);
    format!("**Table {number}**: {caption}\n\n{body}")
}

/// Fenced raw markup, used for algorithms and anything without a renderer.
pub fn fenced_latex(content: &str) -> String {
    format!("```latex\n{}\n```", content.trim_end())
}

fn find_tabular(node: &BlockNode) -> Option<&BlockNode> {
    let mut queue: std::collections::VecDeque<&BlockNode> = node.children.iter().collect();
    while let Some(n) = queue.pop_front() {
        if matches!(n.kind.as_str(), "tabular" | "tabularx") {
            return Some(n);
        }
        queue.extend(n.children.iter());
    }
    None
}

fn leaks_container(markdown: &str) -> bool {
    markdown.trim_start().starts_with("<div")
}

fn convert_table(latex: &str, converter: &dyn MarkdownConverter) -> Option<String> {
    match converter.to_markdown(latex) {
        Ok(md) => {
            let md = md.replace("\r\n", "\n").replace("\n\n", "\n");
            let md = md.trim().to_string();
            (!leaks_container(&md)).then_some(md)
        }
        Err(e) => {
            warn!("Table conversion failed: {e}");
            None
        }
    }
}

/// Convert the table's tabular child in isolation.
///
/// A plain `tabular` is converted as written (vertical rules removed). A
/// starred or `tabularx` one, or one whose conversion leaks a raw `<div`,
/// is retried once with its body under a simple `l c…c` column spec. When
/// both fail, the tabular source is emitted as a fenced block.
fn table_body(
    node: &BlockNode,
    number: usize,
    converter: &dyn MarkdownConverter,
    warnings: &mut Vec<ParseWarning>,
) -> String {
    let Some(tabular) = find_tabular(node) else {
        warn!("Table {number} has no tabular environment");
        warnings.push(ParseWarning::MalformedTable {
            order: number,
            reason: "no tabular environment".into(),
        });
        return fenced_latex(&node.content);
    };

    if tabular.command == "tabular" {
        if let Some(md) = convert_table(&strip_column_rules(&tabular.content), converter) {
            return md;
        }
    }
    if let Some(md) = convert_table(&simplified_tabular(&tabular.content), converter) {
        return md;
    }

    warn!("Table {number} could not be converted, emitting raw markup");
    warnings.push(ParseWarning::MalformedTable {
        order: number,
        reason: "converter produced a raw container".into(),
    });
    fenced_latex(&tabular.content)
}

/// Remove `|` rules from the column spec, the first brace group after
/// `\begin{tabular}`.
fn strip_column_rules(tabular: &str) -> String {
    let Some(cursor) = tabular.find('}').map(|i| i + 1) else {
        return tabular.to_string();
    };
    match brace_group(tabular, cursor) {
        Some((open, close)) => format!(
            "{}{}{}",
            &tabular[..open],
            tabular[open..=close].replace('|', ""),
            &tabular[close + 1..]
        ),
        None => tabular.to_string(),
    }
}

/// Byte span (`{` to matching `}`) of the brace group starting at the first
/// non-whitespace character at or after `from`.
fn brace_group(text: &str, from: usize) -> Option<(usize, usize)> {
    let rest = &text[from..];
    let open = from + (rest.len() - rest.trim_start().len());
    if !text[open..].starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    for (i, ch) in text[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((open, open + i));
                }
            }
            _ => {}
        }
    }
    None
}

/// Rebuild a tabular as `\begin{tabular}{lc…c}` over its row lines.
fn simplified_tabular(tabular: &str) -> String {
    let body: String = tabular
        .lines()
        .filter(|line| !line.contains("\\begin") && !line.contains("\\end"))
        .map(|line| format!("{line}\n"))
        .collect();
    let columns = body.split("\\\\").next().unwrap_or("").matches('&').count();
    format!(
        "\\begin{{tabular}}{{l{}}}\n{body}\\end{{tabular}}",
        "c".repeat(columns)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;
    use crate::pipeline::blocks::match_environments;

    fn first_block(text: &str) -> BlockNode {
        let mut warnings = Vec::new();
        match_environments(text, &mut warnings).remove(0)
    }

    fn identity(s: &str) -> Result<String, ConvertError> {
        Ok(s.to_string())
    }

    #[test]
    fn subfloat_strategy() {
        let text = "\\subfloat[Left view\\label{f:l}]{\\includegraphics[width=3cm]{./img/left.png}}";
        assert_eq!(
            figure_images(text),
            vec![FigureImage {
                path: "img/left.png".into(),
                caption: "Left view".into(),
            }]
        );
    }

    #[test]
    fn subfigure_strategy_with_nested_caption() {
        let text = "\\begin{subfigure}{0.5\\linewidth}\\includegraphics{a.pdf}\\caption{The $\\mathbf{x}$ map}\\end{subfigure}\
                    \\begin{subfigure}{0.5\\linewidth}\\includegraphics{b.pdf}\\end{subfigure}";
        let images = figure_images(text);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].caption, "The $\\mathbf{x}$ map");
        assert_eq!(images[1].path, "b.pdf");
    }

    #[test]
    fn minipage_caption_star_strategy() {
        let text = "\\begin{minipage}{.4\\textwidth}\\includegraphics{m.png}\\caption*{Plain}\\end{minipage}";
        assert_eq!(figure_images(text)[0].caption, "Plain");
    }

    #[test]
    fn bare_includegraphics_fallback() {
        let text = "\\includegraphics[scale=0.5]{ figs/one.png }\\hfill\\includegraphics{two.jpg}";
        let paths: Vec<String> = figure_images(text).into_iter().map(|i| i.path).collect();
        assert_eq!(paths, vec!["figs/one.png", "two.jpg"]);
    }

    #[test]
    fn figure_renders_images_and_caption_line() {
        let node = first_block(
            "\\begin{figure}\\includegraphics{p.png}\\caption{Overview}\\label{fig:o}\\end{figure}",
        );
        let mut warnings = Vec::new();
        let md = render_figure(&node, 3, &identity, &mut warnings);
        assert_eq!(md, "![](p.png)\n\n**Figure 3**: Overview");
        assert!(warnings.is_empty());
    }

    #[test]
    fn table_converts_only_the_tabular() {
        let node = first_block(
            "\\begin{table}\\caption{Scores}\\begin{tabular}{|l|c|}a & b \\\\\\end{tabular}\\end{table}",
        );
        let seen = std::sync::Mutex::new(Vec::new());
        let conv = |s: &str| -> Result<String, ConvertError> {
            seen.lock().unwrap().push(s.to_string());
            Ok(if s.starts_with("\\begin{tabular}") {
                "| a | b |\n\n|---|---|".to_string()
            } else {
                s.to_string()
            })
        };
        let mut warnings = Vec::new();
        let md = render_table(&node, 1, &conv, &mut warnings);
        assert_eq!(md, "**Table 1**: Scores\n\n| a | b |\n|---|---|");
        let seen = seen.lock().unwrap();
        assert_eq!(seen[1], "\\begin{tabular}{lc}a & b \\\\\\end{tabular}");
    }

    #[test]
    fn leaked_container_falls_back_to_fenced_markup() {
        let node = first_block(
            "\\begin{table}\\begin{tabular}{ll}\nx & y \\\\\n\\end{tabular}\\end{table}",
        );
        let conv = |_: &str| -> Result<String, ConvertError> {
            Ok("<div class=\"tabular\">\nbroken\n</div>".to_string())
        };
        let mut warnings = Vec::new();
        let md = render_table(&node, 2, &conv, &mut warnings);
        assert_eq!(
            md,
            "**Table 2**: \n\n```latex\n\\begin{tabular}{ll}\nx & y \\\\\n\\end{tabular}\n```"
        );
        assert!(matches!(
            warnings[0],
            ParseWarning::MalformedTable { order: 2, .. }
        ));
    }

    #[test]
    fn tabularx_goes_straight_to_simplified_spec() {
        let node = first_block(
            "\\begin{table}\\begin{tabularx}{\\linewidth}{XX}\nA & B \\\\\n1 & 2\n\\end{tabularx}\\end{table}",
        );
        let conv = |s: &str| -> Result<String, ConvertError> { Ok(s.to_string()) };
        let mut warnings = Vec::new();
        let md = render_table(&node, 1, &conv, &mut warnings);
        assert!(md.contains("\\begin{tabular}{lc}\nA & B \\\\\n1 & 2\n\\end{tabular}"), "{md}");
        assert!(warnings.is_empty());
    }

    #[test]
    fn table_without_tabular_is_malformed() {
        let node = first_block("\\begin{table}just text\\end{table}");
        let mut warnings = Vec::new();
        let md = render_table(&node, 4, &identity, &mut warnings);
        assert!(md.ends_with("```latex\n\\begin{table}just text\\end{table}\n```"));
        assert!(matches!(warnings[0], ParseWarning::MalformedTable { .. }));
    }

    #[test]
    fn column_rules_only_removed_from_spec() {
        assert_eq!(
            strip_column_rules("\\begin{tabular}{|p{2cm}|c|}\na|b & c\\end{tabular}"),
            "\\begin{tabular}{p{2cm}c}\na|b & c\\end{tabular}"
        );
    }
}
