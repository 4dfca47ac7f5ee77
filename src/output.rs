//! Output records produced by a parse.
//!
//! A parse yields an ordered `Vec<ContentUnit>`: one record per heading,
//! paragraph, figure, table, equation or raw-markup block, plus reference
//! units when a bibliography is present. Each unit is independently
//! renderable and independently translatable; `translated` is left empty by
//! this crate and filled later by whatever translation service the caller
//! runs.

use crate::error::ParseWarning;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The type tag of a [`ContentUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    DocumentTitle,
    Abstract,
    Heading,
    BodyText,
    Figure,
    Table,
    Equation,
    CodeBlock,
    TrailingContent,
    Reference,
}

/// One typed, ordered element of the final document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub kind: UnitKind,
    /// Dense, 0-based document position. Assigned once, after the whole
    /// sequence has been assembled.
    pub order: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated: Option<String>,
    /// Heading depth (1 = `#`). Only set for [`UnitKind::Heading`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<usize>,
}

impl ContentUnit {
    /// Create an unordered unit; `order` is fixed later by [`number_units`].
    pub fn new(kind: UnitKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            order: 0,
            text: text.into(),
            translated: None,
            level: None,
        }
    }

    pub fn heading(level: usize, text: impl Into<String>) -> Self {
        Self {
            level: Some(level),
            ..Self::new(UnitKind::Heading, text)
        }
    }

    /// Render this unit as Markdown.
    ///
    /// With `prefer_translation`, translatable units use their translated
    /// text when one is present. Equations, trailing content and references
    /// always render their source.
    pub fn to_markdown(&self, prefer_translation: bool) -> String {
        let text = if prefer_translation {
            self.translated.as_deref().unwrap_or(&self.text)
        } else {
            &self.text
        };
        match self.kind {
            UnitKind::Equation | UnitKind::TrailingContent | UnitKind::Reference => {
                self.text.clone()
            }
            UnitKind::Heading => {
                format!("{} {}", "#".repeat(self.level.unwrap_or(1).max(1)), text)
            }
            UnitKind::DocumentTitle => format!("<h1><center>{text}</center></h1>"),
            UnitKind::Abstract => format!("# Abstract:\n\n{text}"),
            _ => text.to_string(),
        }
    }

    /// Whether a translation pass should send this unit to a translator.
    pub fn is_translatable(&self) -> bool {
        match self.kind {
            UnitKind::Equation
            | UnitKind::TrailingContent
            | UnitKind::Reference
            | UnitKind::DocumentTitle
            | UnitKind::Abstract => false,
            UnitKind::BodyText if self.text.contains("<div") || self.text.contains("<span") => {
                false
            }
            _ => !is_numeric_only(&self.text),
        }
    }
}

/// True when `s` holds only digits, ASCII punctuation and whitespace.
fn is_numeric_only(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_digit() || c.is_ascii_punctuation() || c.is_whitespace())
}

/// Assign dense 0-based order indices in sequence order.
pub fn number_units(units: &mut [ContentUnit]) {
    for (i, unit) in units.iter_mut().enumerate() {
        unit.order = i;
    }
}

/// Render a unit sequence as one Markdown document.
pub fn render_markdown(units: &[ContentUnit], prefer_translation: bool) -> String {
    units
        .iter()
        .map(|u| u.to_markdown(prefer_translation))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Article-level metadata supplied by the caller (e.g. from a catalogue
/// entry), used to synthesise the title and abstract units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub translated_title: Option<String>,
    #[serde(default)]
    pub translated_summary: Option<String>,
}

impl ArticleMetadata {
    /// The two leading units: document title, then abstract.
    pub fn front_units(&self) -> Vec<ContentUnit> {
        let mut title = ContentUnit::new(UnitKind::DocumentTitle, self.title.trim());
        title.translated = self.translated_title.clone();
        let mut summary = ContentUnit::new(UnitKind::Abstract, self.summary.replace('\n', " "));
        summary.translated = self.translated_summary.clone();
        vec![title, summary]
    }
}

/// Counters describing one parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    /// Markup files discovered in the source tree.
    pub source_files: usize,
    /// Byte length of the flattened document.
    pub flattened_bytes: usize,
    /// Distinct citation keys numbered.
    pub citations: usize,
    /// Labels registered for cross-referencing.
    pub labels: usize,
    /// Top-level blocks matched during pre-processing.
    pub blocks: usize,
    /// Units in the final sequence.
    pub units: usize,
    pub duration_ms: u64,
}

/// Full result of a parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOutput {
    pub units: Vec<ContentUnit>,
    pub warnings: Vec<ParseWarning>,
    pub stats: ParseStats,
    /// Flattened-source side artifact, when one was read or written.
    pub flattened_path: Option<PathBuf>,
    /// Rendered-Markdown side artifact, when one was written.
    pub markdown_path: Option<PathBuf>,
}

impl ParseOutput {
    /// Render the whole unit sequence as Markdown.
    pub fn markdown(&self, prefer_translation: bool) -> String {
        render_markdown(&self.units, prefer_translation)
    }
}
