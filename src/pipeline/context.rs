//! Per-call parse state.
//!
//! Every table the rewrite passes share lives in one [`ParseContext`]
//! created fresh at the start of each top-level parse and threaded through
//! the stages by `&mut`. Nothing survives between calls, so one parser
//! value can serve many documents and each stage can be unit-tested against
//! a hand-built context.

use super::blocks::BlockNode;
use crate::error::ParseWarning;
use crate::output::ContentUnit;
use std::collections::HashMap;

/// Citation key → number, assigned in first-appearance order from 1.
#[derive(Debug, Default, Clone)]
pub struct CitationTable {
    numbers: HashMap<String, usize>,
}

impl CitationTable {
    /// The number for `key`, assigning the next one on first sight.
    pub fn number(&mut self, key: &str) -> usize {
        let next = self.numbers.len() + 1;
        *self.numbers.entry(key.to_string()).or_insert(next)
    }

    pub fn get(&self, key: &str) -> Option<usize> {
        self.numbers.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }
}

/// What a label points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTarget {
    /// Block type or heading kind (`section`, `paragraph`).
    pub kind: String,
    /// Display number: a block's sequence number or a heading's prefix.
    pub number: String,
}

impl LabelTarget {
    /// Text a cross-reference to this target displays: bare numbers for
    /// figures and tables, `Kind N` for everything else.
    pub fn reference_text(&self) -> String {
        let number = self.number.trim().trim_end_matches('.');
        if matches!(self.kind.as_str(), "figure" | "wrapfigure" | "table") {
            return number.to_string();
        }
        let mut chars = self.kind.chars();
        let kind = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
            None => String::new(),
        };
        format!("{kind} {number}").trim().to_string()
    }
}

/// Label name → target. The first registration of a name wins.
#[derive(Debug, Default, Clone)]
pub struct LabelTable {
    targets: HashMap<String, LabelTarget>,
}

impl LabelTable {
    /// Register `name`; returns false when it was already taken.
    pub fn register(&mut self, name: &str, kind: &str, number: impl ToString) -> bool {
        if self.targets.contains_key(name) {
            return false;
        }
        self.targets.insert(
            name.to_string(),
            LabelTarget {
                kind: kind.to_string(),
                number: number.to_string(),
            },
        );
        true
    }

    pub fn get(&self, name: &str) -> Option<&LabelTarget> {
        self.targets.get(name)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// State shared by the rewrite passes of a single parse.
#[derive(Debug, Default)]
pub struct ParseContext {
    pub citations: CitationTable,
    pub labels: LabelTable,
    /// Block forest matched during pre-processing; post-processing looks
    /// nodes up by index path.
    pub forest: Vec<BlockNode>,
    /// Rendered blocks hoisted out of the text, addressed by index markers.
    pub hoisted: Vec<ContentUnit>,
    pub warnings: Vec<ParseWarning>,
}

impl ParseContext {
    pub fn new() -> Self {
        Self::default()
    }
}
