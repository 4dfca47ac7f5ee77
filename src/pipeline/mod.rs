//! Pipeline stages for LaTeX-to-content-unit parsing.
//!
//! Each submodule implements one transformation step. Every stage is a
//! text-to-text function over a per-call [`context::ParseContext`], so each
//! can be tested in isolation with literal fixtures.
//!
//! ## Data Flow
//!
//! ```text
//! files ──▶ preprocess ──▶ converter ──▶ postprocess ──▶ segment
//! (flatten)  (placeholders)  (pandoc)     (rebuild+hoist)  (units)
//!                                                  bibliography ──┘
//! ```
//!
//! 1. [`files`]: discover markup files, resolve inclusions, flatten
//! 2. [`preprocess`]: number citations and headings, wrap blocks in
//!    type-tagged delimiters, replace refs and labels with placeholders.
//!    Block nesting comes from [`blocks`]; commands from [`matcher`]
//! 3. [`converter`]: delegate prose to the external Markdown converter
//! 4. [`postprocess`]: rebuild figures, tables and equations from the
//!    block forest ([`figures`]), resolve anchors, hoist rendered blocks
//! 5. [`segment`]: split the Markdown into ordered units
//! 6. [`bibliography`]: render cited entries as reference units

pub mod bibliography;
pub mod blocks;
pub mod context;
pub mod converter;
pub mod figures;
pub mod files;
pub mod matcher;
pub mod postprocess;
pub mod preprocess;
pub mod segment;
