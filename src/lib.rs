//! # edgequake-tex2md
//!
//! Parse a LaTeX article source tree into an ordered sequence of typed
//! Markdown content units.
//!
//! ## Why this crate?
//!
//! General-purpose LaTeX → Markdown converters handle prose well but lose
//! everything a reader needs to follow a paper: figure and table numbers,
//! equation tags, cross-references, citations. This crate wraps such a
//! converter (by default `pandoc`) in placeholder passes that protect those
//! constructs, then rebuilds them and splits the result into units that can
//! be rendered, stored or translated one by one.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source dir
//!  │
//!  ├─ 1. Flatten     discover .tex files, resolve \input/\include, pick the root
//!  ├─ 2. Pre-process number citations/headings, wrap blocks, placeholder refs
//!  ├─ 3. Convert     external LaTeX → Markdown (pandoc)
//!  ├─ 4. Post-process rebuild figures/tables/equations, resolve anchors, hoist
//!  ├─ 5. Segment     lines → headings, body text, hoisted block units
//!  └─ 6. References  cited .bib entries → reference units
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_tex2md::{parse_dir, ParserConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ParserConfig::builder().write_artifacts(false).build()?;
//!     let output = parse_dir("paper/source", &config)?;
//!     println!("{}", output.markdown(false));
//!     for warning in &output.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `tex2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-tex2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assets;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ParserConfig, ParserConfigBuilder};
pub use convert::{parse_article, parse_dir, parse_dir_async, parse_many, Tex2Md};
pub use error::{ConvertError, ParseWarning, Tex2MdError};
pub use output::{
    number_units, render_markdown, ArticleMetadata, ContentUnit, ParseOutput, ParseStats, UnitKind,
};
pub use pipeline::converter::{MarkdownConverter, PandocConverter};
pub use progress::{NoopProgressCallback, ParseProgressCallback, ParseStage, ProgressCallback};
