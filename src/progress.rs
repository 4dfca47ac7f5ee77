//! Progress-callback trait for per-document parse events.
//!
//! Inject an [`Arc<dyn ParseProgressCallback>`] via
//! [`crate::config::ParserConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves a source tree through its stages. When
//! several trees are parsed with [`crate::parse_many`] the callbacks arrive
//! from blocking-pool threads, interleaved per document.
//!
//! # Example
//!
//! ```rust
//! use edgequake_tex2md::{ParseProgressCallback, ParseStage, ParserConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! struct StageLogger;
//!
//! impl ParseProgressCallback for StageLogger {
//!     fn on_stage(&self, dir: &Path, stage: ParseStage) {
//!         eprintln!("{}: {}", dir.display(), stage);
//!     }
//! }
//!
//! let config = ParserConfig::builder()
//!     .progress_callback(Arc::new(StageLogger) as Arc<dyn ParseProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// The pipeline stage a document is entering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseStage {
    Flatten,
    PreProcess,
    Convert,
    PostProcess,
    Segment,
    Bibliography,
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseStage::Flatten => "flattening sources",
            ParseStage::PreProcess => "pre-processing",
            ParseStage::Convert => "converting prose",
            ParseStage::PostProcess => "rebuilding blocks",
            ParseStage::Segment => "segmenting",
            ParseStage::Bibliography => "resolving references",
        };
        f.write_str(name)
    }
}

/// Called by the parser as it processes each source tree.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ParseProgressCallback: Send + Sync {
    /// Called once before flattening starts.
    fn on_parse_start(&self, dir: &Path) {
        let _ = dir;
    }

    /// Called as the document enters each stage.
    fn on_stage(&self, dir: &Path, stage: ParseStage) {
        let _ = (dir, stage);
    }

    /// Called once with the number of units produced.
    fn on_parse_complete(&self, dir: &Path, unit_count: usize) {
        let _ = (dir, unit_count);
    }

    /// Called when the parse fails fatally.
    fn on_parse_error(&self, dir: &Path, error: &str) {
        let _ = (dir, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ParseProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ParserConfig`].
pub type ProgressCallback = Arc<dyn ParseProgressCallback>;
