//! Error types for the edgequake-tex2md library.
//!
//! Three types reflect three distinct failure modes:
//!
//! * [`Tex2MdError`] (**fatal**): the parse cannot proceed at all (the source
//!   directory holds no markup files, a file cannot be read, the prose
//!   converter is missing or rejected the whole document). Returned as
//!   `Err(Tex2MdError)` from the top-level `parse*` functions.
//!
//! * [`ConvertError`]: a single call to the external markup→Markdown
//!   converter failed. Fatal for the whole-document conversion, but only a
//!   fallback trigger for isolated caption and table conversions.
//!
//! * [`ParseWarning`] (**non-fatal**): something in the source was malformed
//!   (missing include, unpaired `\end`, table without a tabular) and the
//!   parser degraded gracefully. Collected in
//!   [`crate::output::ParseOutput::warnings`] so callers can report on input
//!   quality without losing the document.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-tex2md library.
#[derive(Debug, Error)]
pub enum Tex2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The source directory does not exist or contains no markup files.
    #[error("No .{extension} source files found under '{dir}'")]
    NoSourceFiles { dir: PathBuf, extension: String },

    /// A discovered source file could not be read.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Converter errors ──────────────────────────────────────────────────
    /// No converter was configured and none could be located.
    #[error("No LaTeX → Markdown converter available.\n{hint}")]
    ConverterUnavailable { hint: String },

    /// The converter rejected the whole pre-processed document.
    #[error("Document conversion failed: {source}")]
    ConversionFailed {
        #[from]
        source: ConvertError,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed call to the external markup→Markdown converter.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The converter process could not be started.
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The converter ran but exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// Staging the input or reading the output failed.
    #[error("Converter I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other converter-specific failure.
    #[error("{0}")]
    Other(String),
}

/// A non-fatal degradation recorded while parsing.
///
/// Every warning is also emitted through `tracing::warn!` at the site where
/// it happens.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ParseWarning {
    /// An include directive names a file that is not part of the source tree.
    #[error("{from}: included file not found: {target}")]
    MissingInclude { from: PathBuf, target: PathBuf },

    /// An include edge would close a cycle and was ignored.
    #[error("include cycle through '{path}' ignored")]
    IncludeCycle { path: PathBuf },

    /// More than one file is never included by another; one was picked.
    #[error("{candidates} candidate root files, using '{chosen}'")]
    AmbiguousRoot { chosen: PathBuf, candidates: usize },

    /// A closing block marker had no matching opener.
    #[error("unpaired closing marker '{name}' at byte {offset} discarded")]
    UnbalancedBlock { name: String, offset: usize },

    /// An opening block marker was never closed.
    #[error("opening marker '{name}' at byte {offset} never closed")]
    UnclosedBlock { name: String, offset: usize },

    /// No bibliography file was found; no reference units are produced.
    #[error("no bibliography file found")]
    MissingBibliography,

    /// A table could not be reconstructed and fell back to raw markup.
    #[error("table {order}: {reason}; emitted raw markup")]
    MalformedTable { order: usize, reason: String },

    /// Best-effort handling of an ambiguous construct.
    #[error("{detail}")]
    ConversionAmbiguity { detail: String },

    /// A block delimiter survived conversion but could not be resolved.
    #[error("unresolved block delimiter: {header}")]
    UnresolvedBlock { header: String },

    /// A debug side artifact could not be written.
    #[error("could not write artifact '{path}': {reason}")]
    ArtifactWriteFailed { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_source_files_display() {
        let e = Tex2MdError::NoSourceFiles {
            dir: PathBuf::from("/tmp/empty"),
            extension: "tex".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains(".tex"), "got: {msg}");
        assert!(msg.contains("/tmp/empty"), "got: {msg}");
    }

    #[test]
    fn conversion_failed_wraps_convert_error() {
        let e: Tex2MdError = ConvertError::Failed {
            program: "pandoc".into(),
            status: "exit status: 64".into(),
            stderr: "Error at \"source\" (line 3)".into(),
        }
        .into();
        assert!(matches!(e, Tex2MdError::ConversionFailed { .. }));
        assert!(e.to_string().contains("pandoc"));
    }

    #[test]
    fn unbalanced_block_display() {
        let w = ParseWarning::UnbalancedBlock {
            name: "figure".into(),
            offset: 42,
        };
        assert!(w.to_string().contains("figure"));
        assert!(w.to_string().contains("42"));
    }

    #[test]
    fn warnings_serialize() {
        let w = ParseWarning::MalformedTable {
            order: 2,
            reason: "no tabular".into(),
        };
        let json = serde_json::to_string(&w).expect("serialize");
        assert!(json.contains("MalformedTable"));
    }
}
