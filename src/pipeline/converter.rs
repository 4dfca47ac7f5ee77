//! External prose conversion: LaTeX markup → GitHub-flavoured Markdown.
//!
//! This crate never translates prose markup itself. Paragraph text, inline
//! formatting, lists and footnotes are delegated wholesale to a converter
//! behind the [`MarkdownConverter`] trait; the pre- and post-processing
//! passes around it protect and later rebuild everything the converter
//! would mangle (figures, tables, numbered equations, cross-references).
//!
//! The default implementation shells out to `pandoc`. Tests and callers with
//! their own conversion service inject any `Fn(&str) -> Result<String, _>`.

use crate::error::ConvertError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// A pure, deterministic markup→Markdown conversion function.
pub trait MarkdownConverter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str {
        "custom"
    }

    /// Convert a LaTeX fragment or document to Markdown.
    fn to_markdown(&self, latex: &str) -> Result<String, ConvertError>;
}

impl<F> MarkdownConverter for F
where
    F: Fn(&str) -> Result<String, ConvertError> + Send + Sync,
{
    fn to_markdown(&self, latex: &str) -> Result<String, ConvertError> {
        self(latex)
    }
}

/// Converter backed by the `pandoc` executable.
///
/// Runs `pandoc -f latex -t gfm --wrap=none <file>`. The input is staged in
/// a temporary file rather than piped so that a large document cannot
/// deadlock on full stdin/stdout buffers.
#[derive(Debug, Clone)]
pub struct PandocConverter {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl PandocConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: vec!["--wrap=none".to_string()],
        }
    }

    /// Locate `pandoc` on `PATH`.
    pub fn locate() -> Option<Self> {
        which::which("pandoc").ok().map(Self::new)
    }

    /// Append an extra command-line argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl MarkdownConverter for PandocConverter {
    fn name(&self) -> &str {
        "pandoc"
    }

    fn to_markdown(&self, latex: &str) -> Result<String, ConvertError> {
        let mut input = tempfile::Builder::new().suffix(".tex").tempfile()?;
        input.write_all(latex.as_bytes())?;
        input.flush()?;

        let program = self.program.display().to_string();
        let output = Command::new(&self.program)
            .args(["-f", "latex", "-t", "gfm"])
            .args(&self.extra_args)
            .arg(input.path())
            .output()
            .map_err(|source| ConvertError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ConvertError::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let markdown = String::from_utf8_lossy(&output.stdout).replace("\r\n", "\n");
        debug!(
            "pandoc: {} bytes LaTeX → {} bytes Markdown",
            latex.len(),
            markdown.len()
        );
        Ok(markdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_converters() {
        let upper = |s: &str| -> Result<String, ConvertError> { Ok(s.to_uppercase()) };
        assert_eq!(upper.to_markdown("abc").unwrap(), "ABC");
        assert_eq!(MarkdownConverter::name(&upper), "custom");
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let conv = PandocConverter::new("/nonexistent/definitely-not-pandoc");
        let err = conv.to_markdown("x").unwrap_err();
        assert!(matches!(err, ConvertError::Spawn { .. }), "got: {err:?}");
    }

    #[test]
    fn default_args_disable_wrapping() {
        let conv = PandocConverter::new("pandoc").arg("--mathjax");
        assert_eq!(conv.extra_args, vec!["--wrap=none", "--mathjax"]);
        assert_eq!(conv.program(), Path::new("pandoc"));
    }
}
