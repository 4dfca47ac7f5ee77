//! Parse entry points.
//!
//! [`Tex2Md`] owns a resolved configuration and converter and runs the whole
//! pipeline for one source tree per call. All matching state lives in a
//! [`ParseContext`] created at the start of each call, so one parser value
//! can be shared across threads and reused for any number of documents.
//!
//! The pipeline itself is synchronous and CPU-bound apart from the external
//! converter process. [`parse_dir_async`] and [`parse_many`] move it onto
//! the blocking pool for async callers.

use crate::config::ParserConfig;
use crate::error::{ParseWarning, Tex2MdError};
use crate::output::{number_units, render_markdown, ArticleMetadata, ParseOutput, ParseStats};
use crate::pipeline::context::ParseContext;
use crate::pipeline::converter::MarkdownConverter;
use crate::pipeline::files::write_atomic;
use crate::pipeline::{bibliography, files, postprocess, preprocess, segment};
use crate::progress::ParseStage;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A configured LaTeX source-tree parser.
///
/// # Example
/// ```rust,no_run
/// use edgequake_tex2md::{ParserConfig, Tex2Md};
///
/// let parser = Tex2Md::new(ParserConfig::default())?;
/// let output = parser.parse("papers/2504.21318/source")?;
/// for unit in &output.units {
///     println!("{:>3} {:?}", unit.order, unit.kind);
/// }
/// # Ok::<(), edgequake_tex2md::Tex2MdError>(())
/// ```
#[derive(Clone)]
pub struct Tex2Md {
    config: ParserConfig,
    converter: Arc<dyn MarkdownConverter>,
}

impl std::fmt::Debug for Tex2Md {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tex2Md")
            .field("config", &self.config)
            .field("converter", &self.converter.name())
            .finish()
    }
}

impl Tex2Md {
    /// Build a parser, resolving the converter once up front.
    ///
    /// # Errors
    /// [`Tex2MdError::ConverterUnavailable`] when no converter is configured
    /// and `pandoc` cannot be found.
    pub fn new(config: ParserConfig) -> Result<Self, Tex2MdError> {
        let converter = config.resolve_converter()?;
        Ok(Self { config, converter })
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parse the source tree under `dir` into ordered units.
    pub fn parse(&self, dir: impl AsRef<Path>) -> Result<ParseOutput, Tex2MdError> {
        self.run(dir.as_ref(), None)
    }

    /// Parse as [`Self::parse`], leading with title and abstract units
    /// built from `metadata`.
    pub fn parse_article(
        &self,
        dir: impl AsRef<Path>,
        metadata: &ArticleMetadata,
    ) -> Result<ParseOutput, Tex2MdError> {
        self.run(dir.as_ref(), Some(metadata))
    }

    fn run(
        &self,
        dir: &Path,
        metadata: Option<&ArticleMetadata>,
    ) -> Result<ParseOutput, Tex2MdError> {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_parse_start(dir);
        }
        let result = self.run_stages(dir, metadata);
        if let Some(ref cb) = self.config.progress_callback {
            match &result {
                Ok(output) => cb.on_parse_complete(dir, output.units.len()),
                Err(e) => cb.on_parse_error(dir, &e.to_string()),
            }
        }
        result
    }

    fn stage(&self, dir: &Path, stage: ParseStage) {
        debug!("{}: {}", dir.display(), stage);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(dir, stage);
        }
    }

    fn run_stages(
        &self,
        dir: &Path,
        metadata: Option<&ArticleMetadata>,
    ) -> Result<ParseOutput, Tex2MdError> {
        let start = Instant::now();
        info!("Parsing {} with {}", dir.display(), self.converter.name());
        let mut ctx = ParseContext::new();

        // ── Step 1: Flatten ──────────────────────────────────────────────
        self.stage(dir, ParseStage::Flatten);
        let flat = files::flatten_dir(dir, &self.config, &mut ctx.warnings)?;

        // ── Step 2: Placeholders ─────────────────────────────────────────
        self.stage(dir, ParseStage::PreProcess);
        let document = preprocess::extract_document(&flat.text);
        let prepared = preprocess::preprocess(&document, &mut ctx);

        // ── Step 3: Prose conversion ─────────────────────────────────────
        self.stage(dir, ParseStage::Convert);
        let convert_start = Instant::now();
        let markdown = self.converter.to_markdown(&prepared)?;
        debug!(
            "Converted {} bytes in {}ms",
            prepared.len(),
            convert_start.elapsed().as_millis()
        );

        // ── Step 4: Rebuild blocks ───────────────────────────────────────
        self.stage(dir, ParseStage::PostProcess);
        let processed = postprocess::postprocess(&markdown, &mut ctx, self.converter.as_ref());

        // ── Step 5: Segment ──────────────────────────────────────────────
        self.stage(dir, ParseStage::Segment);
        let hoisted = std::mem::take(&mut ctx.hoisted);
        let body = segment::segment(
            &processed,
            &hoisted,
            self.config.trim_front_matter,
            &mut ctx.warnings,
        );

        // ── Step 6: Bibliography ─────────────────────────────────────────
        self.stage(dir, ParseStage::Bibliography);
        let references =
            match bibliography::load_bibliography(dir, &self.config.bibliography_extension)? {
                Some(entries) => bibliography::render_references(
                    &entries,
                    &ctx.citations,
                    &self.config.search_url,
                    &self.config.doi_resolver,
                ),
                None => {
                    warn!("No .{} file in {}", self.config.bibliography_extension, dir.display());
                    ctx.warnings.push(ParseWarning::MissingBibliography);
                    None
                }
            };
        let (definitions, listing) = references.unzip();

        // ── Step 7: Assemble ─────────────────────────────────────────────
        let mut units = metadata.map(ArticleMetadata::front_units).unwrap_or_default();
        units.extend(definitions);
        units.extend(body);
        units.extend(listing);
        number_units(&mut units);

        let markdown_path = self.write_markdown(dir, &units, &mut ctx.warnings);

        let stats = ParseStats {
            source_files: flat.source_files,
            flattened_bytes: flat.text.len(),
            citations: ctx.citations.len(),
            labels: ctx.labels.len(),
            blocks: ctx.forest.len(),
            units: units.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Parsed {}: {} units, {} warnings, {}ms",
            dir.display(),
            stats.units,
            ctx.warnings.len(),
            stats.duration_ms
        );

        Ok(ParseOutput {
            units,
            warnings: ctx.warnings,
            stats,
            flattened_path: flat.artifact,
            markdown_path,
        })
    }

    /// Persist the rendered Markdown next to the sources when enabled.
    fn write_markdown(
        &self,
        dir: &Path,
        units: &[crate::output::ContentUnit],
        warnings: &mut Vec<ParseWarning>,
    ) -> Option<PathBuf> {
        if !self.config.write_artifacts {
            return None;
        }
        let path = dir.join(&self.config.markdown_artifact_name);
        match write_atomic(&path, &render_markdown(units, false)) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Could not write {}: {e}", path.display());
                warnings.push(ParseWarning::ArtifactWriteFailed {
                    path,
                    reason: e.to_string(),
                });
                None
            }
        }
    }
}

/// Parse one source tree with `config`.
///
/// # Errors
/// Fatal errors only: no markup files under `dir`, an unreadable file, no
/// converter, or a failed whole-document conversion. Everything else
/// degrades and is reported in [`ParseOutput::warnings`].
pub fn parse_dir(dir: impl AsRef<Path>, config: &ParserConfig) -> Result<ParseOutput, Tex2MdError> {
    Tex2Md::new(config.clone())?.parse(dir)
}

/// Parse one source tree, leading with title and abstract units.
pub fn parse_article(
    dir: impl AsRef<Path>,
    metadata: &ArticleMetadata,
    config: &ParserConfig,
) -> Result<ParseOutput, Tex2MdError> {
    Tex2Md::new(config.clone())?.parse_article(dir, metadata)
}

/// Parse one source tree on the blocking thread pool.
pub async fn parse_dir_async(
    dir: impl Into<PathBuf>,
    config: &ParserConfig,
) -> Result<ParseOutput, Tex2MdError> {
    let parser = Tex2Md::new(config.clone())?;
    let dir = dir.into();
    tokio::task::spawn_blocking(move || parser.parse(&dir))
        .await
        .map_err(|e| Tex2MdError::Internal(format!("parse task failed: {e}")))?
}

/// Parse many source trees, at most `config.concurrency` at a time.
///
/// Results come back in input order, one per directory; a failed tree does
/// not affect the others.
///
/// # Errors
/// Only when the parser itself cannot be built (no converter).
pub async fn parse_many<I, P>(
    dirs: I,
    config: &ParserConfig,
) -> Result<Vec<Result<ParseOutput, Tex2MdError>>, Tex2MdError>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let parser = Arc::new(Tex2Md::new(config.clone())?);
    let dirs: Vec<PathBuf> = dirs.into_iter().map(Into::into).collect();
    info!("Parsing {} source trees, {} at a time", dirs.len(), config.concurrency);

    let mut results: Vec<(usize, Result<ParseOutput, Tex2MdError>)> =
        stream::iter(dirs.into_iter().enumerate().map(|(i, dir)| {
            let parser = Arc::clone(&parser);
            async move {
                let result = tokio::task::spawn_blocking(move || parser.parse(&dir))
                    .await
                    .unwrap_or_else(|e| Err(Tex2MdError::Internal(format!("parse task failed: {e}"))));
                (i, result)
            }
        }))
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    results.sort_by_key(|(i, _)| *i);
    Ok(results.into_iter().map(|(_, r)| r).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;
    use crate::output::UnitKind;
    use crate::progress::ParseProgressCallback;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn headings_only(latex: &str) -> Result<String, ConvertError> {
        Ok(latex
            .lines()
            .map(|line| match line.strip_prefix("\\section{") {
                Some(rest) => format!("# {}", rest.trim_end_matches('}')),
                None => line.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn parser() -> Tex2Md {
        let config = ParserConfig::builder()
            .converter(Arc::new(headings_only))
            .write_artifacts(false)
            .build()
            .unwrap();
        Tex2Md::new(config).unwrap()
    }

    fn tree(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    #[test]
    fn units_are_ordered_front_references_body_listing() {
        let dir = tree(&[
            (
                "main.tex",
                "\\begin{document}\n\\section{Intro}\n\nAs shown \\cite{k1}.\n\\end{document}",
            ),
            ("refs.bib", "@article{k1, author={Doe, Jane}, title={T}, year={2020}}"),
        ]);
        let meta = ArticleMetadata {
            title: "Paper".into(),
            summary: "Abstract.".into(),
            ..Default::default()
        };
        let output = parser().parse_article(dir.path(), &meta).unwrap();

        let kinds: Vec<UnitKind> = output.units.iter().map(|u| u.kind).collect();
        assert_eq!(
            kinds,
            vec![
                UnitKind::DocumentTitle,
                UnitKind::Abstract,
                UnitKind::Reference,
                UnitKind::Heading,
                UnitKind::BodyText,
                UnitKind::Reference,
            ]
        );
        assert_eq!(output.units[4].text, "As shown [1].");
        assert!(output.units[2].text.starts_with("[1]: https://"));
        assert_eq!(
            output.units.iter().map(|u| u.order).collect::<Vec<_>>(),
            (0..6).collect::<Vec<_>>()
        );
        assert!(output.warnings.is_empty(), "{:?}", output.warnings);
        assert_eq!(output.stats.citations, 1);
        assert_eq!(output.stats.units, 6);
        assert!(output.markdown_path.is_none());
    }

    #[test]
    fn missing_bibliography_is_a_warning() {
        let dir = tree(&[("main.tex", "\\section{A}\nText")]);
        let output = parser().parse(dir.path()).unwrap();
        assert_eq!(output.warnings, vec![ParseWarning::MissingBibliography]);
        assert!(output.units.iter().all(|u| u.kind != UnitKind::Reference));
    }

    #[test]
    fn markdown_artifact_written_when_enabled() {
        let dir = tree(&[("main.tex", "\\section{A}\nText")]);
        let config = ParserConfig::builder()
            .converter(Arc::new(headings_only))
            .build()
            .unwrap();
        let output = parse_dir(dir.path(), &config).unwrap();
        let path = output.markdown_path.expect("artifact");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# 1. A\n\nText");
    }

    #[derive(Default)]
    struct Recorder {
        stages: Mutex<Vec<ParseStage>>,
        errors: Mutex<Vec<String>>,
    }

    impl ParseProgressCallback for Recorder {
        fn on_stage(&self, _dir: &Path, stage: ParseStage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_parse_error(&self, _dir: &Path, error: &str) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    #[test]
    fn every_stage_is_reported() {
        let dir = tree(&[("main.tex", "Text")]);
        let recorder = Arc::new(Recorder::default());
        let config = ParserConfig::builder()
            .converter(Arc::new(headings_only))
            .write_artifacts(false)
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        parse_dir(dir.path(), &config).unwrap();
        assert_eq!(
            *recorder.stages.lock().unwrap(),
            vec![
                ParseStage::Flatten,
                ParseStage::PreProcess,
                ParseStage::Convert,
                ParseStage::PostProcess,
                ParseStage::Segment,
                ParseStage::Bibliography,
            ]
        );
    }

    #[test]
    fn converter_failure_is_fatal_and_reported() {
        let dir = tree(&[("main.tex", "Text")]);
        let recorder = Arc::new(Recorder::default());
        let failing = |_: &str| -> Result<String, ConvertError> { Err(ConvertError::Other("boom".into())) };
        let config = ParserConfig::builder()
            .converter(Arc::new(failing))
            .write_artifacts(false)
            .progress_callback(recorder.clone())
            .build()
            .unwrap();

        let err = parse_dir(dir.path(), &config).unwrap_err();
        assert!(matches!(err, Tex2MdError::ConversionFailed { .. }));
        assert_eq!(recorder.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn empty_directory_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = parser().parse(dir.path()).unwrap_err();
        assert!(matches!(err, Tex2MdError::NoSourceFiles { .. }));
    }
}
