//! Configuration types for LaTeX-to-content-unit parsing.
//!
//! All parsing behaviour is controlled through [`ParserConfig`], built via
//! its [`ParserConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across worker tasks and to diff two runs.

use crate::error::Tex2MdError;
use crate::pipeline::converter::{MarkdownConverter, PandocConverter};
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable naming an explicit `pandoc` binary.
pub const PANDOC_ENV: &str = "TEX2MD_PANDOC";

/// Configuration for parsing a LaTeX source tree.
///
/// # Example
/// ```rust
/// use edgequake_tex2md::ParserConfig;
///
/// let config = ParserConfig::builder()
///     .use_flatten_cache(false)
///     .write_artifacts(false)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ParserConfig {
    /// Markup file extension, without the dot. Default: `tex`.
    pub source_extension: String,

    /// Bibliography file extension, without the dot. Default: `bib`.
    pub bibliography_extension: String,

    /// File name of the flattened-source artifact written into the source
    /// directory. Default: `__main_full__.tex`.
    pub flatten_cache_name: String,

    /// File name of the rendered-Markdown debug artifact. Default: `__main_full__.md`.
    pub markdown_artifact_name: String,

    /// Reuse a previously written flattened artifact when present. Default: true.
    ///
    /// Turn off after editing the source tree, otherwise the stale artifact
    /// shadows the edits.
    pub use_flatten_cache: bool,

    /// Persist the flattened source and rendered Markdown next to the
    /// sources. Default: true.
    pub write_artifacts: bool,

    /// Drop front matter before the first numbered section or first hoisted
    /// block. Default: true.
    ///
    /// Title, author and abstract content is supplied separately through
    /// [`crate::output::ArticleMetadata`]; whatever the converter produced
    /// before section 1 is usually leftover title-page markup.
    pub trim_front_matter: bool,

    /// Base URL for synthesized search links of bibliography entries with
    /// no identifier. The form-encoded title is appended.
    pub search_url: String,

    /// Prefix for bare DOI identifiers. Default: `https://doi.org/`.
    pub doi_resolver: String,

    /// Maximum number of documents parsed at once by [`crate::parse_many`]. Default: 4.
    pub concurrency: usize,

    /// Pre-constructed converter. Takes precedence over `pandoc_path`.
    pub converter: Option<Arc<dyn MarkdownConverter>>,

    /// Explicit path to the `pandoc` binary.
    pub pandoc_path: Option<PathBuf>,

    /// Optional progress-event sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            source_extension: "tex".to_string(),
            bibliography_extension: "bib".to_string(),
            flatten_cache_name: "__main_full__.tex".to_string(),
            markdown_artifact_name: "__main_full__.md".to_string(),
            use_flatten_cache: true,
            write_artifacts: true,
            trim_front_matter: true,
            search_url: "https://www.bing.com/search?q=".to_string(),
            doi_resolver: "https://doi.org/".to_string(),
            concurrency: 4,
            converter: None,
            pandoc_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserConfig")
            .field("source_extension", &self.source_extension)
            .field("bibliography_extension", &self.bibliography_extension)
            .field("flatten_cache_name", &self.flatten_cache_name)
            .field("markdown_artifact_name", &self.markdown_artifact_name)
            .field("use_flatten_cache", &self.use_flatten_cache)
            .field("write_artifacts", &self.write_artifacts)
            .field("trim_front_matter", &self.trim_front_matter)
            .field("concurrency", &self.concurrency)
            .field(
                "converter",
                &self.converter.as_ref().map(|c| c.name().to_string()),
            )
            .field("pandoc_path", &self.pandoc_path)
            .finish()
    }
}

impl ParserConfig {
    /// Create a new builder for `ParserConfig`.
    pub fn builder() -> ParserConfigBuilder {
        ParserConfigBuilder {
            config: Self::default(),
        }
    }

    /// Resolve the converter, from most-specific to least-specific:
    ///
    /// 1. a pre-built `converter`
    /// 2. `pandoc_path`
    /// 3. the `TEX2MD_PANDOC` environment variable
    /// 4. `pandoc` found on `PATH`
    pub fn resolve_converter(&self) -> Result<Arc<dyn MarkdownConverter>, Tex2MdError> {
        if let Some(ref converter) = self.converter {
            return Ok(Arc::clone(converter));
        }
        if let Some(ref path) = self.pandoc_path {
            return Ok(Arc::new(PandocConverter::new(path)));
        }
        if let Ok(path) = std::env::var(PANDOC_ENV) {
            if !path.is_empty() {
                return Ok(Arc::new(PandocConverter::new(path)));
            }
        }
        PandocConverter::locate()
            .map(|p| Arc::new(p) as Arc<dyn MarkdownConverter>)
            .ok_or_else(|| Tex2MdError::ConverterUnavailable {
                hint: format!(
                    "Install pandoc (https://pandoc.org/installing.html), \
                     set {PANDOC_ENV}=/path/to/pandoc, or supply a converter."
                ),
            })
    }
}

/// Builder for [`ParserConfig`].
pub struct ParserConfigBuilder {
    config: ParserConfig,
}

impl fmt::Debug for ParserConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.config, f)
    }
}

impl ParserConfigBuilder {
    pub fn source_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.source_extension = ext.into();
        self
    }

    pub fn bibliography_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.bibliography_extension = ext.into();
        self
    }

    pub fn flatten_cache_name(mut self, name: impl Into<String>) -> Self {
        self.config.flatten_cache_name = name.into();
        self
    }

    pub fn markdown_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.config.markdown_artifact_name = name.into();
        self
    }

    pub fn use_flatten_cache(mut self, v: bool) -> Self {
        self.config.use_flatten_cache = v;
        self
    }

    pub fn write_artifacts(mut self, v: bool) -> Self {
        self.config.write_artifacts = v;
        self
    }

    pub fn trim_front_matter(mut self, v: bool) -> Self {
        self.config.trim_front_matter = v;
        self
    }

    pub fn search_url(mut self, url: impl Into<String>) -> Self {
        self.config.search_url = url.into();
        self
    }

    pub fn doi_resolver(mut self, prefix: impl Into<String>) -> Self {
        self.config.doi_resolver = prefix.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn converter(mut self, converter: Arc<dyn MarkdownConverter>) -> Self {
        self.config.converter = Some(converter);
        self
    }

    pub fn pandoc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pandoc_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ParserConfig, Tex2MdError> {
        let c = &self.config;
        for (what, ext) in [
            ("source extension", &c.source_extension),
            ("bibliography extension", &c.bibliography_extension),
        ] {
            if ext.is_empty() || ext.starts_with('.') {
                return Err(Tex2MdError::InvalidConfig(format!(
                    "{what} must be non-empty and given without a leading dot, got '{ext}'"
                )));
            }
        }
        if c.flatten_cache_name.is_empty() || c.markdown_artifact_name.is_empty() {
            return Err(Tex2MdError::InvalidConfig(
                "artifact file names must be non-empty".into(),
            ));
        }
        if c.flatten_cache_name == c.markdown_artifact_name {
            return Err(Tex2MdError::InvalidConfig(
                "flattened and Markdown artifacts need distinct names".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(Tex2MdError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;

    #[test]
    fn defaults_build() {
        let config = ParserConfig::builder().build().expect("defaults are valid");
        assert_eq!(config.source_extension, "tex");
        assert_eq!(config.flatten_cache_name, "__main_full__.tex");
        assert!(config.use_flatten_cache);
    }

    #[test]
    fn dotted_extension_rejected() {
        let err = ParserConfig::builder()
            .source_extension(".tex")
            .build()
            .unwrap_err();
        assert!(matches!(err, Tex2MdError::InvalidConfig(_)));
    }

    #[test]
    fn clashing_artifact_names_rejected() {
        let err = ParserConfig::builder()
            .flatten_cache_name("same")
            .markdown_artifact_name("same")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("distinct"));
    }

    #[test]
    fn concurrency_clamped_to_one() {
        let config = ParserConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn explicit_converter_wins() {
        let conv = |s: &str| -> Result<String, ConvertError> { Ok(s.to_string()) };
        let config = ParserConfig::builder()
            .converter(Arc::new(conv))
            .pandoc_path("/nonexistent/pandoc")
            .build()
            .unwrap();
        let resolved = config.resolve_converter().expect("converter");
        assert_eq!(resolved.name(), "custom");
        assert!(format!("{config:?}").contains("custom"));
    }
}
