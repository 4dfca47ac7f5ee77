//! Source-tree flattening: discover markup files, build the inclusion
//! graph, pick the root and inline every `\input` / `\include`.
//!
//! ## Graph model
//!
//! Files live in an arena (`Vec<SourceFile>`) and refer to each other by
//! index: `children` owns the inclusion edges, `parent` is a plain
//! back-index. An edge that would make a file its own ancestor is dropped
//! before it is recorded, so the graph is always a forest and the
//! flattening walk cannot loop. A visited set additionally guarantees that
//! a file included twice contributes its text only once.
//!
//! Paths are canonicalised before they are used as keys, so `sec1`,
//! `./sec1.tex` and `chapters/../sec1.tex` are the same node.

use crate::config::ParserConfig;
use crate::error::{ParseWarning, Tex2MdError};
use ignore::WalkBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

static RE_INCLUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:input|include)\{([^}]+)\}").unwrap());

/// The single logical document produced from a source directory.
#[derive(Debug, Clone)]
pub struct FlattenedSource {
    pub text: String,
    /// Markup files discovered in the tree (the flattened cache excluded).
    pub source_files: usize,
    /// The cached artifact that was read, or the one just written.
    pub artifact: Option<PathBuf>,
    pub from_cache: bool,
}

/// One discovered markup file.
#[derive(Debug)]
struct SourceFile {
    path: PathBuf,
    content: String,
    children: Vec<usize>,
    parent: Option<usize>,
}

/// Every file with `.{extension}` under `dir`, sorted, the cache excluded.
///
/// Hidden files and ignore-listed paths are included: a paper's build
/// setup has no bearing on which sources belong to it.
pub fn discover(dir: &Path, extension: &str, exclude: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkBuilder::new(dir)
        .standard_filters(false)
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable directory entry: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension().is_some_and(|e| e == extension)
                && path.file_name().is_some_and(|n| n != exclude)
        })
        .collect();
    files.sort();
    files
}

/// Read a markup file, dropping column-0 `%` comment lines.
///
/// Invalid UTF-8 is replaced rather than rejected; old papers are often
/// Latin-1.
pub fn load_source(path: &Path) -> Result<String, Tex2MdError> {
    let bytes = std::fs::read(path).map_err(|source| Tex2MdError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(strip_comment_lines(&String::from_utf8_lossy(&bytes)))
}

/// Remove lines that start with `%`, keeping every other byte intact.
pub fn strip_comment_lines(text: &str) -> String {
    text.split_inclusive('\n')
        .filter(|line| !line.starts_with('%'))
        .collect()
}

/// Flatten the source tree under `dir` into one document.
///
/// Fails only when the directory holds no markup files at all.
pub fn flatten_dir(
    dir: &Path,
    config: &ParserConfig,
    warnings: &mut Vec<ParseWarning>,
) -> Result<FlattenedSource, Tex2MdError> {
    let files = discover(dir, &config.source_extension, &config.flatten_cache_name);
    if files.is_empty() {
        return Err(Tex2MdError::NoSourceFiles {
            dir: dir.to_path_buf(),
            extension: config.source_extension.clone(),
        });
    }

    let cache = dir.join(&config.flatten_cache_name);
    if config.use_flatten_cache && cache.is_file() {
        debug!("Using cached flattened source {}", cache.display());
        return Ok(FlattenedSource {
            text: load_source(&cache)?,
            source_files: files.len(),
            artifact: Some(cache),
            from_cache: true,
        });
    }

    if let [only] = files.as_slice() {
        debug!("Single source file {}", only.display());
        return Ok(FlattenedSource {
            text: load_source(only)?,
            source_files: 1,
            artifact: None,
            from_cache: false,
        });
    }

    let graph = SourceGraph::build(dir, &files, &config.source_extension, warnings)?;
    let root = graph.root(warnings);
    info!(
        "Flattening {} files from root {}",
        files.len(),
        graph.files[root].path.display()
    );
    let text = graph.flatten(root);

    let mut artifact = None;
    if config.write_artifacts {
        match write_atomic(&cache, &text) {
            Ok(()) => artifact = Some(cache),
            Err(e) => {
                warn!("Could not write {}: {e}", cache.display());
                warnings.push(ParseWarning::ArtifactWriteFailed {
                    path: cache,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(FlattenedSource {
        text,
        source_files: files.len(),
        artifact,
        from_cache: false,
    })
}

/// Write `text` to `path` through a sibling temp file and a rename, so a
/// concurrent reader never sees a half-written artifact.
pub(crate) fn write_atomic(path: &Path, text: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(text.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

struct SourceGraph {
    files: Vec<SourceFile>,
    index: HashMap<PathBuf, usize>,
    dir: PathBuf,
    extension: String,
}

impl SourceGraph {
    fn build(
        dir: &Path,
        paths: &[PathBuf],
        extension: &str,
        warnings: &mut Vec<ParseWarning>,
    ) -> Result<Self, Tex2MdError> {
        let mut files = Vec::with_capacity(paths.len());
        let mut index = HashMap::new();
        for path in paths {
            let key = path.canonicalize().unwrap_or_else(|_| path.clone());
            index.insert(key, files.len());
            files.push(SourceFile {
                path: path.clone(),
                content: load_source(path)?,
                children: Vec::new(),
                parent: None,
            });
        }
        let mut graph = Self {
            files,
            index,
            dir: dir.to_path_buf(),
            extension: extension.to_string(),
        };

        for from in 0..graph.files.len() {
            let targets: Vec<String> = RE_INCLUDE
                .captures_iter(&graph.files[from].content)
                .map(|c| c[1].trim().to_string())
                .collect();
            for target in targets {
                let Some(to) = graph.resolve(&target) else {
                    let missing = graph.target_path(&target);
                    warn!(
                        "{} includes missing file {}",
                        graph.files[from].path.display(),
                        missing.display()
                    );
                    warnings.push(ParseWarning::MissingInclude {
                        from: graph.files[from].path.clone(),
                        target: missing,
                    });
                    continue;
                };
                if graph.is_ancestor_or_self(to, from) {
                    warn!(
                        "Ignoring include cycle through {}",
                        graph.files[to].path.display()
                    );
                    warnings.push(ParseWarning::IncludeCycle {
                        path: graph.files[to].path.clone(),
                    });
                    continue;
                }
                if graph.files[to].parent.is_none() {
                    graph.files[to].parent = Some(from);
                    graph.files[from].children.push(to);
                }
            }
        }
        Ok(graph)
    }

    /// Include targets are relative to the source directory; the markup
    /// extension is appended when missing.
    fn target_path(&self, target: &str) -> PathBuf {
        let suffix = format!(".{}", self.extension);
        if target.ends_with(&suffix) {
            self.dir.join(target)
        } else {
            self.dir.join(format!("{target}{suffix}"))
        }
    }

    fn resolve(&self, target: &str) -> Option<usize> {
        let path = self.target_path(target);
        let key = path.canonicalize().ok()?;
        self.index.get(&key).copied()
    }

    fn is_ancestor_or_self(&self, candidate: usize, mut node: usize) -> bool {
        loop {
            if node == candidate {
                return true;
            }
            match self.files[node].parent {
                Some(p) => node = p,
                None => return false,
            }
        }
    }

    /// The parentless file to flatten from. Files declaring a document
    /// class win; ties go to the one with the most includes, then to path
    /// order.
    fn root(&self, warnings: &mut Vec<ParseWarning>) -> usize {
        let roots: Vec<usize> = (0..self.files.len())
            .filter(|&i| self.files[i].parent.is_none())
            .collect();
        let declares_class = |i: &usize| self.files[*i].content.contains("\\documentclass");
        let preferred: Vec<usize> = if roots.iter().any(declares_class) {
            roots.iter().copied().filter(declares_class).collect()
        } else {
            roots.clone()
        };
        let chosen = preferred
            .iter()
            .copied()
            .min_by_key(|&i| (Reverse(self.files[i].children.len()), i))
            .unwrap_or(0);

        if roots.len() > 1 {
            warn!(
                "{} candidate root files, using {}",
                roots.len(),
                self.files[chosen].path.display()
            );
            warnings.push(ParseWarning::AmbiguousRoot {
                chosen: self.files[chosen].path.clone(),
                candidates: roots.len(),
            });
        }
        chosen
    }

    fn flatten(&self, root: usize) -> String {
        let mut visited = HashSet::new();
        self.flatten_file(root, &mut visited)
    }

    /// Replace each include directive with the included file's own
    /// flattened text. Depth is bounded by the number of files because no
    /// file is entered twice.
    fn flatten_file(&self, file: usize, visited: &mut HashSet<usize>) -> String {
        if !visited.insert(file) {
            return String::new();
        }
        let content = &self.files[file].content;
        let mut out = String::with_capacity(content.len());
        let mut cursor = 0;
        for caps in RE_INCLUDE.captures_iter(content) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&content[cursor..whole.start()]);
            if let Some(child) = self.resolve(caps[1].trim()) {
                out.push_str(&self.flatten_file(child, visited));
            }
            cursor = whole.end();
        }
        out.push_str(&content[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config() -> ParserConfig {
        ParserConfig::builder().build().unwrap()
    }

    fn tree(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, body) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, body).unwrap();
        }
        dir
    }

    #[test]
    fn comment_lines_are_dropped() {
        assert_eq!(
            strip_comment_lines("a\n% gone\nb % kept\n%last"),
            "a\nb % kept\n"
        );
    }

    #[test]
    fn empty_directory_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = flatten_dir(dir.path(), &config(), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, Tex2MdError::NoSourceFiles { .. }));
    }

    #[test]
    fn single_file_is_returned_unchanged() {
        let body = "\\documentclass{article}\n\\begin{document}\nHi.\n\\end{document}\n";
        let dir = tree(&[("paper.tex", body)]);
        let flat = flatten_dir(dir.path(), &config(), &mut Vec::new()).unwrap();
        assert_eq!(flat.text, body);
        assert_eq!(flat.source_files, 1);
        assert!(!dir.path().join("__main_full__.tex").exists());
    }

    #[test]
    fn includes_are_inlined_and_cached() {
        let dir = tree(&[
            ("main.tex", "\\section{Intro}\n\\input{sec1}"),
            ("sec1.tex", "Hello world."),
        ]);
        let mut warnings = Vec::new();
        let flat = flatten_dir(dir.path(), &config(), &mut warnings).unwrap();
        assert_eq!(flat.text, "\\section{Intro}\nHello world.");
        assert!(warnings.is_empty(), "{warnings:?}");
        let cache = dir.path().join("__main_full__.tex");
        assert_eq!(fs::read_to_string(&cache).unwrap(), flat.text);

        let again = flatten_dir(dir.path(), &config(), &mut Vec::new()).unwrap();
        assert!(again.from_cache);
        assert_eq!(again.text, flat.text);
        assert_eq!(again.source_files, 2);
    }

    #[test]
    fn nested_directories_and_explicit_extension() {
        let dir = tree(&[
            ("main.tex", "\\documentclass{article}\nA \\include{chapters/one.tex} Z"),
            ("chapters/one.tex", "B \\input{chapters/two} C"),
            ("chapters/two.tex", "middle"),
        ]);
        let flat = flatten_dir(dir.path(), &config(), &mut Vec::new()).unwrap();
        assert!(flat.text.ends_with("A B middle C Z"), "{}", flat.text);
    }

    #[test]
    fn missing_include_becomes_empty() {
        let dir = tree(&[
            ("main.tex", "x \\input{ghost} y \\input{real}"),
            ("real.tex", "R"),
        ]);
        let mut warnings = Vec::new();
        let flat = flatten_dir(dir.path(), &config(), &mut warnings).unwrap();
        assert_eq!(flat.text, "x  y R");
        assert!(matches!(warnings[0], ParseWarning::MissingInclude { .. }));
    }

    #[test]
    fn cycles_terminate() {
        let dir = tree(&[
            ("a.tex", "\\documentclass{article}\nA[\\input{b}]"),
            ("b.tex", "B[\\input{a}]"),
        ]);
        let mut warnings = Vec::new();
        let flat = flatten_dir(dir.path(), &config(), &mut warnings).unwrap();
        assert!(flat.text.ends_with("A[B[]]"), "{}", flat.text);
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ParseWarning::IncludeCycle { .. })));
    }

    #[test]
    fn duplicate_inclusion_contributes_once() {
        let dir = tree(&[
            ("main.tex", "\\input{s}|\\input{s}"),
            ("s.tex", "S"),
        ]);
        let flat = flatten_dir(dir.path(), &config(), &mut Vec::new()).unwrap();
        assert_eq!(flat.text, "S|");
    }

    #[test]
    fn stray_file_is_reported_as_ambiguous_root() {
        let dir = tree(&[
            ("main.tex", "\\documentclass{article}\n\\input{a}"),
            ("a.tex", "A"),
            ("unused.tex", "U"),
        ]);
        let mut warnings = Vec::new();
        let flat = flatten_dir(dir.path(), &config(), &mut warnings).unwrap();
        assert!(flat.text.ends_with('A'));
        assert!(matches!(
            warnings[0],
            ParseWarning::AmbiguousRoot { candidates: 2, .. }
        ));
    }

    #[test]
    fn cache_can_be_bypassed() {
        let dir = tree(&[
            ("main.tex", "\\input{a}"),
            ("a.tex", "new"),
            ("__main_full__.tex", "stale"),
        ]);
        let config = ParserConfig::builder()
            .use_flatten_cache(false)
            .write_artifacts(false)
            .build()
            .unwrap();
        let flat = flatten_dir(dir.path(), &config, &mut Vec::new()).unwrap();
        assert_eq!(flat.text, "new");
        assert_eq!(
            fs::read_to_string(dir.path().join("__main_full__.tex")).unwrap(),
            "stale"
        );
    }
}
