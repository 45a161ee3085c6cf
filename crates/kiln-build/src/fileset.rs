//! Source file resolution from include/exclude globs
//!
//! Patterns are relative to the project root. A leading `!` marks an
//! exclusion, and exclusions always win over every include in the same list
//! regardless of where they appear. Each resolved file remembers the literal
//! base directory of the include that matched it, so destinations can mirror
//! the tree below that base.

use crate::error::{BuildError, BuildResult};
use glob::{MatchOptions, Pattern};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A resolved source file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceFile {
    /// Absolute (project-rooted) path of the file
    pub path: PathBuf,
    /// Literal base directory of the matching pattern
    pub base: PathBuf,
    /// Path relative to `base`
    pub relative: PathBuf,
}

impl SourceFile {
    /// Create a source file from its path and pattern base
    pub fn new(path: impl Into<PathBuf>, base: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let base = base.into();
        let relative = path
            .strip_prefix(&base)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(path.file_name().unwrap_or_default()));
        Self {
            path,
            base,
            relative,
        }
    }

    /// File name including extension
    pub fn file_name(&self) -> String {
        self.relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Base name without extension
    pub fn stem(&self) -> String {
        self.relative
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Extension without the dot, if any
    pub fn extension(&self) -> Option<String> {
        self.relative
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
    }

    /// Directory of the file relative to its base ("" for top-level files)
    pub fn relative_dir(&self) -> &Path {
        self.relative.parent().unwrap_or(Path::new(""))
    }
}

/// A de-duplicated, path-ordered set of resolved files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    files: Vec<SourceFile>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SourceFile> {
        self.files.iter()
    }

    /// Keep only files matching the predicate
    pub fn retain(&mut self, mut keep: impl FnMut(&SourceFile) -> bool) {
        self.files.retain(|f| keep(f));
    }

    /// Paths of all files, in order
    pub fn paths(&self) -> Vec<&Path> {
        self.files.iter().map(|f| f.path.as_path()).collect()
    }
}

impl FromIterator<SourceFile> for FileSet {
    fn from_iter<I: IntoIterator<Item = SourceFile>>(iter: I) -> Self {
        let by_path: BTreeMap<PathBuf, SourceFile> =
            iter.into_iter().map(|f| (f.path.clone(), f)).collect();
        Self {
            files: by_path.into_values().collect(),
        }
    }
}

impl IntoIterator for FileSet {
    type Item = SourceFile;
    type IntoIter = std::vec::IntoIter<SourceFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

impl<'a> IntoIterator for &'a FileSet {
    type Item = &'a SourceFile;
    type IntoIter = std::slice::Iter<'a, SourceFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

/// One parsed source pattern
#[derive(Debug, Clone)]
pub struct SourcePattern {
    raw: String,
    negated: bool,
    pattern: Pattern,
    base: PathBuf,
    literal: bool,
}

impl SourcePattern {
    /// Parse a pattern such as `./Styles/**/*.scss` or `!node_modules/rxjs/src/**`
    pub fn parse(raw: &str) -> BuildResult<Self> {
        let (negated, body) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let body = trim_current_dir(body);
        if body.is_empty() {
            return Err(BuildError::InvalidDeclaration(format!(
                "empty source pattern '{}'",
                raw
            )));
        }

        let pattern = Pattern::new(body).map_err(|e| {
            BuildError::InvalidDeclaration(format!("invalid glob '{}': {}", raw, e.msg))
        })?;

        let segments: Vec<&str> = body.split('/').collect();
        let literal_len = segments
            .iter()
            .take_while(|s| !has_glob_chars(s))
            .count();
        let literal = literal_len == segments.len();
        let base = if literal {
            Path::new(body).parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            segments[..literal_len].iter().collect()
        };

        Ok(Self {
            raw: raw.to_string(),
            negated,
            pattern,
            base,
            literal,
        })
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Literal directory prefix, relative to the project root
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Match a path relative to the project root
    pub fn matches(&self, relative: &Path) -> bool {
        self.pattern
            .matches_with(&to_slash(relative), MATCH_OPTIONS)
    }
}

impl std::fmt::Display for SourcePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Resolve patterns against a project root
///
/// Missing base directories and empty matches are not errors.
pub fn resolve(root: &Path, patterns: &[String]) -> BuildResult<FileSet> {
    let parsed = patterns
        .iter()
        .map(|p| SourcePattern::parse(p))
        .collect::<BuildResult<Vec<_>>>()?;
    let (excludes, includes): (Vec<_>, Vec<_>) = parsed.into_iter().partition(|p| p.negated);

    let mut found: BTreeMap<PathBuf, SourceFile> = BTreeMap::new();

    for include in &includes {
        let base = root.join(&include.base);

        if include.literal {
            let path = root.join(trim_current_dir(&include.raw));
            if path.is_file() {
                found
                    .entry(path.clone())
                    .or_insert_with(|| SourceFile::new(path, base));
            }
            continue;
        }

        if !base.is_dir() {
            continue;
        }

        for entry in WalkDir::new(&base)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            if include.matches(relative) {
                found
                    .entry(entry.path().to_path_buf())
                    .or_insert_with(|| SourceFile::new(entry.path(), &base));
            }
        }
    }

    found.retain(|path, _| {
        let relative = path.strip_prefix(root).unwrap_or(path);
        !excludes.iter().any(|e| e.matches(relative))
    });

    Ok(FileSet {
        files: found.into_values().collect(),
    })
}

fn has_glob_chars(segment: &str) -> bool {
    segment.contains(['*', '?', '['])
}

fn trim_current_dir(mut pattern: &str) -> &str {
    while let Some(rest) = pattern.strip_prefix("./") {
        pattern = rest;
    }
    pattern
}

/// Render a relative path with `/` separators for glob matching
pub(crate) fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
