//! Per-file transform pipeline
//!
//! Every asset group owns a fixed, ordered list of [`PipelineStep`]s. Each
//! step is gated on the build mode; a disabled step leaves the file untouched,
//! so incremental copies are byte-identical to their sources.

pub mod minify;
pub mod source_map;

pub use minify::{LineMinifier, Minifier};
pub use source_map::SourceMap;

use crate::assets::{AssetGroup, AssetKind};
use crate::changed::ChangedFilter;
use crate::context::BuildContext;
use crate::error::{BuildError, BuildResult, TransformError};
use crate::fileset::{to_slash, SourceFile};
use crate::mode::BuildMode;
use crate::tools::Toolchain;
use kiln_config::RenameConfig;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Computes a new base name from the original file
pub type RenameFn = Arc<dyn Fn(&SourceFile) -> String + Send + Sync>;

/// Rename rule for an output base name; the extension is always preserved
#[derive(Clone)]
pub enum RenameRule {
    /// Fixed base name
    Static(String),
    /// `{name}` and `{ext}` are replaced from the original file
    Template(String),
    /// Arbitrary function of the original file
    Computed(RenameFn),
}

impl RenameRule {
    pub fn computed(f: impl Fn(&SourceFile) -> String + Send + Sync + 'static) -> Self {
        Self::Computed(Arc::new(f))
    }

    /// New base name for a file
    pub fn base_name(&self, file: &SourceFile) -> String {
        match self {
            Self::Static(name) => name.clone(),
            Self::Template(template) => template
                .replace("{name}", &file.stem())
                .replace("{ext}", &file.extension().unwrap_or_default()),
            Self::Computed(f) => f(file),
        }
    }

    /// Apply to an output path relative to the group destination
    ///
    /// The base name may contain `/` (e.g., a scoped package name), which
    /// places the output in a subdirectory. It may not climb out of it.
    pub fn apply(&self, file: &SourceFile, relative: &Path) -> Result<PathBuf, String> {
        let base = self.base_name(file);
        if base.is_empty() {
            return Err("rename produced an empty name".to_string());
        }
        if !Path::new(&base)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(format!("rename '{}' leaves the destination directory", base));
        }

        let name = match relative.extension() {
            Some(ext) => format!("{}.{}", base, ext.to_string_lossy()),
            None => base,
        };
        Ok(relative.parent().unwrap_or(Path::new("")).join(name))
    }
}

impl From<&RenameConfig> for RenameRule {
    fn from(config: &RenameConfig) -> Self {
        match config {
            RenameConfig::Static(name) => Self::Static(name.clone()),
            RenameConfig::Template { template } => Self::Template(template.clone()),
        }
    }
}

impl std::fmt::Debug for RenameRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(name) => f.debug_tuple("Static").field(name).finish(),
            Self::Template(template) => f.debug_tuple("Template").field(template).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// One gated transformation stage
#[derive(Debug, Clone)]
pub enum PipelineStep {
    SourceMapInit,
    Minify,
    Rename(RenameRule),
    StyleCompile,
    /// Write the map under `dir`, relative to the group destination
    SourceMapWrite { dir: PathBuf },
}

impl PipelineStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SourceMapInit => "source-map-init",
            Self::Minify => "minify",
            Self::Rename(_) => "rename",
            Self::StyleCompile => "style-compile",
            Self::SourceMapWrite { .. } => "source-map-write",
        }
    }

    /// Whether the step runs in `mode`
    pub fn is_enabled(&self, mode: BuildMode) -> bool {
        match self {
            Self::SourceMapInit | Self::Minify | Self::SourceMapWrite { .. } => mode.is_full(),
            Self::Rename(_) | Self::StyleCompile => true,
        }
    }
}

/// A serialised map waiting to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapFile {
    /// Path relative to the group destination
    pub relative: PathBuf,
    pub contents: String,
}

/// One file in flight through a pipeline
#[derive(Debug, Clone)]
pub struct FileItem {
    pub source: SourceFile,
    /// Output path relative to the group destination
    pub relative: PathBuf,
    pub contents: Vec<u8>,
    pub map: Option<SourceMap>,
    pub map_file: Option<MapFile>,
}

impl FileItem {
    pub fn new(source: SourceFile, contents: Vec<u8>) -> Self {
        Self {
            relative: source.relative.clone(),
            source,
            contents,
            map: None,
            map_file: None,
        }
    }

    fn output_name(&self) -> String {
        self.relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn text(&self, step: &PipelineStep) -> Result<&str, TransformError> {
        std::str::from_utf8(&self.contents).map_err(|_| self.error(step, "file is not valid UTF-8"))
    }

    fn error(&self, step: &PipelineStep, message: impl ToString) -> TransformError {
        TransformError::new(&self.source.path, step.name(), message)
    }
}

/// Result of running one asset group
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub group: String,
    /// Output files written
    pub written: Vec<PathBuf>,
    /// Source maps written
    pub maps: Vec<PathBuf>,
    /// Files that failed and were skipped
    pub failures: Vec<TransformError>,
    /// Files dropped by the changed filter
    pub unchanged: usize,
}

impl PipelineReport {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Default::default()
        }
    }

    /// Fold another report's counts into this one
    pub fn absorb(&mut self, other: PipelineReport) {
        self.written.extend(other.written);
        self.maps.extend(other.maps);
        self.failures.extend(other.failures);
        self.unchanged += other.unchanged;
    }
}

/// Ordered step list for one asset group
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
}

impl Pipeline {
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self { steps }
    }

    /// Standard steps for a group's kind
    pub fn for_group(group: &AssetGroup) -> Self {
        let write = PipelineStep::SourceMapWrite {
            dir: group.maps_dir.clone(),
        };
        let steps = match group.kind {
            AssetKind::Lib | AssetKind::Package => {
                let mut steps = vec![PipelineStep::SourceMapInit, PipelineStep::Minify];
                if let Some(rule) = &group.rename {
                    steps.push(PipelineStep::Rename(rule.clone()));
                }
                steps.push(write);
                steps
            }
            AssetKind::Module => vec![PipelineStep::SourceMapInit, PipelineStep::Minify, write],
            AssetKind::Style => vec![PipelineStep::SourceMapInit, PipelineStep::StyleCompile, write],
        };
        Self { steps }
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Run every enabled step over one file
    pub async fn apply(
        &self,
        mut item: FileItem,
        ctx: &BuildContext,
        toolchain: &Toolchain,
    ) -> Result<FileItem, TransformError> {
        for step in &self.steps {
            if !step.is_enabled(ctx.mode()) {
                continue;
            }
            debug!(file = %item.source.path.display(), step = step.name(), "applying step");
            item = apply_step(step, item, ctx, toolchain).await?;
        }
        Ok(item)
    }
}

async fn apply_step(
    step: &PipelineStep,
    mut item: FileItem,
    ctx: &BuildContext,
    toolchain: &Toolchain,
) -> Result<FileItem, TransformError> {
    match step {
        PipelineStep::SourceMapInit => {
            let map = SourceMap::identity(
                item.output_name(),
                to_slash(&item.source.relative),
                item.text(step)?,
            );
            item.map = Some(map);
        }
        PipelineStep::Minify => {
            let map = item.map.take();
            let minified = toolchain.minifier.minify(item.text(step)?, map, ctx).await;
            let (minified, map) = minified.map_err(|e| item.error(step, e))?;
            item.contents = minified.into_bytes();
            item.map = map;
        }
        PipelineStep::Rename(rule) => {
            item.relative = rule
                .apply(&item.source, &item.relative)
                .map_err(|e| item.error(step, e))?;
            let name = item.output_name();
            if let Some(map) = item.map.as_mut() {
                map.set_file(name);
            }
        }
        PipelineStep::StyleCompile => {
            let css = toolchain
                .style_compiler
                .compile(&item.source, item.text(step)?, ctx.mode().output_style(), ctx)
                .await
                .map_err(|e| item.error(step, e))?;
            item.relative.set_extension("css");
            let name = item.output_name();
            if let Some(map) = item.map.as_mut() {
                map.collapse(css.lines().count());
                map.set_file(name);
            }
            item.contents = css.into_bytes();
        }
        PipelineStep::SourceMapWrite { dir } => {
            let Some(map) = item.map.take() else {
                return Ok(item);
            };
            let mut map_name = item.relative.clone().into_os_string();
            map_name.push(".map");
            let relative = dir.join(map_name);

            let depth = item.relative.components().count().saturating_sub(1);
            let url = format!("{}{}", "../".repeat(depth), to_slash_keep_parent(&relative));
            let comment = if item.relative.extension().is_some_and(|e| e == "css") {
                format!("/*# sourceMappingURL={} */\n", url)
            } else {
                format!("//# sourceMappingURL={}\n", url)
            };
            if !item.contents.is_empty() && !item.contents.ends_with(b"\n") {
                item.contents.push(b'\n');
            }
            item.contents.extend_from_slice(comment.as_bytes());

            let contents = map.to_json().map_err(|e| item.error(step, e))?;
            item.map_file = Some(MapFile { relative, contents });
        }
    }
    Ok(item)
}

/// Like `to_slash`, but keeps `..` so relative map URLs can climb
fn to_slash_keep_parent(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve, filter, transform and write one asset group
///
/// Per-file transform errors are logged and collected; a strict group fails
/// with the first one. Write errors always fail the group.
pub async fn run_group(
    group: &AssetGroup,
    ctx: &BuildContext,
    toolchain: &Toolchain,
) -> BuildResult<PipelineReport> {
    let start = Instant::now();
    let dest_root = ctx.output_root().join(&group.dest);
    let pipeline = Pipeline::for_group(group);
    let mut report = PipelineReport::new(&group.name);

    let mut files = group.resolve(ctx.project_root())?;
    if group.kind == AssetKind::Style {
        files.retain(|f| !f.file_name().starts_with('_'));
        let candidates = files.len();
        files = ChangedFilter::new(&dest_root)
            .with_extension("css")
            .filter(files);
        report.unchanged = candidates - files.len();
    }

    for source in files {
        let item = match tokio::fs::read(&source.path).await {
            Ok(contents) => FileItem::new(source, contents),
            Err(e) => {
                let error = TransformError::new(&source.path, "read", e);
                warn!(group = %group.name, "{}", error);
                report.failures.push(error);
                continue;
            }
        };

        let item = match pipeline.apply(item, ctx, toolchain).await {
            Ok(item) => item,
            Err(error) => {
                warn!(group = %group.name, "{}", error);
                report.failures.push(error);
                continue;
            }
        };

        let output = dest_root.join(&item.relative);
        write_file(&output, &item.contents).await?;
        report.written.push(output);

        if let Some(map) = &item.map_file {
            let path = dest_root.join(&map.relative);
            write_file(&path, map.contents.as_bytes()).await?;
            report.maps.push(path);
        }
    }

    if group.strict {
        if let Some(first) = report.failures.first() {
            return Err(BuildError::Transform(first.clone()));
        }
    }

    info!(
        group = %group.name,
        written = report.written.len(),
        maps = report.maps.len(),
        failed = report.failures.len(),
        unchanged = report.unchanged,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "group finished"
    );
    Ok(report)
}

async fn write_file(path: &Path, contents: &[u8]) -> BuildResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BuildError::io(parent, e))?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| BuildError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetSource;
    use crate::tools::StyleCompiler;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    struct UpperCss;

    #[async_trait]
    impl StyleCompiler for UpperCss {
        async fn compile(
            &self,
            _source: &SourceFile,
            text: &str,
            style: crate::mode::OutputStyle,
            _ctx: &BuildContext,
        ) -> Result<String, String> {
            if text.contains("error") {
                return Err("syntax error".to_string());
            }
            Ok(format!("/* {} */\n{}", style, text.to_uppercase()))
        }
    }

    /// Rejects any script containing `eval`
    struct NoEval;

    #[async_trait]
    impl Minifier for NoEval {
        async fn minify(
            &self,
            text: &str,
            map: Option<SourceMap>,
            _ctx: &BuildContext,
        ) -> Result<(String, Option<SourceMap>), String> {
            if text.contains("eval") {
                return Err("eval is not allowed".to_string());
            }
            Ok((text.to_string(), map))
        }
    }

    fn toolchain() -> Toolchain {
        Toolchain::default().with_style_compiler(UpperCss)
    }

    fn source(path: &str, base: &str) -> SourceFile {
        SourceFile::new(PathBuf::from(path), PathBuf::from(base))
    }

    fn group(kind: AssetKind, patterns: &[&str], dest: &str) -> AssetGroup {
        AssetGroup {
            name: "test".to_string(),
            kind,
            source: AssetSource::Globs(patterns.iter().map(|p| p.to_string()).collect()),
            dest: PathBuf::from(dest),
            rename: None,
            maps_dir: PathBuf::from("maps"),
            strict: false,
        }
    }

    #[test]
    fn test_rename_rules() {
        let file = source("/p/node_modules/systemjs/dist/system.src.js", "/p/node_modules/systemjs/dist");

        let rule = RenameRule::Static("system".into());
        assert_eq!(
            rule.apply(&file, Path::new("system.src.js")).unwrap(),
            PathBuf::from("system.js")
        );

        let rule = RenameRule::Template("{name}.min".into());
        assert_eq!(
            rule.apply(&file, Path::new("system.src.js")).unwrap(),
            PathBuf::from("system.src.min.js")
        );

        let rule = RenameRule::computed(|f| f.stem().replace('.', "-"));
        assert_eq!(
            rule.apply(&file, Path::new("system.src.js")).unwrap(),
            PathBuf::from("system-src.js")
        );
    }

    #[test]
    fn test_rename_to_scoped_name() {
        let file = source("/p/node_modules/@angular/core/bundles/core.umd.js", "/p/node_modules/@angular/core/bundles");
        let rule = RenameRule::Static("@angular/core".into());

        assert_eq!(
            rule.apply(&file, Path::new("core.umd.js")).unwrap(),
            PathBuf::from("@angular/core.js")
        );
        assert!(RenameRule::Static("../escape".into())
            .apply(&file, Path::new("core.umd.js"))
            .is_err());
    }

    #[test]
    fn test_step_gating() {
        let write = PipelineStep::SourceMapWrite { dir: "maps".into() };
        for step in [PipelineStep::SourceMapInit, PipelineStep::Minify, write] {
            assert!(!step.is_enabled(BuildMode::Incremental));
            assert!(step.is_enabled(BuildMode::Full));
        }
        for step in [
            PipelineStep::Rename(RenameRule::Static("x".into())),
            PipelineStep::StyleCompile,
        ] {
            assert!(step.is_enabled(BuildMode::Incremental));
            assert!(step.is_enabled(BuildMode::Full));
        }
    }

    #[test]
    fn test_step_order_per_kind() {
        let names = |g: &AssetGroup| -> Vec<&'static str> {
            Pipeline::for_group(g).steps().iter().map(|s| s.name()).collect()
        };

        let mut lib = group(AssetKind::Lib, &["a.js"], "lib");
        lib.rename = Some(RenameRule::Static("b".into()));
        assert_eq!(
            names(&lib),
            vec!["source-map-init", "minify", "rename", "source-map-write"]
        );
        assert_eq!(
            names(&group(AssetKind::Module, &["a/**/*.js"], "lib/a")),
            vec!["source-map-init", "minify", "source-map-write"]
        );
        assert_eq!(
            names(&group(AssetKind::Style, &["s/**/*.scss"], "css")),
            vec!["source-map-init", "style-compile", "source-map-write"]
        );
    }

    #[tokio::test]
    async fn test_incremental_copy_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let content = "// comment\n\n  var a = 1;\n";
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/nested/a.js"), content).unwrap();

        let ctx = BuildContext::new(dir.path(), dir.path().join("out"), BuildMode::Incremental);
        let report = run_group(&group(AssetKind::Module, &["src/**/*.js"], "lib"), &ctx, &toolchain())
            .await
            .unwrap();

        assert_eq!(report.written.len(), 1);
        assert!(report.maps.is_empty());
        assert_eq!(
            fs::read_to_string(dir.path().join("out/lib/nested/a.js")).unwrap(),
            content
        );
    }

    #[tokio::test]
    async fn test_full_mode_minifies_and_writes_map() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/nested/a.js"), "// comment\n\n  var a = 1;\n").unwrap();

        let ctx = BuildContext::new(dir.path(), dir.path().join("out"), BuildMode::Full);
        let report = run_group(&group(AssetKind::Module, &["src/**/*.js"], "lib"), &ctx, &toolchain())
            .await
            .unwrap();

        assert_eq!(report.maps, vec![dir.path().join("out/lib/maps/nested/a.js.map")]);
        assert_eq!(
            fs::read_to_string(dir.path().join("out/lib/nested/a.js")).unwrap(),
            "var a = 1;\n//# sourceMappingURL=../maps/nested/a.js.map\n"
        );

        let map: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&report.maps[0]).unwrap()).unwrap();
        assert_eq!(map["file"], "a.js");
        assert_eq!(map["sources"][0], "nested/a.js");
        assert_eq!(map["mappings"], "AAEA");
    }

    #[tokio::test]
    async fn test_style_failure_skips_only_that_file() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Styles")).unwrap();
        fs::write(dir.path().join("Styles/good.scss"), "a { b: c; }").unwrap();
        fs::write(dir.path().join("Styles/bad.scss"), "error").unwrap();
        fs::write(dir.path().join("Styles/_partial.scss"), "$x: 1;").unwrap();

        let ctx = BuildContext::new(dir.path(), dir.path().join("out"), BuildMode::Incremental);
        let styles = group(AssetKind::Style, &["Styles/**/*.scss"], "css");
        let report = run_group(&styles, &ctx, &toolchain()).await.unwrap();

        assert_eq!(report.written, vec![dir.path().join("out/css/good.css")]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, "style-compile");
        assert!(!dir.path().join("out/css/_partial.css").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("out/css/good.css")).unwrap(),
            "/* expanded */\nA { B: C; }"
        );

        let mut strict = styles;
        strict.strict = true;
        fs::remove_dir_all(dir.path().join("out")).unwrap();
        let err = run_group(&strict, &ctx, &toolchain()).await.unwrap_err();
        assert!(matches!(err, BuildError::Transform(_)));
    }

    #[tokio::test]
    async fn test_style_map_uses_css_comment() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Styles")).unwrap();
        fs::write(dir.path().join("Styles/site.scss"), "a { b: c; }\n").unwrap();

        let ctx = BuildContext::new(dir.path(), dir.path().join("out"), BuildMode::Full);
        let styles = group(AssetKind::Style, &["Styles/**/*.scss"], "css");
        let report = run_group(&styles, &ctx, &toolchain()).await.unwrap();

        assert_eq!(report.maps, vec![dir.path().join("out/css/maps/site.css.map")]);
        let css = fs::read_to_string(dir.path().join("out/css/site.css")).unwrap();
        assert!(css.starts_with("/* compressed */"));
        assert!(css.ends_with("/*# sourceMappingURL=maps/site.css.map */\n"));

        // Second run: destination is current
        let report = run_group(&styles, &ctx, &toolchain()).await.unwrap();
        assert!(report.written.is_empty());
        assert_eq!(report.unchanged, 1);
    }

    #[tokio::test]
    async fn test_full_mode_keeps_template_literals() {
        let dir = TempDir::new().unwrap();
        let script = "var tpl = `\n  <div>\n    // label\n  </div>`;\n";
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/view.js"), script).unwrap();

        let ctx = BuildContext::new(dir.path(), dir.path().join("out"), BuildMode::Full);
        run_group(&group(AssetKind::Module, &["src/*.js"], "lib"), &ctx, &toolchain())
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("out/lib/view.js")).unwrap(),
            "var tpl = `\n  <div>\n    // label\n  </div>`;\n//# sourceMappingURL=maps/view.js.map\n"
        );
    }

    #[tokio::test]
    async fn test_minify_failure_skips_file() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/ok.js"), "var a = 1;\n").unwrap();
        fs::write(dir.path().join("src/bad.js"), "eval('1');\n").unwrap();

        let ctx = BuildContext::new(dir.path(), dir.path().join("out"), BuildMode::Full);
        let toolchain = toolchain().with_minifier(NoEval);
        let report = run_group(&group(AssetKind::Module, &["src/*.js"], "lib"), &ctx, &toolchain)
            .await
            .unwrap();

        assert_eq!(report.written, vec![dir.path().join("out/lib/ok.js")]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, "minify");
        assert!(report.failures[0].message.contains("eval"));
    }
}
