//! Asset declarations
//!
//! Turns `kiln.toml` into validated asset groups, the bundle spec and the
//! cleaner's targets. Everything here is checked before any task runs.

use crate::error::{BuildError, BuildResult};
use crate::fileset::{self, FileSet, SourceFile};
use crate::pipeline::RenameRule;
use kiln_config::project::DEFAULT_MAPS_DIR;
use kiln_config::{BundleConfig, Config, PackagesConfig};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

const DEFAULT_NODE_MODULES: &str = "node_modules";
const DEFAULT_PACKAGE_MAIN: &str = "index.js";
const DEFAULT_EXTENSION: &str = "js";

/// Kind of asset group; fixes the pipeline step order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// Single file with an optional rename
    Lib,
    /// Installed package entry file, renamed to the package name
    Package,
    /// Multi-file tree
    Module,
    /// Style sources compiled to CSS
    Style,
}

/// Where a group's files come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// Include/exclude globs relative to the project root
    Globs(Vec<String>),
    /// An installed package's resolved entry file
    Package { name: String, entry: PathBuf },
}

/// Declarative source-to-destination mapping
#[derive(Debug, Clone)]
pub struct AssetGroup {
    pub name: String,
    pub kind: AssetKind,
    pub source: AssetSource,
    /// Destination directory, relative to the output root
    pub dest: PathBuf,
    pub rename: Option<RenameRule>,
    /// Source map directory, relative to `dest`
    pub maps_dir: PathBuf,
    /// Fail the owning task on any per-file error
    pub strict: bool,
}

impl AssetGroup {
    /// Resolve the group's current source files
    pub fn resolve(&self, project_root: &Path) -> BuildResult<FileSet> {
        match &self.source {
            AssetSource::Globs(patterns) => fileset::resolve(project_root, patterns),
            AssetSource::Package { entry, .. } => {
                let base = entry.parent().unwrap_or(project_root);
                Ok(std::iter::once(SourceFile::new(entry, base)).collect())
            }
        }
    }
}

/// Bundler settings with paths resolved against the project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSpec {
    /// Bundler root (absolute)
    pub root: PathBuf,
    /// Entry module
    pub entry: String,
    /// Application pattern excluded from incremental bundles
    pub app: Option<String>,
    /// Artifact path, relative to the output root
    pub output: PathBuf,
    /// Base URL for module resolution
    pub base_url: PathBuf,
    pub default_extension: String,
    pub paths: BTreeMap<String, String>,
}

/// Everything the standard tasks operate on
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    groups: Vec<AssetGroup>,
    bundle: Option<BundleSpec>,
    extra_clean: Vec<PathBuf>,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an asset group
    pub fn with_group(mut self, group: AssetGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Set the bundle spec
    pub fn with_bundle(mut self, bundle: BundleSpec) -> Self {
        self.bundle = Some(bundle);
        self
    }

    /// Build declarations from a loaded configuration
    pub fn from_config(config: &Config) -> BuildResult<Self> {
        let project = &config.project;
        let root = config.project_root();
        let mut declarations = Self::new();

        if let Some(lib) = &project.lib {
            let maps_dir = maps_or_default(&lib.maps);
            for entry in &lib.files {
                let name = entry
                    .file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| entry.file.display().to_string());
                declarations.groups.push(AssetGroup {
                    name: format!("lib:{}", name),
                    kind: AssetKind::Lib,
                    source: AssetSource::Globs(vec![entry.file.to_string_lossy().into_owned()]),
                    dest: lib.dest.clone(),
                    rename: entry.rename.as_ref().map(RenameRule::from),
                    maps_dir: maps_dir.clone(),
                    strict: lib.strict,
                });
            }
        }

        if let Some(packages) = &project.packages {
            for name in &packages.names {
                declarations
                    .groups
                    .push(package_group(root, packages, name)?);
            }
        }

        for (index, module) in project.modules.iter().enumerate() {
            let maps_dir = match (&module.maps, &module.name) {
                (Some(maps), _) => maps.clone(),
                (None, Some(name)) => Path::new("..").join(DEFAULT_MAPS_DIR).join(name),
                (None, None) => PathBuf::from(DEFAULT_MAPS_DIR),
            };
            let name = module
                .name
                .clone()
                .unwrap_or_else(|| format!("#{}", index + 1));
            declarations.groups.push(AssetGroup {
                name: format!("modules:{}", name),
                kind: AssetKind::Module,
                source: AssetSource::Globs(module.src.clone()),
                dest: module.dest.clone(),
                rename: None,
                maps_dir,
                strict: module.strict,
            });
        }

        if let Some(styles) = &project.styles {
            declarations.groups.push(AssetGroup {
                name: "sass".to_string(),
                kind: AssetKind::Style,
                source: AssetSource::Globs(styles.src.clone()),
                dest: styles.dest.clone(),
                rename: None,
                maps_dir: maps_or_default(&styles.maps),
                strict: styles.strict,
            });
        }

        if let Some(bundle) = &project.bundle {
            declarations.bundle = Some(bundle_spec(root, project.output_root(), bundle));
        }

        declarations.extra_clean = project.output.clean.clone();
        declarations.validate()?;
        Ok(declarations)
    }

    /// Check that every output location stays under the output root
    pub fn validate(&self) -> BuildResult<()> {
        for group in &self.groups {
            if !is_strictly_inside(&group.dest) {
                return Err(BuildError::DestinationOutsideRoot {
                    group: group.name.clone(),
                    path: group.dest.clone(),
                });
            }
            let maps = group.dest.join(&group.maps_dir);
            if !is_contained(&maps) {
                return Err(BuildError::DestinationOutsideRoot {
                    group: format!("{} (maps)", group.name),
                    path: maps,
                });
            }
        }

        if let Some(bundle) = &self.bundle {
            if !is_strictly_inside(&bundle.output) {
                return Err(BuildError::DestinationOutsideRoot {
                    group: "bundle".to_string(),
                    path: bundle.output.clone(),
                });
            }
        }

        for path in &self.extra_clean {
            if !is_strictly_inside(path) {
                return Err(BuildError::DestinationOutsideRoot {
                    group: "output.clean".to_string(),
                    path: path.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn groups(&self) -> &[AssetGroup] {
        &self.groups
    }

    /// Groups of one kind, in declaration order
    pub fn groups_of(&self, kind: AssetKind) -> Vec<&AssetGroup> {
        self.groups.iter().filter(|g| g.kind == kind).collect()
    }

    pub fn bundle(&self) -> Option<&BundleSpec> {
        self.bundle.as_ref()
    }

    /// Locations removed by `clean`, relative to the output root
    pub fn clean_targets(&self) -> Vec<PathBuf> {
        let mut targets: Vec<PathBuf> = Vec::new();
        let declared = self
            .groups
            .iter()
            .map(|g| g.dest.clone())
            .chain(self.bundle.iter().map(|b| b.output.clone()))
            .chain(self.extra_clean.iter().cloned());
        for path in declared {
            if !targets.contains(&path) {
                targets.push(path);
            }
        }
        targets
    }

    /// Literal directories the style patterns read from
    pub fn style_watch_roots(&self, project_root: &Path) -> BuildResult<Vec<PathBuf>> {
        let mut roots = Vec::new();
        for group in self.groups_of(AssetKind::Style) {
            let AssetSource::Globs(patterns) = &group.source else {
                continue;
            };
            for raw in patterns {
                let pattern = fileset::SourcePattern::parse(raw)?;
                if pattern.is_negated() {
                    continue;
                }
                let dir = project_root.join(pattern.base());
                if !roots.contains(&dir) {
                    roots.push(dir);
                }
            }
        }
        Ok(roots)
    }
}

fn maps_or_default(maps: &Option<PathBuf>) -> PathBuf {
    maps.clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MAPS_DIR))
}

/// Resolve an installed package's entry file via its `package.json` `main`
fn package_group(
    project_root: &Path,
    packages: &PackagesConfig,
    name: &str,
) -> BuildResult<AssetGroup> {
    let node_modules = project_root.join(
        packages
            .node_modules
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_NODE_MODULES)),
    );
    let package_dir = node_modules.join(name);
    let manifest_path = package_dir.join("package.json");

    let manifest = std::fs::read_to_string(&manifest_path).map_err(|_| BuildError::PackageNotFound {
        name: name.to_string(),
        path: package_dir.clone(),
    })?;
    let manifest: serde_json::Value = serde_json::from_str(&manifest).map_err(|e| {
        BuildError::InvalidDeclaration(format!(
            "{} is not valid JSON: {}",
            manifest_path.display(),
            e
        ))
    })?;

    let main = manifest
        .get("main")
        .and_then(|m| m.as_str())
        .unwrap_or(DEFAULT_PACKAGE_MAIN);
    let mut entry = package_dir.join(main.trim_start_matches("./"));
    if entry.extension().is_none() && !entry.is_file() {
        entry.set_extension(DEFAULT_EXTENSION);
    }

    Ok(AssetGroup {
        name: format!("npm:{}", name),
        kind: AssetKind::Package,
        source: AssetSource::Package {
            name: name.to_string(),
            entry,
        },
        dest: packages.dest.clone(),
        rename: Some(RenameRule::Static(name.to_string())),
        maps_dir: maps_or_default(&packages.maps),
        strict: packages.strict,
    })
}

fn bundle_spec(project_root: &Path, output_root: &Path, bundle: &BundleConfig) -> BundleSpec {
    BundleSpec {
        root: project_root.join(bundle.root.as_deref().unwrap_or(Path::new("."))),
        entry: bundle.entry.clone(),
        app: bundle.app.clone(),
        output: bundle.dest.clone(),
        base_url: bundle
            .base_url
            .clone()
            .unwrap_or_else(|| output_root.to_path_buf()),
        default_extension: bundle
            .default_extension
            .clone()
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string()),
        paths: bundle.paths.clone(),
    }
}

/// Depth below the root after lexical normalisation, or `None` if it escapes
fn lexical_depth(path: &Path) -> Option<usize> {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth = depth.checked_sub(1)?,
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(depth)
}

fn is_contained(path: &Path) -> bool {
    lexical_depth(path).is_some()
}

/// Contained and not the output root itself
fn is_strictly_inside(path: &Path) -> bool {
    matches!(lexical_depth(path), Some(depth) if depth > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_config::ProjectConfig;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    fn project_config(dir: &TempDir, toml: &str) -> Config {
        let project: ProjectConfig = toml::from_str(toml).unwrap();
        Config::new(project, dir.path())
    }

    fn install_package(dir: &TempDir, name: &str, manifest: &str, main: &str) {
        let package = dir.path().join("node_modules").join(name);
        fs::create_dir_all(package.join(main).parent().unwrap()).unwrap();
        fs::write(package.join("package.json"), manifest).unwrap();
        fs::write(package.join(main), "module.exports = {};\n").unwrap();
    }

    #[test]
    fn test_lexical_containment() {
        assert!(is_contained(Path::new("lib")));
        assert!(is_contained(Path::new("lib/../maps")));
        assert!(is_contained(Path::new("./css/maps")));
        assert!(!is_contained(Path::new("../outside")));
        assert!(!is_contained(Path::new("lib/../../x")));
        assert!(!is_contained(Path::new("/etc")));

        assert!(is_strictly_inside(Path::new("lib/../maps")));
        assert!(!is_strictly_inside(Path::new(".")));
        assert!(!is_strictly_inside(Path::new("")));
        assert!(!is_strictly_inside(Path::new("lib/..")));
    }

    #[test]
    fn test_declarations_from_config() {
        let dir = TempDir::new().unwrap();
        install_package(
            &dir,
            "@angular/core",
            r#"{ "name": "@angular/core", "main": "./bundles/core.umd.js" }"#,
            "bundles/core.umd.js",
        );

        let config = project_config(
            &dir,
            r#"
[output]
clean = ["extra"]

[lib]
dest = "lib"
[[lib.files]]
file = "node_modules/systemjs/dist/system.src.js"
rename = "system"

[packages]
dest = "lib"
maps = "../maps"
names = ["@angular/core"]

[[modules]]
name = "rxjs"
src = ["node_modules/rxjs/**/*.js"]
dest = "lib/rxjs"

[styles]
src = ["Styles/**/*.scss"]
dest = "css"

[bundle]
entry = "app/main.js"
app = "app/**/*"
dest = "lib/bundle.js"
"#,
        );

        let declarations = Declarations::from_config(&config).unwrap();
        let names: Vec<&str> = declarations.groups().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["lib:system.src.js", "npm:@angular/core", "modules:rxjs", "sass"]
        );

        let package = &declarations.groups_of(AssetKind::Package)[0];
        assert_eq!(
            package.source,
            AssetSource::Package {
                name: "@angular/core".into(),
                entry: dir.path().join("node_modules/@angular/core/bundles/core.umd.js"),
            }
        );
        assert_eq!(package.maps_dir, PathBuf::from("../maps"));

        let module = &declarations.groups_of(AssetKind::Module)[0];
        assert_eq!(module.maps_dir, PathBuf::from("../maps/rxjs"));

        let bundle = declarations.bundle().unwrap();
        assert_eq!(bundle.base_url, PathBuf::from("wwwroot"));
        assert_eq!(bundle.default_extension, "js");

        assert_eq!(
            declarations.clean_targets(),
            vec![
                PathBuf::from("lib"),
                PathBuf::from("lib/rxjs"),
                PathBuf::from("css"),
                PathBuf::from("lib/bundle.js"),
                PathBuf::from("extra"),
            ]
        );
    }

    #[test]
    fn test_package_main_defaults_to_index() {
        let dir = TempDir::new().unwrap();
        install_package(&dir, "tiny", r#"{ "name": "tiny" }"#, "index.js");

        let config = project_config(&dir, "[packages]\ndest = \"lib\"\nnames = [\"tiny\"]\n");
        let declarations = Declarations::from_config(&config).unwrap();
        let files = declarations.groups()[0].resolve(dir.path()).unwrap();

        assert_eq!(files.paths(), vec![dir.path().join("node_modules/tiny/index.js")]);
    }

    #[test]
    fn test_missing_package() {
        let dir = TempDir::new().unwrap();
        let config = project_config(&dir, "[packages]\ndest = \"lib\"\nnames = [\"left-pad\"]\n");

        let err = Declarations::from_config(&config).unwrap_err();
        assert!(matches!(err, BuildError::PackageNotFound { ref name, .. } if name == "left-pad"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_destination_outside_root() {
        let dir = TempDir::new().unwrap();
        let config = project_config(
            &dir,
            "[styles]\nsrc = [\"Styles/**/*.scss\"]\ndest = \"../css\"\n",
        );
        assert!(matches!(
            Declarations::from_config(&config),
            Err(BuildError::DestinationOutsideRoot { .. })
        ));

        let config = config_with_maps(&dir, "../../maps");
        assert!(matches!(
            Declarations::from_config(&config),
            Err(BuildError::DestinationOutsideRoot { .. })
        ));
    }

    #[rstest]
    #[case(".")]
    #[case("")]
    #[case("lib/..")]
    #[case("./css/../")]
    fn test_group_destination_is_output_root(#[case] dest: &str) {
        let dir = TempDir::new().unwrap();
        let config = project_config(
            &dir,
            &format!("[styles]\nsrc = [\"Styles/**/*.scss\"]\ndest = \"{dest}\"\n"),
        );
        match Declarations::from_config(&config) {
            Err(BuildError::DestinationOutsideRoot { group, path }) => {
                assert_eq!(group, "sass");
                assert_eq!(path, PathBuf::from(dest));
            }
            other => panic!("expected the output root to be rejected, got {other:?}"),
        }
    }

    #[test]
    fn test_clean_path_is_output_root() {
        let dir = TempDir::new().unwrap();
        let config = project_config(&dir, "[output]\nclean = [\"lib/..\"]\n");
        assert!(matches!(
            Declarations::from_config(&config),
            Err(BuildError::DestinationOutsideRoot { ref group, .. }) if group == "output.clean"
        ));
    }

    fn config_with_maps(dir: &TempDir, maps: &str) -> Config {
        project_config(
            dir,
            &format!(
                "[styles]\nsrc = [\"Styles/**/*.scss\"]\ndest = \"css\"\nmaps = \"{}\"\n",
                maps
            ),
        )
    }

    #[test]
    fn test_style_watch_roots() {
        let dir = TempDir::new().unwrap();
        let config = project_config(
            &dir,
            "[styles]\nsrc = [\"Styles/**/*.scss\", \"!Styles/vendor/**\", \"Themes/*.scss\"]\ndest = \"css\"\n",
        );
        let declarations = Declarations::from_config(&config).unwrap();

        assert_eq!(
            declarations.style_watch_roots(dir.path()).unwrap(),
            vec![dir.path().join("Styles"), dir.path().join("Themes")]
        );
    }
}
