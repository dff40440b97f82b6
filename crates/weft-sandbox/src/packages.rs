use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use weft_core::error::{Result, WeftError};

/// Snippet used when a package has no configured code and no default.
pub const IDENTITY_SNIPPET: &str = "return input;";

/// Default snippet for a package node with no configured code.
pub fn default_snippet(package: &str) -> &'static str {
    match package {
        "lodash" => "return Array.isArray(input) ? _.sortBy(_.uniq(input)) : _.cloneDeep(input);",
        "uuid" => "return { id: uuid.v4(), input: input };",
        "moment" => {
            "var m = input === null || input === undefined ? moment() : moment(input); \
             return { iso: m.toISOString(), formatted: m.format('YYYY-MM-DD HH:mm:ss') };"
        }
        "validator" => {
            "var s = typeof input === 'string' ? input : JSON.stringify(input); \
             return { isEmail: validator.isEmail(s), isURL: validator.isURL(s), \
             isNumeric: validator.isNumeric(s), isEmpty: validator.isEmpty(s) };"
        }
        _ => IDENTITY_SNIPPET,
    }
}

/// Where a binding's source came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOrigin {
    Builtin,
    Disk(PathBuf),
}

/// A package implementation injectable into the isolated context.
#[derive(Debug, Clone)]
pub struct PackageBinding {
    pub name: String,
    /// Parameter names the snippet sees the package under, besides `pkg`.
    pub binding_names: Vec<String>,
    /// CommonJS source assigning `module.exports`.
    pub source: String,
    pub origin: PackageOrigin,
}

impl PackageBinding {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            binding_names: vec![binding_identifier(&name)],
            name,
            source: source.into(),
            origin: PackageOrigin::Builtin,
        }
    }

    /// Additional name the package is reachable under.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        if !self.binding_names.contains(&alias) {
            self.binding_names.insert(0, alias);
        }
        self
    }
}

/// Turn a package name into a JavaScript identifier (`date-fns` → `date_fns`).
pub fn binding_identifier(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    let mut ident: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

/// Package names safe to map onto a file name.
fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Registry of package implementations reachable from the sandbox.
///
/// Resolution tries `<package_dir>/<name>.js` first and falls back to the
/// registered builtin implementations.
#[derive(Debug, Clone, Default)]
pub struct PackageRegistry {
    builtins: HashMap<String, PackageBinding>,
    package_dir: Option<PathBuf>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the bundled mock implementations.
    pub fn with_builtin_mocks() -> Self {
        let mut registry = Self::new();
        registry.register(
            PackageBinding::new("lodash", include_str!("mocks/lodash.js")).with_alias("_"),
        );
        registry.register(PackageBinding::new("uuid", include_str!("mocks/uuid.js")));
        registry.register(PackageBinding::new("moment", include_str!("mocks/moment.js")));
        registry.register(PackageBinding::new(
            "validator",
            include_str!("mocks/validator.js"),
        ));
        registry
    }

    pub fn with_package_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.package_dir = Some(dir.into());
        self
    }

    pub fn register(&mut self, binding: PackageBinding) {
        self.builtins.insert(binding.name.clone(), binding);
    }

    pub fn package_dir(&self) -> Option<&Path> {
        self.package_dir.as_deref()
    }

    /// Names with a builtin implementation, sorted.
    pub fn builtin_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builtins.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Find an implementation for `name`.
    pub async fn resolve(&self, name: &str) -> Result<PackageBinding> {
        if let Some(binding) = self.load_from_dir(name).await {
            return Ok(binding);
        }
        self.builtins
            .get(name)
            .cloned()
            .ok_or_else(|| WeftError::PackageUnavailable(name.to_string()))
    }

    async fn load_from_dir(&self, name: &str) -> Option<PackageBinding> {
        let dir = self.package_dir.as_ref()?;
        if !is_safe_file_name(name) {
            return None;
        }
        let path = dir.join(format!("{}.js", name));
        match tokio::fs::read_to_string(&path).await {
            Ok(source) => {
                debug!(package = %name, path = %path.display(), "Loaded package from disk");
                let mut binding = match self.builtins.get(name) {
                    // Keep the builtin's aliases (e.g. `_` for lodash)
                    Some(builtin) => PackageBinding {
                        source,
                        ..builtin.clone()
                    },
                    None => PackageBinding::new(name, source),
                };
                binding.origin = PackageOrigin::Disk(path);
                Some(binding)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(package = %name, path = %path.display(), error = %e, "Failed to load package, using builtin");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_identifier() {
        assert_eq!(binding_identifier("lodash"), "lodash");
        assert_eq!(binding_identifier("date-fns"), "date_fns");
        assert_eq!(binding_identifier("@scope/left-pad"), "left_pad");
        assert_eq!(binding_identifier("3d"), "_3d");
    }

    #[test]
    fn test_lodash_aliases() {
        let registry = PackageRegistry::with_builtin_mocks();
        let lodash = registry.builtins.get("lodash").unwrap();
        assert_eq!(lodash.binding_names, vec!["_", "lodash"]);
        assert_eq!(
            registry.builtin_names(),
            vec!["lodash", "moment", "uuid", "validator"]
        );
    }

    #[test]
    fn test_default_snippets() {
        assert_eq!(default_snippet("left-pad"), IDENTITY_SNIPPET);
        assert!(default_snippet("uuid").contains("uuid.v4()"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_package() {
        let registry = PackageRegistry::with_builtin_mocks();
        let err = registry.resolve("left-pad").await.unwrap_err();
        assert!(matches!(err, WeftError::PackageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_disk_package_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lodash.js"),
            "module.exports = { custom: true };",
        )
        .unwrap();
        std::fs::write(dir.path().join("left-pad.js"), "module.exports = function () {};").unwrap();

        let registry = PackageRegistry::with_builtin_mocks().with_package_dir(dir.path());
        let lodash = registry.resolve("lodash").await.unwrap();
        assert!(matches!(lodash.origin, PackageOrigin::Disk(_)));
        assert!(lodash.binding_names.contains(&"_".to_string()));

        let pad = registry.resolve("left-pad").await.unwrap();
        assert_eq!(pad.binding_names, vec!["left_pad"]);

        // Missing from disk falls back to the builtin
        let uuid = registry.resolve("uuid").await.unwrap();
        assert_eq!(uuid.origin, PackageOrigin::Builtin);
    }

    #[tokio::test]
    async fn test_path_traversal_is_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PackageRegistry::new().with_package_dir(dir.path().join("pkgs"));
        assert!(registry.resolve("../secret").await.is_err());
    }
}
