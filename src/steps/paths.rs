use crate::config::Conf;
use crate::configurator::{BuildContext, ConfigurationStep};
use crate::error::ConfigError;
use serde_json::{json, Value};
use std::any::Any;
use std::path::PathBuf;

/// Derives `paths.*` from the package directory.
///
/// The package directory is `package_dir` when given, else `<cwd>/<package>`.
/// Explicit `paths.*` values are never overwritten.
#[derive(Debug, Default)]
pub struct PathsStep;

impl PathsStep {
    fn package_root(conf: &Conf, package: &str) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = conf.get_str("package_dir").filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        let cwd = std::env::current_dir().map_err(|e| ConfigError::step("paths", e.to_string()))?;
        Ok(cwd.join(package))
    }
}

fn path_value(path: PathBuf) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

impl ConfigurationStep for PathsStep {
    fn id(&self) -> &str {
        "paths"
    }

    fn before_config(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        let Some(package) = conf.get_str("package").filter(|p| !p.is_empty()).map(str::to_string) else {
            tracing::debug!("no package configured, keeping default paths");
            return Ok(());
        };
        let root = Self::package_root(conf, &package)?;
        conf.set_default("paths.root", path_value(root.clone()));

        let root = conf.get_str("paths.root").map(PathBuf::from).unwrap_or(root);
        conf.set_default("paths.controllers", path_value(root.join("controllers")));
        conf.set_default("paths.static_files", path_value(root.join("public")));
        conf.set_default("paths.templates", json!([root.join("templates").to_string_lossy()]));
        tracing::debug!(root = %root.display(), "application paths");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::ctx;
    use super::*;

    #[test]
    fn derives_paths_from_the_package_dir() {
        let mut conf = Conf::new();
        conf.set("package", "shop");
        conf.set("package_dir", "/srv/shop");
        conf.set("paths.static_files", "/var/www");
        PathsStep.before_config(&mut conf, &ctx()).unwrap();
        assert_eq!(conf.get_str("paths.root"), Some("/srv/shop"));
        assert_eq!(conf.get_str("paths.controllers"), Some("/srv/shop/controllers"));
        assert_eq!(conf.get_str("paths.static_files"), Some("/var/www"));
        assert_eq!(conf.list("paths.templates").unwrap(), vec!["/srv/shop/templates"]);
    }

    #[test]
    fn no_package_leaves_paths_alone() {
        let mut conf = Conf::new();
        PathsStep.before_config(&mut conf, &ctx()).unwrap();
        assert!(!conf.contains_key("paths.root"));
    }
}
