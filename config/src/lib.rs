//! Typed project configuration for the ENSIME client.
//!
//! The client consumes a key-value mapping describing one Scala project:
//! where the project lives, where the server may write its cache (port
//! marker, pid file, logs), which JVM to run it on, and which jars make up
//! its classpath. How that mapping is produced (the `.ensime` file syntax,
//! build-tool export, a test fixture) is the caller's concern; this crate
//! only defines the validated shape.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read project config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse project config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("project config is missing required key '{0}'")]
    MissingKey(&'static str),
}

/// An immutable project configuration.
///
/// Field names mirror the keys of the original `.ensime` mapping
/// (`root-dir`, `cache-dir`, ...) so a serialized config is recognizable
/// next to the file it was derived from.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectConfig {
    /// Project root; the server is pointed at `<root-dir>/.ensime`.
    pub root_dir: PathBuf,
    /// Directory the server uses for its port marker, pid file and logs.
    pub cache_dir: PathBuf,
    /// JVM installation root; the runtime is `<java-home>/bin/java`.
    pub java_home: PathBuf,
    /// Extra JVM flags, passed through verbatim.
    #[serde(default)]
    pub java_flags: Vec<String>,
    /// Full Scala version, e.g. "2.11.8".
    pub scala_version: String,
    /// Server jars published by the build tool, if any.
    #[serde(default)]
    pub ensime_server_jars: Vec<PathBuf>,
    /// Compiler jars for the project's Scala version.
    #[serde(default)]
    pub scala_compiler_jars: Vec<PathBuf>,
    /// Any further keys are carried opaquely for collaborators that want them.
    #[serde(flatten, default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProjectConfig {
    /// Load a JSON rendering of the project mapping from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the keys the session engine cannot function without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingKey("root-dir"));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingKey("cache-dir"));
        }
        if self.java_home.as_os_str().is_empty() {
            return Err(ConfigError::MissingKey("java-home"));
        }
        if self.scala_version.is_empty() {
            return Err(ConfigError::MissingKey("scala-version"));
        }
        Ok(())
    }

    /// The two-component Scala version ("2.11.8" → "2.11"), used to match
    /// assembly jar names.
    #[must_use]
    pub fn scala_minor_version(&self) -> &str {
        match self.scala_version.match_indices('.').nth(1) {
            Some((idx, _)) => &self.scala_version[..idx],
            None => &self.scala_version,
        }
    }

    /// Path of the java executable for this project's JVM.
    #[must_use]
    pub fn java_executable(&self) -> PathBuf {
        let name = if cfg!(windows) { "java.exe" } else { "java" };
        self.java_home.join("bin").join(name)
    }

    /// Path the analysis server is told to read its own config from.
    #[must_use]
    pub fn dot_ensime_file(&self) -> PathBuf {
        self.root_dir.join(".ensime")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> serde_json::Value {
        serde_json::json!({
            "root-dir": "/proj",
            "cache-dir": "/proj/.ensime_cache",
            "java-home": "/usr/lib/jvm/java-8",
            "java-flags": ["-Xmx2g"],
            "scala-version": "2.11.8",
            "ensime-server-jars": ["/repo/server.jar"],
            "scala-compiler-jars": ["/repo/scala-compiler.jar"],
            "name": "demo"
        })
    }

    #[test]
    fn test_parses_kebab_case_keys() {
        let config: ProjectConfig = serde_json::from_value(sample()).unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/proj"));
        assert_eq!(config.scala_version, "2.11.8");
        assert_eq!(config.java_flags, vec!["-Xmx2g"]);
        assert_eq!(config.ensime_server_jars.len(), 1);
        assert_eq!(config.extra["name"], "demo");
    }

    #[test]
    fn test_scala_minor_version() {
        let config: ProjectConfig = serde_json::from_value(sample()).unwrap();
        assert_eq!(config.scala_minor_version(), "2.11");
    }

    #[test]
    fn test_scala_minor_version_without_patch() {
        let mut value = sample();
        value["scala-version"] = "2.12".into();
        let config: ProjectConfig = serde_json::from_value(value).unwrap();
        assert_eq!(config.scala_minor_version(), "2.12");
    }

    #[test]
    fn test_java_executable_under_java_home() {
        let config: ProjectConfig = serde_json::from_value(sample()).unwrap();
        assert!(config.java_executable().starts_with("/usr/lib/jvm/java-8"));
        assert!(
            config
                .java_executable()
                .to_string_lossy()
                .contains("bin")
        );
    }

    #[test]
    fn test_validate_rejects_empty_scala_version() {
        let mut value = sample();
        value["scala-version"] = "".into();
        let config: ProjectConfig = serde_json::from_value(value).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingKey("scala-version"))
        ));
    }

    #[test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        std::fs::write(&path, sample().to_string()).unwrap();
        let config = ProjectConfig::load(&path).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/proj/.ensime_cache"));
    }

    #[test]
    fn test_load_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        std::fs::write(&path, "(this is not json)").unwrap();
        assert!(matches!(
            ProjectConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ProjectConfig::load(&dir.path().join("absent.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
