//! Strategies for materializing a runnable server classpath.
//!
//! Two deployments exist in the wild: an ad-hoc local assembly jar dropped
//! into the project root (development builds, behind-the-firewall installs),
//! and jar paths published into the project config by the build tool. Each
//! strategy knows whether it is usable and how to build the launch command;
//! the first installed strategy in priority order wins.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::Local;
use ensime_config::ProjectConfig;

use crate::errors::LaunchError;
use crate::process::{LOG_FILE, PID_FILE, ServerProcess};

/// Class whose `main` starts the analysis server.
const SERVER_ENTRY_POINT: &str = "org.ensime.server.Server";

/// A way to check for and launch one server deployment.
pub trait LaunchStrategy: Send + Sync {
    /// Whether the artifacts this strategy needs are present.
    fn is_installed(&self) -> bool;

    /// Spawn a server process for the configured project.
    fn launch(&self) -> Result<ServerProcess, LaunchError>;
}

/// Launches a local `ensime_<scala-minor>*-assembly.jar` found in the
/// project root, with the JDK's `tools.jar` and the project's compiler jars
/// on the classpath.
pub struct AssemblyJar {
    config: ProjectConfig,
    base_dir: PathBuf,
}

impl AssemblyJar {
    #[must_use]
    pub fn new(config: ProjectConfig) -> Self {
        let base_dir = config.root_dir.clone();
        Self { config, base_dir }
    }

    fn find_jar(&self) -> Option<PathBuf> {
        let prefix = format!("ensime_{}", self.config.scala_minor_version());
        let entries = std::fs::read_dir(&self.base_dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with("-assembly.jar") {
                return Some(entry.path());
            }
        }
        None
    }
}

impl LaunchStrategy for AssemblyJar {
    fn is_installed(&self) -> bool {
        self.find_jar().is_some()
    }

    fn launch(&self) -> Result<ServerProcess, LaunchError> {
        let jar = self.find_jar().ok_or_else(|| {
            LaunchError::MissingArtifacts(format!(
                "no ensime_{}*-assembly.jar in {}",
                self.config.scala_minor_version(),
                self.base_dir.display()
            ))
        })?;

        let mut classpath = vec![jar, self.config.java_home.join("lib").join("tools.jar")];
        classpath.extend(self.config.scala_compiler_jars.iter().cloned());
        start_process(&classpath, &self.config)
    }
}

/// Launches a pre-installed server via jar paths declared by the project
/// config (`ensime-server-jars` plus `scala-compiler-jars`).
pub struct ConfiguredJars {
    config: ProjectConfig,
    classpath: Vec<PathBuf>,
}

impl ConfiguredJars {
    #[must_use]
    pub fn new(config: ProjectConfig) -> Self {
        // Server jars first so they take precedence over the compiler's.
        let classpath = config
            .ensime_server_jars
            .iter()
            .chain(config.scala_compiler_jars.iter())
            .cloned()
            .collect();
        Self { config, classpath }
    }

    fn missing_jars(&self) -> Vec<&Path> {
        self.classpath
            .iter()
            .filter(|jar| !jar.exists())
            .map(PathBuf::as_path)
            .collect()
    }
}

impl LaunchStrategy for ConfiguredJars {
    fn is_installed(&self) -> bool {
        !self.classpath.is_empty() && self.missing_jars().is_empty()
    }

    fn launch(&self) -> Result<ServerProcess, LaunchError> {
        let missing = self.missing_jars();
        if self.classpath.is_empty() || !missing.is_empty() {
            return Err(LaunchError::MissingArtifacts(format!(
                "jars declared by the project config do not exist: {missing:?}"
            )));
        }
        start_process(&self.classpath, &self.config)
    }
}

/// Evaluates the strategies in priority order and launches with the first
/// installed one.
pub struct ServerLauncher {
    strategies: Vec<Box<dyn LaunchStrategy>>,
}

impl ServerLauncher {
    #[must_use]
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            strategies: vec![
                Box::new(AssemblyJar::new(config.clone())),
                Box::new(ConfiguredJars::new(config.clone())),
            ],
        }
    }

    /// Custom strategy order, mostly for tests.
    #[must_use]
    pub fn with_strategies(strategies: Vec<Box<dyn LaunchStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn launch(&self) -> Result<ServerProcess, LaunchError> {
        for strategy in &self.strategies {
            if strategy.is_installed() {
                return strategy.launch();
            }
        }
        Err(LaunchError::NoInstalledStrategy)
    }
}

/// Shared spawn path, agnostic to how the strategy assembled the classpath.
///
/// Verifies the java executable up front so the caller gets a specific
/// diagnosis instead of a generic exec failure, redirects stdout/stderr to a
/// fresh log file, and persists the child pid next to it.
fn start_process(
    classpath: &[PathBuf],
    config: &ProjectConfig,
) -> Result<ServerProcess, LaunchError> {
    let cache_dir = config.cache_dir.clone();
    std::fs::create_dir_all(&cache_dir).map_err(|source| LaunchError::CacheDir {
        path: cache_dir.clone(),
        source,
    })?;

    let java = config.java_executable();
    check_java(&java)?;

    let log_path = cache_dir.join(LOG_FILE);
    let log = fresh_log(&log_path).map_err(|source| LaunchError::CacheDir {
        path: log_path,
        source,
    })?;
    let stderr_log = log.try_clone().map_err(LaunchError::Spawn)?;

    let separator = if cfg!(windows) { ";" } else { ":" };
    let classpath_arg = classpath
        .iter()
        .map(|jar| jar.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(separator);

    let mut command = tokio::process::Command::new(&java);
    command
        .arg("-cp")
        .arg(classpath_arg)
        .args(config.java_flags.iter().filter(|flag| !flag.is_empty()))
        .arg(format!(
            "-Densime.config={}",
            config.dot_ensime_file().display()
        ))
        .arg(SERVER_ENTRY_POINT)
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(stderr_log)
        .kill_on_drop(true);

    tracing::info!(java = %java.display(), "launching analysis server");
    let child = command.spawn().map_err(LaunchError::Spawn)?;

    if let Some(pid) = child.id() {
        let pid_path = cache_dir.join(PID_FILE);
        if let Err(e) = std::fs::write(&pid_path, pid.to_string()) {
            tracing::warn!(path = %pid_path.display(), "cannot persist server pid: {e}");
        }
    }

    Ok(ServerProcess::new(cache_dir, child))
}

fn check_java(java: &Path) -> Result<(), LaunchError> {
    let metadata =
        std::fs::metadata(java).map_err(|_| LaunchError::JavaNotFound(java.to_path_buf()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(LaunchError::JavaNotExecutable(java.to_path_buf()));
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;
    Ok(())
}

/// Create (truncate) the server log and write a timestamped header line.
fn fresh_log(path: &Path) -> std::io::Result<std::fs::File> {
    use std::io::Write;
    let mut log = std::fs::File::create(path)?;
    let now = Local::now().format("%Y-%m-%d %H:%M:%S%.6f");
    writeln!(log, "{now}: initializing analysis-server process")?;
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(root: &Path, cache: &Path, java_home: &Path) -> ProjectConfig {
        serde_json::from_value(serde_json::json!({
            "root-dir": root,
            "cache-dir": cache,
            "java-home": java_home,
            "scala-version": "2.11.8",
        }))
        .unwrap()
    }

    #[test]
    fn test_assembly_jar_matches_scala_minor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ensime_2.11-0.9.10-assembly.jar"), "").unwrap();
        let config = config_for(dir.path(), dir.path(), Path::new("/nonexistent"));

        let strategy = AssemblyJar::new(config);
        assert!(strategy.is_installed());
        assert!(
            strategy
                .find_jar()
                .unwrap()
                .to_string_lossy()
                .contains("assembly")
        );
    }

    #[test]
    fn test_assembly_jar_rejects_other_scala_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ensime_2.12-1.0.0-assembly.jar"), "").unwrap();
        let config = config_for(dir.path(), dir.path(), Path::new("/nonexistent"));
        assert!(!AssemblyJar::new(config).is_installed());
    }

    #[test]
    fn test_configured_jars_requires_every_jar() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("server.jar");
        std::fs::write(&present, "").unwrap();
        let mut config = config_for(dir.path(), dir.path(), Path::new("/nonexistent"));
        config.ensime_server_jars = vec![present, dir.path().join("absent.jar")];

        let strategy = ConfiguredJars::new(config);
        assert!(!strategy.is_installed());
        match strategy.launch() {
            Err(LaunchError::MissingArtifacts(msg)) => assert!(msg.contains("absent.jar")),
            other => panic!("expected MissingArtifacts, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_configured_jars_with_no_jars_is_uninstalled() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path(), dir.path(), Path::new("/nonexistent"));
        assert!(!ConfiguredJars::new(config).is_installed());
    }

    #[test]
    fn test_launcher_with_nothing_installed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path(), dir.path(), Path::new("/nonexistent"));
        let launcher = ServerLauncher::from_config(&config);
        assert!(matches!(
            launcher.launch(),
            Err(LaunchError::NoInstalledStrategy)
        ));
    }

    #[tokio::test]
    async fn test_launch_diagnoses_missing_java() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ensime_2.11-assembly.jar"), "").unwrap();
        let config = config_for(dir.path(), dir.path(), &dir.path().join("no-jvm"));

        let launcher = ServerLauncher::from_config(&config);
        assert!(matches!(launcher.launch(), Err(LaunchError::JavaNotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_diagnoses_non_executable_java() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ensime_2.11-assembly.jar"), "").unwrap();
        let jvm = dir.path().join("jvm");
        std::fs::create_dir_all(jvm.join("bin")).unwrap();
        std::fs::write(jvm.join("bin").join("java"), "").unwrap();
        let config = config_for(dir.path(), dir.path(), &jvm);

        let launcher = ServerLauncher::from_config(&config);
        assert!(matches!(
            launcher.launch(),
            Err(LaunchError::JavaNotExecutable(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_writes_fresh_log_and_pid() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ensime_2.11-assembly.jar"), "").unwrap();

        // A fake "java" that exits immediately.
        let jvm = dir.path().join("jvm");
        std::fs::create_dir_all(jvm.join("bin")).unwrap();
        let java = jvm.join("bin").join("java");
        std::fs::write(&java, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&java, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cache = dir.path().join("cache");
        let config = config_for(dir.path(), &cache, &jvm);
        let mut process = ServerLauncher::from_config(&config).launch().unwrap();

        let log = std::fs::read_to_string(cache.join(LOG_FILE)).unwrap();
        assert!(log.contains("initializing analysis-server process"));
        assert!(cache.join(PID_FILE).exists());
        process.stop();
    }
}
