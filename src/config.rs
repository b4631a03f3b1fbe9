//! Configuration loader and validator for the submission tools.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub project: Project,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub autodock: Autodock,
    #[serde(default)]
    pub tools: Tools,
}

/// Project layout. Relative paths resolve under `dir`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub dir: String,
    #[serde(default = "default_apps_dir")]
    pub apps_dir: String,
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    #[serde(default = "default_fanout")]
    pub uldl_dir_fanout: u32,
    #[serde(default = "default_batches_dir")]
    pub batches_dir: String,
    #[serde(default = "default_sandbox_dir")]
    pub sandbox_dir: String,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Per-page feature switches; both pages are off unless enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Features {
    #[serde(default)]
    pub enable_web_app_version_creation: bool,
    #[serde(default)]
    pub enable_autodock_submit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Autodock {
    pub app_name: String,
}

impl Default for Autodock {
    fn default() -> Self {
        Self {
            app_name: "autodock".into(),
        }
    }
}

/// External executables. Relative paths resolve against the project dir,
/// which is also their working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tools {
    pub update_versions: String,
    pub create_work: String,
    pub unzip: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            update_versions: "bin/update_versions".into(),
            create_work: "bin/create_work".into(),
            unzip: "unzip".into(),
        }
    }
}

fn default_apps_dir() -> String {
    "apps".into()
}
fn default_download_dir() -> String {
    "download".into()
}
fn default_fanout() -> u32 {
    1024
}
fn default_batches_dir() -> String {
    "html/user/batches".into()
}
fn default_sandbox_dir() -> String {
    "sandbox".into()
}
fn default_upload_dir() -> String {
    "tmp/uploads".into()
}

impl Config {
    pub fn project_dir(&self) -> PathBuf {
        PathBuf::from(&self.project.dir)
    }

    /// Resolve a configured path against the project directory.
    pub fn project_path(&self, p: &str) -> PathBuf {
        let path = Path::new(p);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir().join(path)
        }
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.project_path(&self.project.apps_dir)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.project_path(&self.project.download_dir)
    }

    pub fn batches_dir(&self) -> PathBuf {
        self.project_path(&self.project.batches_dir)
    }

    pub fn sandbox_dir(&self) -> PathBuf {
        self.project_path(&self.project.sandbox_dir)
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.project_path(&self.project.upload_dir)
    }

    /// Program path for a configured tool. Bare names are left for `PATH`
    /// lookup; anything with a separator is anchored at the project dir.
    pub fn tool_path(&self, tool: &str) -> PathBuf {
        if tool.contains('/') {
            self.project_path(tool)
        } else {
            PathBuf::from(tool)
        }
    }

    /// SQLite URL used when `DATABASE_URL` is not set.
    pub fn database_url(&self) -> String {
        match &self.project.database_url {
            Some(url) if !url.trim().is_empty() => url.clone(),
            _ => format!("sqlite://{}/db/submit.db", self.project.dir.trim_end_matches('/')),
        }
    }

    /// Ensure the working directories exist.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [
            self.batches_dir(),
            self.download_dir(),
            self.sandbox_dir(),
            self.upload_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.project.dir.trim().is_empty() {
        return Err(ConfigError::Invalid("project.dir must be non-empty"));
    }
    if cfg.project.uldl_dir_fanout == 0 {
        return Err(ConfigError::Invalid("project.uldl_dir_fanout must be > 0"));
    }
    if cfg.project.download_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("project.download_dir must be non-empty"));
    }
    if cfg.project.batches_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("project.batches_dir must be non-empty"));
    }
    if cfg.autodock.app_name.trim().is_empty() {
        return Err(ConfigError::Invalid("autodock.app_name must be non-empty"));
    }
    if cfg.tools.update_versions.trim().is_empty() {
        return Err(ConfigError::Invalid("tools.update_versions must be non-empty"));
    }
    if cfg.tools.create_work.trim().is_empty() {
        return Err(ConfigError::Invalid("tools.create_work must be non-empty"));
    }
    if cfg.tools.unzip.trim().is_empty() {
        return Err(ConfigError::Invalid("tools.unzip must be non-empty"));
    }
    Ok(())
}

/// Sample configuration, also used by the tests.
pub fn example() -> &'static str {
    r#"project:
  dir: "/home/boincadm/projects/test"
  apps_dir: "apps"
  download_dir: "download"
  uldl_dir_fanout: 1024
  batches_dir: "html/user/batches"
  sandbox_dir: "sandbox"
  upload_dir: "tmp/uploads"

features:
  enable_web_app_version_creation: false
  enable_autodock_submit: true

autodock:
  app_name: "autodock"

tools:
  update_versions: "bin/update_versions"
  create_work: "bin/create_work"
  unzip: "unzip"
"#
}
