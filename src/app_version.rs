//! Installing the files of a new app version under `apps/`.

use crate::config::Config;
use crate::db::{self, Pool};
use crate::error::SubmitError;
use crate::runner::{CommandRunner, CommandSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").expect("valid regex"));
static PLAN_CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid regex"));

/// A file received by the upload front end, waiting in the upload directory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Name the uploader gave the file; becomes its name in the version dir.
    pub name: String,
    pub tmp_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub app_name: String,
    pub version_num: String,
    pub platform_name: String,
    pub plan_class: Option<String>,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub dir: PathBuf,
    pub files: Vec<String>,
    /// Output of `update_versions`, verbatim.
    pub update_output: String,
}

/// `apps/<app>/<version>/<platform>[__<plan_class>]`
pub fn version_dir_path(
    apps_dir: &Path,
    app: &str,
    version: &str,
    platform: &str,
    plan_class: Option<&str>,
) -> PathBuf {
    let leaf = match plan_class {
        Some(pc) if !pc.is_empty() => format!("{}__{}", platform, pc),
        _ => platform.to_string(),
    };
    apps_dir.join(app).join(version).join(leaf)
}

#[instrument(skip_all, fields(app = %req.app_name, version = %req.version_num, platform = %req.platform_name))]
pub async fn install_app_version(
    cfg: &Config,
    pool: &Pool,
    runner: &dyn CommandRunner,
    req: &InstallRequest,
) -> Result<InstallReport, SubmitError> {
    if !cfg.features.enable_web_app_version_creation {
        return Err(SubmitError::Disabled("Disabled"));
    }

    let app = db::lookup_app(pool, &req.app_name)
        .await?
        .ok_or_else(|| SubmitError::UnknownApp(req.app_name.clone()))?;
    let platform = db::lookup_platform(pool, &req.platform_name)
        .await?
        .ok_or_else(|| SubmitError::UnknownPlatform(req.platform_name.clone()))?;

    let version = req.version_num.trim();
    if !VERSION_RE.is_match(version) {
        return Err(SubmitError::InvalidRequest(format!(
            "bad version number {:?}",
            req.version_num
        )));
    }
    let plan_class = req
        .plan_class
        .as_deref()
        .map(str::trim)
        .filter(|pc| !pc.is_empty());
    if let Some(pc) = plan_class {
        if !PLAN_CLASS_RE.is_match(pc) {
            return Err(SubmitError::InvalidRequest(format!("bad plan class {:?}", pc)));
        }
    }

    let dir = version_dir_path(&cfg.apps_dir(), &app.name, version, &platform.name, plan_class);
    if let Some(parent) = dir.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SubmitError::io(format!("can't create {}", parent.display()), e))?;
    }
    match tokio::fs::create_dir(&dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(SubmitError::AlreadyExists(dir));
        }
        Err(e) => return Err(SubmitError::io(format!("can't create {}", dir.display()), e)),
    }

    let upload_root = canonical_upload_dir(cfg).await?;
    let mut installed = Vec::with_capacity(req.files.len());
    for file in &req.files {
        if !is_uploaded_file(&upload_root, &file.tmp_path).await {
            return Err(SubmitError::InvalidRequest(format!(
                "{} is not uploaded file",
                file.tmp_path.display()
            )));
        }
        if file.name.contains('/') {
            return Err(SubmitError::InvalidRequest("no / allowed".into()));
        }
        let dest = dir.join(&file.name);
        move_file(&file.tmp_path, &dest).await.map_err(|e| {
            SubmitError::io(
                format!(
                    "can't rename {} to {}",
                    file.tmp_path.display(),
                    dest.display()
                ),
                e,
            )
        })?;
        info!(file = %file.name, "installed app version file");
        installed.push(file.name.clone());
    }

    let spec = CommandSpec::new(cfg.tool_path(&cfg.tools.update_versions))
        .arg("--no_conf")
        .current_dir(cfg.project_dir());
    let output = runner.run(&spec, None).await?;
    if !output.success() {
        warn!(code = ?output.code, "update_versions exited unsuccessfully");
    }

    Ok(InstallReport {
        dir,
        files: installed,
        update_output: output.combined_text(),
    })
}

async fn canonical_upload_dir(cfg: &Config) -> Result<PathBuf, SubmitError> {
    let dir = cfg.upload_dir();
    tokio::fs::canonicalize(&dir)
        .await
        .map_err(|e| SubmitError::io(format!("upload dir {} unavailable", dir.display()), e))
}

/// True if `path` is a regular file inside the upload directory.
async fn is_uploaded_file(upload_root: &Path, path: &Path) -> bool {
    let Ok(real) = tokio::fs::canonicalize(path).await else {
        return false;
    };
    if !real.starts_with(upload_root) {
        return false;
    }
    matches!(tokio::fs::metadata(&real).await, Ok(m) if m.is_file())
}

/// Rename, falling back to copy + remove when crossing filesystems.
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_layout() {
        let root = Path::new("/p/apps");
        assert_eq!(
            version_dir_path(root, "uppercase", "101", "x86_64-pc-linux-gnu", None),
            PathBuf::from("/p/apps/uppercase/101/x86_64-pc-linux-gnu")
        );
        assert_eq!(
            version_dir_path(root, "uppercase", "101", "windows_x86_64", Some("cuda")),
            PathBuf::from("/p/apps/uppercase/101/windows_x86_64__cuda")
        );
        assert_eq!(
            version_dir_path(root, "a", "1", "p", Some("")),
            PathBuf::from("/p/apps/a/1/p")
        );
    }

    #[tokio::test]
    async fn upload_check_rejects_outside_files() {
        let td = tempfile::tempdir().unwrap();
        let uploads = td.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::write(uploads.join("ok"), "x").unwrap();
        std::fs::write(td.path().join("elsewhere"), "x").unwrap();
        let root = std::fs::canonicalize(&uploads).unwrap();

        assert!(is_uploaded_file(&root, &uploads.join("ok")).await);
        assert!(!is_uploaded_file(&root, &td.path().join("elsewhere")).await);
        assert!(!is_uploaded_file(&root, &uploads.join("../elsewhere")).await);
        assert!(!is_uploaded_file(&root, &uploads.join("missing")).await);
        assert!(!is_uploaded_file(&root, &uploads).await);
    }
}
