#![allow(dead_code)]

use anyhow::Result;
use boinc_submit::batch::BatchEnv;
use boinc_submit::config::{self, Config};
use boinc_submit::db::{self, Pool};
use boinc_submit::runner::{CommandOutput, CommandRunner, CommandSpec};
use boinc_submit::sandbox::DirSandbox;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub struct Project {
    pub dir: TempDir,
    pub cfg: Config,
    pub pool: Pool,
    pub sandbox: DirSandbox,
    pub runner: RecordingRunner,
}

impl Project {
    pub fn env(&self) -> BatchEnv<'_> {
        BatchEnv {
            config: &self.cfg,
            pool: &self.pool,
            runner: &self.runner,
            sandbox: &self.sandbox,
        }
    }

    pub fn put_sandbox_file(&self, user_id: i64, name: &str, contents: &str) {
        let dir = self.sandbox.user_dir(user_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), contents).unwrap();
    }

    pub fn put_upload(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.cfg.upload_dir().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }
}

/// Temp project tree with both features on, a migrated in-memory database
/// and the autodock app registered.
pub async fn project() -> Project {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.project.dir = dir.path().to_string_lossy().to_string();
    cfg.features.enable_web_app_version_creation = true;
    cfg.features.enable_autodock_submit = true;
    config::validate(&cfg).unwrap();
    cfg.ensure_dirs().unwrap();

    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    db::register_app(&pool, "autodock").await.unwrap();

    let sandbox = DirSandbox::new(cfg.sandbox_dir());
    Project {
        dir,
        cfg,
        pool,
        sandbox,
        runner: RecordingRunner::default(),
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub spec: CommandSpec,
    pub stdin: Option<Vec<u8>>,
}

/// Records every command. `unzip` extracts the configured archive members
/// into its `-d` directory; other programs succeed unless told otherwise.
#[derive(Clone, Default)]
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<Call>>>,
    archive: Arc<Mutex<Vec<(String, String)>>>,
    links: Arc<Mutex<Vec<(String, PathBuf)>>>,
    outputs: Arc<Mutex<HashMap<String, CommandOutput>>>,
}

impl RecordingRunner {
    pub fn set_archive(&self, members: &[(&str, &str)]) {
        *self.archive.lock().unwrap() = members
            .iter()
            .map(|(n, c)| (n.to_string(), c.to_string()))
            .collect();
    }

    /// Archive members extracted as symlinks to `target`.
    pub fn set_archive_links(&self, links: &[(&str, &Path)]) {
        *self.links.lock().unwrap() = links
            .iter()
            .map(|(n, t)| (n.to_string(), t.to_path_buf()))
            .collect();
    }

    pub fn set_output(&self, program: &str, output: CommandOutput) {
        self.outputs
            .lock()
            .unwrap()
            .insert(program.to_string(), output);
    }

    pub fn clear_output(&self, program: &str) {
        self.outputs.lock().unwrap().remove(program);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.spec.name() == program)
            .collect()
    }
}

pub fn exit_with(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

#[async_trait::async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec, stdin: Option<&[u8]>) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(Call {
            spec: spec.clone(),
            stdin: stdin.map(<[u8]>::to_vec),
        });

        let name = spec.name();
        if name == "unzip" {
            if let Some(pos) = spec.args.iter().position(|a| a == "-d") {
                let dest = PathBuf::from(&spec.args[pos + 1]);
                let members = self.archive.lock().unwrap().clone();
                for (member, contents) in members {
                    std::fs::write(dest.join(member), contents)?;
                }
                let links = self.links.lock().unwrap().clone();
                for (member, target) in links {
                    symlink(&target, &dest.join(member))?;
                }
            }
        }

        let out = self.outputs.lock().unwrap().get(&name).cloned();
        Ok(out.unwrap_or_else(|| exit_with(0, &format!("{} ok\n", name), "")))
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    // unzip -o replaces existing entries.
    let _ = std::fs::remove_file(link);
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlink members need unix",
    ))
}
