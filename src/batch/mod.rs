//! Autodock batch submission: prepare (validate) then submit (stage + enqueue).

mod prepare;
mod submit;

pub use prepare::{prepare_batch, PreparedBatch};
pub use submit::{release_batch, submit_batch, SubmittedBatch};

use crate::config::Config;
use crate::db::{self, Pool};
use crate::error::SubmitError;
use crate::model::App;
use crate::runner::CommandRunner;
use crate::sandbox::Sandbox;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Collaborators shared by the batch operations.
#[derive(Clone, Copy)]
pub struct BatchEnv<'a> {
    pub config: &'a Config,
    pub pool: &'a Pool,
    pub runner: &'a dyn CommandRunner,
    pub sandbox: &'a dyn Sandbox,
}

/// Working directory of one batch: `<batches_dir>/<user>/<batch>`.
#[derive(Debug, Clone)]
pub struct BatchDir {
    root: PathBuf,
}

impl BatchDir {
    pub fn new(batches_dir: &Path, user_id: i64, batch_id: i64) -> Self {
        Self {
            root: batches_dir
                .join(user_id.to_string())
                .join(batch_id.to_string()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn job_descs(&self) -> PathBuf {
        self.root.join("job_descs")
    }

    /// Input names as referenced, one per job.
    pub fn files(&self) -> PathBuf {
        self.root.join("files")
    }

    /// Distinct input names; what submit stages.
    pub fn files_uniq(&self) -> PathBuf {
        self.root.join("files_uniq")
    }

    pub fn input(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

pub fn ensure_enabled(cfg: &Config) -> Result<(), SubmitError> {
    if cfg.features.enable_autodock_submit {
        Ok(())
    } else {
        Err(SubmitError::Disabled("Autodock not enabled"))
    }
}

/// Feature gate plus lookup of the app batches are submitted to.
pub async fn resolve_app(cfg: &Config, pool: &Pool) -> Result<App, SubmitError> {
    ensure_enabled(cfg)?;
    db::lookup_app(pool, &cfg.autodock.app_name)
        .await?
        .ok_or_else(|| SubmitError::UnknownApp(cfg.autodock.app_name.clone()))
}

/// Display name of a new batch, e.g. `autodock 5 Mar 2024, 9:07:03 UTC`.
pub fn batch_name(app_name: &str, now: DateTime<Utc>) -> String {
    format!("{} {}", app_name, now.format("%-d %b %Y, %-H:%M:%S UTC"))
}

/// How to put together and submit a batch.
pub const INSTRUCTIONS: &str = "\
Submitting AutoDock jobs

Each job has
  - a JSON-format input file
  - a command line containing arguments to AutoDock
See https://autodock.scripps.edu for descriptions of these.

To submit a batch, create two files:
  1. a zip file containing all of your input files
  2. a job description file with one line per job, of the form
     input_filename,command-line

For example, if your input files are input0.json and input1.json,
the job description file might look like

    input0.json,--arg=5 --verbose
    input1.json,--arg=4 --verbose

Then:
  1. Upload the zip file and the job description file to your sandbox.
  2. Run `batch prepare --user <id> --zip <zip> --job-desc <file>`.
     This reports any errors in your input files; fix them and upload again.
  3. If there are no errors, run `batch submit --user <id> --batch <batch id>`.
     This queues the jobs for execution.
  4. Follow the batch with `batch list --user <id>`.
";
