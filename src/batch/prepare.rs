use super::{batch_name, resolve_app, BatchDir, BatchEnv};
use crate::db;
use crate::descriptor::{self, JobDescriptor};
use crate::error::{SubmitError, ValidationIssue, ValidationIssues};
use crate::runner::CommandSpec;
use crate::sandbox::is_plain_file_name;
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, instrument, warn};

const EXCERPT_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub batch_id: i64,
    pub njobs: i64,
    pub input_files: Vec<String>,
}

/// Create a batch from two sandbox files and validate its inputs.
///
/// The batch row is created before validation; if validation fails it is left
/// in INIT with no jobs.
#[instrument(skip_all, fields(user_id = user_id))]
pub async fn prepare_batch(
    env: BatchEnv<'_>,
    user_id: i64,
    zip_name: &str,
    job_desc_name: &str,
) -> Result<PreparedBatch, SubmitError> {
    let app = resolve_app(env.config, env.pool).await?;

    let zip_path = env
        .sandbox
        .physical_path(user_id, zip_name)
        .await
        .ok_or_else(|| SubmitError::NotInSandbox(zip_name.to_string()))?;
    let job_desc_path = env
        .sandbox
        .physical_path(user_id, job_desc_name)
        .await
        .ok_or_else(|| SubmitError::NotInSandbox(job_desc_name.to_string()))?;

    let now = Utc::now();
    let batch_id =
        db::insert_batch(env.pool, user_id, app.id, &batch_name(&app.name, now), now).await?;
    let dir = BatchDir::new(&env.config.batches_dir(), user_id, batch_id);

    tokio::fs::create_dir_all(dir.path())
        .await
        .map_err(|e| SubmitError::io(format!("can't create {}", dir.path().display()), e))?;
    let zip_copy = dir.input(zip_name);
    copy(&zip_path, &zip_copy).await?;

    let unzip = CommandSpec::new(env.config.tool_path(&env.config.tools.unzip))
        .arg("-o")
        .arg("-q")
        .arg(zip_copy.to_string_lossy())
        .arg("-d")
        .arg(dir.path().to_string_lossy());
    match env.runner.run(&unzip, None).await {
        Ok(out) if !out.success() => {
            warn!(batch_id, code = ?out.code, "unzip reported failure; continuing")
        }
        Ok(_) => {}
        Err(err) => warn!(batch_id, ?err, "unzip could not be run; continuing"),
    }

    // Archive members may already sit at the bookkeeping names, possibly as
    // symlinks pointing out of the batch dir.
    for slot in [dir.job_descs(), dir.files(), dir.files_uniq()] {
        clear_slot(&slot).await?;
    }
    copy(&job_desc_path, &dir.job_descs()).await?;

    let text = read_to_string(&dir.job_descs()).await?;
    let jobs = descriptor::parse(&text);
    let uniq = descriptor::unique_inputs(&jobs);

    let listing: String = jobs.iter().map(|j| format!("{}\n", j.input_file)).collect();
    write(&dir.files(), &listing).await?;
    let uniq_listing: String = uniq.iter().map(|f| format!("{}\n", f)).collect();
    write(&dir.files_uniq(), &uniq_listing).await?;

    let issues = validate(&dir, &jobs, &uniq).await;
    if !issues.is_empty() {
        warn!(batch_id, problems = issues.len(), "batch failed validation");
        return Err(SubmitError::Validation(ValidationIssues(issues)));
    }

    let njobs = jobs.len() as i64;
    db::set_batch_njobs(env.pool, batch_id, njobs).await?;
    info!(batch_id, njobs, inputs = uniq.len(), "batch prepared");

    Ok(PreparedBatch {
        batch_id,
        njobs,
        input_files: uniq.into_iter().collect(),
    })
}

/// Check every job and input file; collects all problems rather than
/// stopping at the first.
async fn validate(
    dir: &BatchDir,
    jobs: &[JobDescriptor],
    uniq: &BTreeSet<String>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if jobs.is_empty() {
        issues.push(ValidationIssue::NoJobs);
    }
    for job in jobs {
        if job
            .command_line
            .as_deref()
            .is_some_and(|c| c.contains('"'))
        {
            issues.push(ValidationIssue::QuoteInCommandLine { line: job.line });
        }
    }
    for name in uniq {
        if !is_plain_file_name(name) {
            issues.push(ValidationIssue::BadFileName(name.clone()));
            continue;
        }
        if let Some(issue) = check_input(&dir.input(name), name).await {
            issues.push(issue);
        }
    }
    issues
}

/// Inputs must be regular files holding JSON objects. Symlinks are not
/// followed.
async fn check_input(path: &Path, name: &str) -> Option<ValidationIssue> {
    let bytes = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_file() => match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(_) => return Some(ValidationIssue::MissingInputFile(name.to_string())),
        },
        Ok(_) => return Some(ValidationIssue::NotRegularFile(name.to_string())),
        Err(_) => return Some(ValidationIssue::MissingInputFile(name.to_string())),
    };
    let detail = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(v) if v.is_object() => return None,
        Ok(_) => "expected a JSON object".to_string(),
        Err(e) => e.to_string(),
    };
    let text = String::from_utf8_lossy(&bytes);
    let excerpt: String = text.chars().take(EXCERPT_LEN).collect();
    Some(ValidationIssue::Malformed {
        file: name.to_string(),
        detail,
        excerpt,
    })
}

/// Unlink whatever the archive left at `path`. Directories are refused.
async fn clear_slot(path: &Path) -> Result<(), SubmitError> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(SubmitError::io(format!("can't stat {}", path.display()), e)),
    };
    if meta.is_dir() {
        return Err(SubmitError::InvalidRequest(format!(
            "input archive may not contain a directory named {}",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        )));
    }
    warn!(path = %path.display(), "removing archive member at bookkeeping path");
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| SubmitError::io(format!("can't remove {}", path.display()), e))
}

async fn copy(from: &Path, to: &Path) -> Result<(), SubmitError> {
    tokio::fs::copy(from, to)
        .await
        .map(|_| ())
        .map_err(|e| SubmitError::io(format!("can't copy {} to {}", from.display(), to.display()), e))
}

async fn read_to_string(path: &Path) -> Result<String, SubmitError> {
    tokio::fs::read(path)
        .await
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .map_err(|e| SubmitError::io(format!("can't read {}", path.display()), e))
}

async fn write(path: &Path, contents: &str) -> Result<(), SubmitError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| SubmitError::io(format!("can't write {}", path.display()), e))
}
