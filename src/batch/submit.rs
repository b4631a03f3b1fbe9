use super::{ensure_enabled, resolve_app, BatchDir, BatchEnv};
use crate::config::Config;
use crate::db::{self, Pool, SubmitClaim};
use crate::descriptor;
use crate::error::SubmitError;
use crate::fanout::dir_hier_path;
use crate::model::{App, Batch};
use crate::runner::CommandSpec;
use anyhow::anyhow;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct SubmittedBatch {
    pub batch_id: i64,
    pub njobs: usize,
    /// Physical paths of the staged input files.
    pub staged: Vec<PathBuf>,
}

/// Stage a prepared batch's inputs and create its jobs.
///
/// The batch is claimed up front with a conditional update, so a concurrent
/// or repeated submit fails before touching the download tree. On failure the
/// claim is released and the batch stays INIT; staged files are not removed.
#[instrument(skip_all, fields(user_id = user_id, batch_id = batch_id))]
pub async fn submit_batch(
    env: BatchEnv<'_>,
    user_id: i64,
    batch_id: i64,
) -> Result<SubmittedBatch, SubmitError> {
    let app = resolve_app(env.config, env.pool).await?;

    let batch = match db::claim_batch_for_submit(env.pool, batch_id, user_id).await? {
        SubmitClaim::Claimed(batch) => batch,
        SubmitClaim::NotFound => return Err(SubmitError::NoSuchBatch(batch_id)),
        SubmitClaim::NotOwner => return Err(SubmitError::NotYourBatch(batch_id)),
        SubmitClaim::AlreadySubmitted => return Err(SubmitError::AlreadySubmitted(batch_id)),
        SubmitClaim::InFlight => return Err(SubmitError::SubmitInFlight(batch_id)),
    };

    let submitted = match stage_and_create(env, &app, &batch).await {
        Ok(s) => s,
        Err(err) => {
            if let Err(release_err) = db::release_submit_claim(env.pool, batch_id).await {
                warn!(?release_err, "failed to release submit claim");
            }
            return Err(err);
        }
    };

    if !db::mark_batch_in_progress(env.pool, batch_id).await? {
        return Err(SubmitError::Internal(anyhow!(
            "batch {} left the claimed INIT state during submit",
            batch_id
        )));
    }
    info!(njobs = submitted.njobs, "batch submitted");
    Ok(submitted)
}

async fn stage_and_create(
    env: BatchEnv<'_>,
    app: &App,
    batch: &Batch,
) -> Result<SubmittedBatch, SubmitError> {
    let cfg = env.config;
    // Prepare sets njobs only after validation passes.
    if batch.njobs == 0 {
        return Err(SubmitError::InvalidRequest(format!(
            "batch {} has not been successfully prepared",
            batch.id
        )));
    }
    let dir = BatchDir::new(&cfg.batches_dir(), batch.user_id, batch.id);

    let uniq = tokio::fs::read_to_string(dir.files_uniq())
        .await
        .map_err(|e| SubmitError::io(format!("batch {} was not prepared", batch.id), e))?;
    let download_dir = cfg.download_dir();
    let mut staged = Vec::new();
    for name in uniq.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let src = dir.input(name);
        // Re-checked here: the batch dir may have changed since prepare.
        let regular = tokio::fs::symlink_metadata(&src)
            .await
            .map(|m| m.file_type().is_file())
            .unwrap_or(false);
        if !regular {
            return Err(SubmitError::InvalidRequest(format!(
                "input file {} is not a regular file",
                name
            )));
        }
        let phys = descriptor::staged_name(batch.id, name);
        let dest = dir_hier_path(&phys, &download_dir, cfg.project.uldl_dir_fanout)
            .await
            .map_err(|e| SubmitError::io(format!("can't create fan-out dir for {}", phys), e))?;
        tokio::fs::copy(&src, &dest).await.map_err(|e| {
            SubmitError::io(
                format!("Can't copy {} to {}", src.display(), dest.display()),
                e,
            )
        })?;
        info!(file = %name, dest = %dest.display(), "staged input file");
        staged.push(dest);
    }

    let text = tokio::fs::read_to_string(dir.job_descs())
        .await
        .map_err(|e| SubmitError::io(format!("can't read {}", dir.job_descs().display()), e))?;
    let jobs = descriptor::parse(&text);
    let payload = descriptor::submission_payload(batch.id, &jobs);

    let spec = CommandSpec::new(cfg.tool_path(&cfg.tools.create_work))
        .arg("--appname")
        .arg(&app.name)
        .arg("--batch")
        .arg(batch.id.to_string())
        .arg("--stdin")
        .current_dir(cfg.project_dir());
    let output = env.runner.run(&spec, Some(payload.as_bytes())).await?;
    if !output.success() {
        warn!(code = ?output.code, "create_work failed");
        return Err(SubmitError::CommandFailed {
            command: spec.name(),
            output: output.combined_text(),
        });
    }

    Ok(SubmittedBatch {
        batch_id: batch.id,
        njobs: jobs.len(),
        staged,
    })
}

/// Clear a submit claim left behind by a crashed submit. The batch stays INIT.
#[instrument(skip_all, fields(batch_id = batch_id))]
pub async fn release_batch(
    cfg: &Config,
    pool: &Pool,
    batch_id: i64,
) -> Result<bool, SubmitError> {
    ensure_enabled(cfg)?;
    if db::lookup_batch(pool, batch_id).await?.is_none() {
        return Err(SubmitError::NoSuchBatch(batch_id));
    }
    Ok(db::release_submit_claim(pool, batch_id).await?)
}
