use anyhow::Result;
use boinc_submit::app_version::{self, InstallRequest, UploadedFile};
use boinc_submit::batch::{self, BatchEnv};
use boinc_submit::config::{self, Config};
use boinc_submit::db::{self, Pool};
use boinc_submit::runner::ProcessRunner;
use boinc_submit::sandbox::DirSandbox;
use boinc_submit::SubmitError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Install the files of a new app version and run update_versions
    InstallVersion {
        #[arg(long = "app")]
        app_name: String,
        #[arg(long = "version-num")]
        version_num: String,
        #[arg(long = "platform")]
        platform_name: String,
        #[arg(long)]
        plan_class: Option<String>,
        /// Uploaded files, as NAME=PATH or PATH
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Register an application name
    RegisterApp { name: String },
    /// Register a platform name
    RegisterPlatform { name: String },
    /// Autodock batch submission
    Batch {
        #[command(subcommand)]
        action: BatchCmd,
    },
    /// Print an example config file
    ExampleConfig,
}

#[derive(Debug, Subcommand)]
enum BatchCmd {
    /// How to prepare and submit a batch
    Info,
    /// Validate sandbox inputs and create a batch
    Prepare {
        #[arg(long = "user")]
        user_id: i64,
        /// Zip of job input files, in the sandbox
        #[arg(long = "zip")]
        input_zip_filename: String,
        /// Job description file, in the sandbox
        #[arg(long = "job-desc")]
        job_desc_filename: String,
    },
    /// Stage a prepared batch and create its jobs
    Submit {
        #[arg(long = "user")]
        user_id: i64,
        #[arg(long = "batch")]
        batch_id: i64,
    },
    /// List a user's batches
    List {
        #[arg(long = "user")]
        user_id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Clear the submit claim of a batch whose submit crashed
    Release {
        #[arg(long = "batch")]
        batch_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Cmd::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    // Instructions need neither the database nor a user.
    if let Cmd::Batch {
        action: BatchCmd::Info,
    } = args.command
    {
        if let Err(err) = batch::ensure_enabled(&cfg) {
            fail(err);
        }
        print!("{}", batch::INSTRUCTIONS);
        return Ok(());
    }

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    if let Err(err) = run(&cfg, &pool, args.command).await {
        fail(err);
    }
    Ok(())
}

/// Print a workflow error and exit with its class's status.
fn fail(err: SubmitError) -> ! {
    error!(%err, "request failed");
    eprintln!("{}", err);
    std::process::exit(err.exit_code());
}

async fn run(cfg: &Config, pool: &Pool, command: Cmd) -> Result<(), SubmitError> {
    let runner = ProcessRunner;
    let sandbox = DirSandbox::new(cfg.sandbox_dir());
    let env = BatchEnv {
        config: cfg,
        pool,
        runner: &runner,
        sandbox: &sandbox,
    };

    match command {
        Cmd::InstallVersion {
            app_name,
            version_num,
            platform_name,
            plan_class,
            files,
        } => {
            let req = InstallRequest {
                app_name,
                version_num,
                platform_name,
                plan_class,
                files: files.iter().map(String::as_str).map(parse_upload).collect(),
            };
            let report = app_version::install_app_version(cfg, pool, &runner, &req).await?;
            println!("Installed {} file(s) in {}", report.files.len(), report.dir.display());
            println!("Updating app versions");
            print!("{}", report.update_output);
        }
        Cmd::RegisterApp { name } => {
            let id = db::register_app(pool, &name).await?;
            info!(id, %name, "registered app");
            println!("app {} has id {}", name, id);
        }
        Cmd::RegisterPlatform { name } => {
            let id = db::register_platform(pool, &name).await?;
            info!(id, %name, "registered platform");
            println!("platform {} has id {}", name, id);
        }
        Cmd::Batch { action } => run_batch(env, action).await?,
        Cmd::ExampleConfig => {}
    }
    Ok(())
}

async fn run_batch(env: BatchEnv<'_>, action: BatchCmd) -> Result<(), SubmitError> {
    match action {
        BatchCmd::Info => print!("{}", batch::INSTRUCTIONS),
        BatchCmd::Prepare {
            user_id,
            input_zip_filename,
            job_desc_filename,
        } => {
            let prepared =
                batch::prepare_batch(env, user_id, &input_zip_filename, &job_desc_filename)
                    .await?;
            println!("The input files for your batch are valid.");
            println!(
                "Batch {} has {} jobs ({} distinct input files).",
                prepared.batch_id,
                prepared.njobs,
                prepared.input_files.len()
            );
            println!(
                "Submit it with: batch submit --user {} --batch {}",
                user_id, prepared.batch_id
            );
        }
        BatchCmd::Submit { user_id, batch_id } => {
            let submitted = batch::submit_batch(env, user_id, batch_id).await?;
            println!(
                "Your batch (ID {}) has been submitted: {} jobs, {} input files staged.",
                submitted.batch_id,
                submitted.njobs,
                submitted.staged.len()
            );
            println!("Monitor it with: batch list --user {}", user_id);
        }
        BatchCmd::List { user_id, json } => {
            batch::ensure_enabled(env.config)?;
            let batches = db::list_batches_for_user(env.pool, user_id).await?;
            if json {
                let out = serde_json::to_string_pretty(&batches).map_err(anyhow::Error::from)?;
                println!("{}", out);
            } else {
                for b in &batches {
                    println!(
                        "{:>6}  {:<12} {:>6} jobs  {}  {}",
                        b.id,
                        b.state.as_str(),
                        b.njobs,
                        b.create_time.format("%Y-%m-%d %H:%M:%S"),
                        b.name
                    );
                }
            }
        }
        BatchCmd::Release { batch_id } => {
            if batch::release_batch(env.config, env.pool, batch_id).await? {
                println!("Released submit claim on batch {}", batch_id);
            } else {
                println!("Batch {} held no submit claim", batch_id);
            }
        }
    }
    Ok(())
}

/// `NAME=PATH` keeps the uploader's name; a bare path uses its file name.
fn parse_upload(arg: &str) -> UploadedFile {
    match arg.split_once('=') {
        Some((name, path)) => UploadedFile {
            name: name.to_string(),
            tmp_path: PathBuf::from(path),
        },
        None => {
            let tmp_path = PathBuf::from(arg);
            let name = tmp_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| arg.to_string());
            UploadedFile { name, tmp_path }
        }
    }
}
