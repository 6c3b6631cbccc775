//! Operator CLI for the sealing pipeline.
//!
//! Works against a state directory (exported envelope/job rows plus the
//! document files) rather than the live database: `check` summarizes job
//! health, `stuck` lists envelopes the completion trigger lost, and `fix`
//! re-triggers them — dry-run by default, end to end with `--execute`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sealflow_core::TenantId;
use sealflow_jobs::{
    HandlerRegistry, InMemoryJobStore, JobDispatcher, JobRunner, JobStore, RetryPolicy,
};
use sealflow_sealing::{
    EnvelopeStore, InMemoryEnvelopeStore, LoggingNotifier, ReconcileMode, ReconcileReport,
    SealDocumentHandler, StuckEnvelopeReconciler,
};

mod state;

use state::FsDocumentStore;

#[derive(Parser)]
#[command(
    name = "sealflow",
    version,
    about = "Operator tooling for the document sealing pipeline"
)]
struct Cli {
    /// State directory (envelopes.json, jobs.json, documents/)
    #[arg(long, global = true, default_value = "state")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize job status buckets and list permanently failed jobs
    Check,
    /// List stuck envelopes (all required signatures in, still pending)
    Stuck {
        /// Restrict the sweep to one tenant
        #[arg(long)]
        tenant: Option<TenantId>,
    },
    /// Re-trigger sealing for stuck envelopes
    Fix {
        /// Enqueue and run the seal jobs (default is a dry run)
        #[arg(long)]
        execute: bool,
        /// Skip completion notifications for re-triggered envelopes
        #[arg(long)]
        no_email: bool,
        /// Restrict the sweep to one tenant
        #[arg(long)]
        tenant: Option<TenantId>,
    },
}

fn main() -> Result<()> {
    sealflow_observability::tracing::init_with_default_filter("warn");

    let cli = Cli::parse();
    match cli.command {
        Command::Check => check(&cli.state),
        Command::Stuck { tenant } => stuck(&cli.state, tenant),
        Command::Fix {
            execute,
            no_email,
            tenant,
        } => fix(&cli.state, execute, !no_email, tenant),
    }
}

/// Wiring shared by the commands: stores seeded from the state directory
/// plus the dispatcher/reconciler over them.
struct Wiring {
    envelopes: Arc<InMemoryEnvelopeStore>,
    job_store: Arc<InMemoryJobStore>,
    runner: JobRunner,
    reconciler: StuckEnvelopeReconciler,
}

fn wire(state_dir: &Path) -> Result<Wiring> {
    let envelopes = InMemoryEnvelopeStore::arc();
    for envelope in state::load_envelopes(state_dir)? {
        envelopes
            .put(envelope)
            .context("seeding envelope store")?;
    }

    let job_store = InMemoryJobStore::arc();
    for job in state::load_jobs(state_dir)? {
        job_store
            .enqueue(job)
            .context("seeding job store")?;
    }

    let files = Arc::new(FsDocumentStore::new(state_dir));
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(SealDocumentHandler::new(
        envelopes.clone(),
        files,
        Arc::new(LoggingNotifier),
    )));
    let registry = Arc::new(registry);

    let dispatcher = Arc::new(JobDispatcher::new(job_store.clone(), registry.clone()));
    let runner = JobRunner::new(job_store.clone(), registry)
        .with_retry_policy(RetryPolicy::fixed(std::time::Duration::ZERO));
    let reconciler = StuckEnvelopeReconciler::new(envelopes.clone(), dispatcher);

    Ok(Wiring {
        envelopes,
        job_store,
        runner,
        reconciler,
    })
}

fn check(state_dir: &Path) -> Result<()> {
    let wiring = wire(state_dir)?;
    let stats = wiring.job_store.stats()?;

    println!("job status buckets");
    println!("  pending:            {}", stats.pending);
    println!("  processing:         {}", stats.processing);
    println!("  completed:          {}", stats.completed);
    println!("  failed (retriable): {}", stats.failed);
    println!("  failed (permanent): {}", stats.permanently_failed);

    let permanent: Vec<_> = wiring
        .job_store
        .dump()
        .into_iter()
        .filter(|j| j.is_permanently_failed())
        .collect();
    if !permanent.is_empty() {
        println!();
        println!("permanently failed jobs (operator intervention required):");
        for job in permanent {
            let error = match &job.status {
                sealflow_jobs::JobStatus::Failed { error, .. } => error.clone(),
                _ => String::new(),
            };
            println!(
                "  {}  {}  retried {}/{}  submitted {}  {}",
                job.id, job.name, job.retried, job.max_retries, job.submitted_at, error
            );
        }
    }

    Ok(())
}

fn stuck(state_dir: &Path, tenant: Option<TenantId>) -> Result<()> {
    let wiring = wire(state_dir)?;
    let (scanned, stuck) = wiring.reconciler.find_stuck(tenant)?;

    println!("scanned {scanned} pending envelope(s); {} stuck", stuck.len());
    for entry in stuck {
        println!(
            "  {}  tenant {}  \"{}\"  required signed: {}  exempt: {}",
            entry.envelope_id,
            entry.tenant_id,
            entry.title,
            entry.required_recipients,
            entry.exempt_recipients
        );
    }

    Ok(())
}

fn fix(state_dir: &Path, execute: bool, send_email: bool, tenant: Option<TenantId>) -> Result<()> {
    let wiring = wire(state_dir)?;
    let mode = if execute {
        ReconcileMode::Execute
    } else {
        ReconcileMode::DryRun
    };

    let report = wiring.reconciler.reconcile(mode, send_email, tenant)?;
    print_report(&report, execute);

    if !execute {
        return Ok(());
    }

    let processed = wiring.runner.run_ready()?;
    println!("ran {processed} job attempt(s)");

    // Persist the healed state back to the directory.
    state::save_envelopes(state_dir, &wiring.envelopes.dump())?;
    state::save_jobs(state_dir, &wiring.job_store.dump())?;

    let stats = wiring.job_store.stats()?;
    println!(
        "jobs now: {} completed, {} failed (retriable), {} failed (permanent)",
        stats.completed, stats.failed, stats.permanently_failed
    );

    Ok(())
}

fn print_report(report: &ReconcileReport, execute: bool) {
    println!(
        "scanned {} pending envelope(s); {} stuck",
        report.scanned,
        report.stuck.len()
    );
    for entry in &report.stuck {
        println!("  {}  \"{}\"", entry.envelope_id, entry.title);
    }
    if execute {
        println!("re-triggered {} seal job(s)", report.triggered.len());
    } else if !report.stuck.is_empty() {
        println!("dry run; pass --execute to re-trigger sealing");
    }
}
