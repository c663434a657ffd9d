use anyhow::Context as _;
use std::path::Path;

use apibench_core::{BenchmarkOrchestrator, BenchmarkReport, OperationExecutor};

use crate::cli::{RunArgs, ValidateArgs};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::plan_file;
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let loaded = plan_file::load(&args.plan)
        .await
        .map_err(RunError::InvalidInput)?;
    tracing::debug!(
        plan = %args.plan.display(),
        phases = loaded.raw.phases.len(),
        base_url = %args.base_url,
        "plan loaded"
    );
    let out = output::formatter(args.output);

    let executor = OperationExecutor::http(args.base_url.as_str())
        .with_default_timeout(args.timeout)
        .with_auth_token(args.auth_token.clone());
    let orchestrator = BenchmarkOrchestrator::new(executor, loaded.payloads)
        .with_events_sample(args.events_sample)
        .with_progress(out.progress());

    let report = match orchestrator.prepare(&loaded.raw, &loaded.resolver) {
        Ok(prepared) => {
            out.print_header(&args.plan, &args.base_url, &prepared);
            orchestrator.execute(prepared).await
        }
        Err(err) => orchestrator.rejected(&loaded.raw, &err),
    };

    out.print_report(&report)
        .map_err(|err| RunError::RuntimeError(err.context("failed to print report")))?;

    if let Some(path) = &args.report_out {
        write_report(path, &report)
            .await
            .map_err(RunError::RuntimeError)?;
        tracing::info!(path = %path.display(), run_id = %report.run_id, "report written");
    }

    Ok(ExitCode::from_report(&report))
}

pub async fn validate(args: ValidateArgs) -> Result<(), RunError> {
    let loaded = plan_file::load(&args.plan)
        .await
        .map_err(RunError::InvalidInput)?;

    let orchestrator = BenchmarkOrchestrator::new(
        OperationExecutor::http(args.base_url.as_str()),
        loaded.payloads,
    );
    let prepared = orchestrator
        .prepare(&loaded.raw, &loaded.resolver)
        .with_context(|| format!("invalid plan: {}", args.plan.display()))
        .map_err(RunError::InvalidInput)?;

    print!("{}", output::render_plan(&prepared));
    println!("plan ok: {}", args.plan.display());
    Ok(())
}

async fn write_report(path: &Path, report: &BenchmarkReport) -> anyhow::Result<()> {
    let json = report.to_json_pretty().context("failed to serialize report")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create report dir: {}", parent.display()))?;
    }
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write report: {}", path.display()))
}
