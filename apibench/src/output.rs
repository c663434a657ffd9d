use crate::cli::OutputFormat;
use std::path::Path;

use apibench_core::{BenchmarkReport, PreparedPlan, ProgressFn};

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan_path: &Path, base_url: &str, plan: &PreparedPlan);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_report(&self, report: &BenchmarkReport) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}

/// Plain listing of a validated plan, shared by `validate` and the human run header.
pub(crate) fn render_plan(plan: &PreparedPlan) -> String {
    human::render_plan(plan)
}
