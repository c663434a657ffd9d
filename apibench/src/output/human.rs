use std::path::Path;
use std::sync::Arc;

mod format;
mod progress;
mod summary;

use apibench_core::{BenchmarkReport, PhaseMode, PhaseProgress, PreparedPlan, ProgressFn};
use format::{format_bytes, format_duration, format_rate};
use progress::{BarPosition, HumanProgress};

pub(crate) use summary::render_plan;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan_path: &Path, base_url: &str, plan: &PreparedPlan) {
        println!("plan: {}", plan_path.display());
        println!("target: {base_url}");
        print!("{}", render_plan(plan));
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        Some(Arc::new(move |u: PhaseProgress| {
            let label = format!("[{}/{}] {} {}", u.index, u.phases, u.phase, u.role);
            progress.update(&label, bar_position(&u), progress_message(&u));
        }))
    }

    fn print_report(&self, report: &BenchmarkReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", summary::render(report));

        if !report.verdict.failures.is_empty() {
            eprintln!("thresholds failed:");
            for f in &report.verdict.failures {
                eprintln!("  {f}");
            }
        }

        Ok(())
    }
}

fn bar_position(u: &PhaseProgress) -> BarPosition {
    match u.mode {
        PhaseMode::Iterations(total) => BarPosition {
            done: u.events_total,
            total,
        },
        PhaseMode::DurationMs(total) => BarPosition {
            done: u.elapsed.as_millis().min(u128::from(u64::MAX)) as u64,
            total,
        },
    }
}

fn progress_message(u: &PhaseProgress) -> String {
    let mut msg = format!(
        "c={} elapsed={} events={} errors={} rps={} sent={}/s",
        u.concurrency,
        format_duration(u.elapsed),
        u.events_total,
        u.errors_total,
        format_rate(u.events_per_sec_now),
        format_bytes(u.bytes_sent_per_sec_now)
    );
    if u.target_bytes_per_second > 0 {
        msg.push_str(&format!(
            " target={}/s",
            format_bytes(u.target_bytes_per_second)
        ));
    }
    msg
}
