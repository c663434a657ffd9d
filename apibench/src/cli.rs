use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }

    // Bare numbers are seconds.
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| format!("duration '{s}' is too large"));
    }

    let d = humantime::parse_duration(s)
        .map_err(|err| format!("invalid duration '{s}': {err} (expected e.g. 10s, 250ms, 1m)"))?;
    if d.is_zero() {
        return Err(format!("duration '{s}' must be greater than zero"));
    }
    Ok(d)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bars and a human-readable summary.
    HumanReadable,
    /// NDJSON progress lines, then the JSON report, on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "apibench",
    author,
    version,
    about = "Phased, rate-controlled HTTP API benchmark runner",
    long_about = "apibench runs a resolved benchmark plan against a system under test.\n\nA plan lists warmup and run phases (iteration- or duration-bounded, with a concurrency and an optional bytes/sec target), the HTTP operation behind each role, guardrails and thresholds. Every request becomes an event; run events are aggregated into per-role latency, availability and throughput figures and checked against the thresholds.",
    after_help = "Examples:\n  apibench validate plans/timeseries.yaml\n  apibench run plans/timeseries.yaml --base-url http://127.0.0.1:8086\n  apibench run plans/timeseries.yaml --output json --report-out out/report.json\n\nExit codes: 0 ok, 11 thresholds failed, 30 invalid input, 40 runtime error."
)]
pub struct Cli {
    /// Log filter for stderr diagnostics (e.g. info, apibench_core=debug); overrides RUST_LOG
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a benchmark plan against the system under test
    #[command(
        long_about = "Validate the plan, run its phases in order and print the report.\n\nThe exit code reflects the verdict: 0 when every threshold passed, 11 when one failed."
    )]
    Run(RunArgs),

    /// Validate a plan document without sending any traffic
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the plan document (.yaml, .yml or .json)
    pub plan: PathBuf,

    /// Base URL operations are resolved against
    #[arg(long, env = "SUT_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the plan document (.yaml, .yml or .json)
    pub plan: PathBuf,

    /// Base URL of the system under test
    #[arg(long, env = "SUT_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Bearer token sent as `Authorization: Bearer <TOKEN>`
    #[arg(long, env = "SUT_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Default per-request timeout (e.g. 10s, 500ms)
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub timeout: Duration,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Also write the JSON report to this path (parent directories are created)
    #[arg(long, value_name = "PATH")]
    pub report_out: Option<PathBuf>,

    /// Number of raw events kept in the report
    #[arg(long, default_value_t = apibench_core::DEFAULT_EVENTS_SAMPLE)]
    pub events_sample: usize,
}
