use std::time::Duration;

use apibench_core::PhaseMode;

pub(crate) fn format_bytes(b: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    if b >= GIB {
        return format!("{:.2}GiB", (b as f64) / (GIB as f64));
    }
    if b >= MIB {
        return format!("{:.2}MiB", (b as f64) / (MIB as f64));
    }
    if b >= KIB {
        return format!("{:.2}KiB", (b as f64) / (KIB as f64));
    }

    format!("{b}B")
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

pub(crate) fn format_ms_opt(v: Option<f64>) -> String {
    match v {
        Some(ms) if ms >= 1000.0 => format!("{:.2}s", ms / 1000.0),
        Some(ms) if ms >= 1.0 => format!("{ms:.2}ms"),
        Some(ms) => format!("{:.0}us", ms * 1000.0),
        None => "-".to_string(),
    }
}

/// Single rounded component: `us`, `ms` or `s`.
pub(crate) fn format_duration(d: Duration) -> String {
    let total_us = d.as_micros();

    if total_us >= 1_000_000 {
        return format!("{}s", (total_us + 500_000) / 1_000_000);
    }
    if total_us >= 1_000 {
        return format!("{}ms", (total_us + 500) / 1_000);
    }
    format!("{total_us}us")
}

pub(crate) fn format_mode(mode: &PhaseMode) -> String {
    match mode {
        PhaseMode::Iterations(n) => format!("iterations={n}"),
        PhaseMode::DurationMs(ms) => {
            format!("duration={}", format_duration(Duration::from_millis(*ms)))
        }
    }
}

pub(crate) fn format_target(target_bytes_per_second: u64) -> String {
    if target_bytes_per_second == 0 {
        "unthrottled".to_string()
    } else {
        format!("{}/s", format_bytes(target_bytes_per_second))
    }
}
