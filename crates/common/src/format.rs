//! Human-readable byte size formatting

const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Format a byte count as `<value> <unit>` with base-1024 scaling and
/// at most one decimal place. A trailing `.0` is dropped, so whole
/// values render without a fraction: `10 -> "10 B"`, `1536 -> "1.5 KB"`.
/// Counts at or beyond 1024^4 stay in GB.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut unit = 0usize;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{} {}", rounded as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", rounded, UNITS[unit])
    }
}
