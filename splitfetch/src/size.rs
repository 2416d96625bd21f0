//! Human-readable byte sizes.

/// Binary unit prefixes, in ascending order.
const UNITS: [&str; 8] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"];

/// Format a size in bytes using binary units, e.g. `25.0MiB`.
pub fn format_size(bytes: u64) -> String {
    format_scaled(bytes as f64, "B")
}

/// Format a rate in bytes per second, e.g. `1.5MiB/s`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    format_scaled(bytes_per_sec, "B/s")
}

fn format_scaled(mut value: f64, suffix: &str) -> String {
    for unit in UNITS {
        if value.abs() < 1024.0 {
            return format!("{:3.1}{}{}", value, unit, suffix);
        }
        value /= 1024.0;
    }
    format!("{:.1}Yi{}", value, suffix)
}

/// Parse a byte size such as `1048576`, `512KiB`, `10MiB`, `10MB` or `1g`.
///
/// Both binary (`KiB`) and decimal-looking (`KB`, `K`) suffixes are read as
/// powers of 1024. Returns `None` for empty, malformed or overflowing input.
pub fn parse_size(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);
    if digits.is_empty() {
        return None;
    }
    let value: u64 = digits.parse().ok()?;

    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        _ => return None,
    };

    value.checked_mul(multiplier)
}
