//! Small formatting helpers shared by the library and the CLI

/// Format a byte count as a human-readable size
///
/// # Examples
///
/// ```rust
/// use diagrelay::utils::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(10 * 1024), "10.00 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Shorten a remote target for terminal output, keeping its tail
///
/// The tail holds the pod and file name, which is what an operator scans for.
pub fn shorten_target(target: &str, max_chars: usize) -> String {
    let count = target.chars().count();
    if count <= max_chars {
        return target.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let tail: String = target.chars().skip(count - keep).collect();
    format!("...{}", tail)
}
