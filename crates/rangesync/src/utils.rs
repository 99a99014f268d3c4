//! Utility functions
/// transform bytes into a human readable format, using binary units.
pub fn format_bytes(n: u64) -> String {
    let units = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    let delimiter = 1024_f64;

    if n < 1024 {
        return format!("{n} B");
    }

    let mut n = n as f64;
    let mut u = 0;

    while n >= delimiter && u < units.len() - 1 {
        n /= delimiter;
        u += 1;
    }

    format!("{:.2} {}", n, units[u])
}
