//! WASM utility functions.

/// Set panic hook for better error messages in development.
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Binary size units, largest first.
const SIZE_UNITS: [(&str, usize); 3] = [("GiB", 1 << 30), ("MiB", 1 << 20), ("KiB", 1 << 10)];

/// Byte count for log lines, e.g. `12.0 MiB`. Counts under 1 KiB stay exact.
pub fn format_bytes(bytes: usize) -> String {
    SIZE_UNITS
        .iter()
        .find(|(_, size)| bytes >= *size)
        .map(|(unit, size)| format!("{:.1} {unit}", bytes as f64 / *size as f64))
        .unwrap_or_else(|| format!("{bytes} B"))
}

/// Elapsed milliseconds for log lines: `840 ms`, `2.5 s` or `2 min 05 s`.
pub fn format_duration_ms(ms: f64) -> String {
    let whole = ms.max(0.0).round() as u64;
    match whole {
        0..=999 => format!("{whole} ms"),
        1_000..=59_999 => format!("{:.1} s", ms / 1000.0),
        _ => format!("{} min {:02} s", whole / 60_000, (whole % 60_000) / 1000),
    }
}

/// Join a script base and a file name, inserting a slash when needed.
pub fn join_url(base: &str, file: &str) -> String {
    if base.is_empty() || base.ends_with('/') {
        format!("{base}{file}")
    } else {
        format!("{base}/{file}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_picks_largest_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(12 * 1024 * 1024), "12.0 MiB");
        assert_eq!(format_bytes(3 << 30), "3.0 GiB");
    }

    #[test]
    fn test_format_duration_ms_ranges() {
        assert_eq!(format_duration_ms(12.4), "12 ms");
        assert_eq!(format_duration_ms(2500.0), "2.5 s");
        assert_eq!(format_duration_ms(125_000.0), "2 min 05 s");
        assert_eq!(format_duration_ms(-3.0), "0 ms");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("../dist-st/", "ffmpeg-core.st.js"), "../dist-st/ffmpeg-core.st.js");
        assert_eq!(join_url("../dist", "ffmpeg-core.st.js"), "../dist/ffmpeg-core.st.js");
        assert_eq!(join_url("", "ffmpeg.js"), "ffmpeg.js");
    }
}
