//! Display helpers for sizes and savings.

const KB: f64 = 1_000.0;
const MB: f64 = 1_000_000.0;
const GB: f64 = 1_000_000_000.0;

/// Render a byte count in KB, MB or GB using decimal (file) units.
pub fn format_bytes(bytes: u64) -> String {
    let value = bytes as f64;
    if value >= GB {
        format!("{:.2} GB", value / GB)
    } else if value >= MB {
        format!("{:.1} MB", value / MB)
    } else {
        format!("{:.0} KB", value / KB)
    }
}

/// Render savings as a percentage of the original size.
pub fn format_savings(savings: i64, original_size: u64) -> String {
    if original_size == 0 {
        return "0%".to_string();
    }
    format!("{:.1}%", savings as f64 / original_size as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(0), "0 KB");
        assert_eq!(format_bytes(512_000), "512 KB");
        assert_eq!(format_bytes(1_500_000), "1.5 MB");
        assert_eq!(format_bytes(2_346_000_000), "2.35 GB");
    }

    #[test]
    fn test_format_savings() {
        assert_eq!(format_savings(0, 0), "0%");
        assert_eq!(format_savings(250, 1_000), "25.0%");
        assert_eq!(format_savings(-500, 1_000), "-50.0%");
    }
}
