/// Source names and defaults shared by the registry, loaders and configuration.

// Source names (used in CLI output, config files and issue reports)
pub const WAHOO: &str = "wahoo";
pub const TRAINRED: &str = "trainred";
pub const TYMEWEAR: &str = "tymewear";
pub const GARMIN: &str = "garmin";

// Load order; lower loads first
pub const WAHOO_PRIORITY: i32 = 1;
pub const TRAINRED_PRIORITY: i32 = 10;
pub const TYMEWEAR_PRIORITY: i32 = 20;
pub const GARMIN_PRIORITY: i32 = 30;

pub const DEFAULT_GAP_THRESHOLD: usize = 10;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;
pub const DEFAULT_HEADER_SCAN_MAX_LINES: usize = 60;
pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_LEADING_TRIM_LIMIT: usize = 30;
pub const DEFAULT_MAX_INVALID_FRACTION: f64 = 0.05;
pub const DEFAULT_RATE_TOLERANCE: f64 = 0.2;

pub const DEFAULT_INPUT_DIR: &str = "input";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_LOG_DIR: &str = "logs";

pub const OUTPUT_FILE_PREFIX: &str = "Trening";
pub const OUTPUT_FILE_SUFFIX: &str = "import.csv";

/// Marker column that separates Garmin stream exports from Wahoo ones.
pub const GARMIN_MARKER_COLUMN: &str = "hrv";

/// Diagnostic column added when high-frequency data is bucketed to 1 Hz.
pub const SAMPLES_PER_SECOND_COLUMN: &str = "samples_per_second";
pub const SECOND_COLUMN: &str = "second";

/// Get all built-in source names in load order
pub fn get_supported_sources() -> Vec<&'static str> {
    vec![WAHOO, TRAINRED, TYMEWEAR, GARMIN]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priorities_follow_source_order() {
        let priorities = [WAHOO_PRIORITY, TRAINRED_PRIORITY, TYMEWEAR_PRIORITY, GARMIN_PRIORITY];
        assert!(priorities.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(get_supported_sources(), vec![WAHOO, TRAINRED, TYMEWEAR, GARMIN]);
    }
}
