//! Utilities module for logging, metrics, and helper functions
//!
//! This module provides:
//! - Error handling types
//! - Structured logging with tracing
//! - Segmentation IoU metrics
//! - Grid rendering and the metrics sink
//! - Run directory and parameter report helpers

pub mod error;
pub mod logging;
pub mod metrics;
pub mod report;
pub mod run_dir;
pub mod summary;
pub mod visualization;

// Re-export main types for convenience
pub use error::{Result, SegError};
pub use logging::init_logging;
pub use metrics::{get_iou, IouResult};
pub use summary::{FileSummaryWriter, MemorySink, MetricsSink};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Format a number with thousands separator
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(42), "42");
    }
}
