//! Progress display utilities for CLI output
//!
//! Key features:
//! - A scan spinner that suspends cleanly when logging
//! - Byte formatting shared by the summaries
//! - A writer that tees log output to the console and a file

use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

// ============================================================================
// Styles
// ============================================================================

/// Get the spinner style for scanning operations
fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⣾⣽⣻⢿⡿⣟⣯⣷")
}

// ============================================================================
// Console output helpers
// ============================================================================

/// Print a header section with a box
pub fn print_header(title: &str) {
    let width = 68;
    let title_padded = format!("{:^width$}", title, width = width - 4);
    println!();
    println!("╔{}╗", "═".repeat(width - 2));
    println!("║{}║", title_padded);
    println!("╚{}╝", "═".repeat(width - 2));
    println!();
}

/// Print an info message with bullet
pub fn print_info(msg: &str) {
    println!("  • {}", msg);
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    println!("  ⚠ {}", msg);
}

// ============================================================================
// Progress tracker for scans
// ============================================================================

/// Counters for a directory scan, shown on a spinner
pub struct ScanProgress {
    spinner: ProgressBar,
    start_time: Instant,
    files_seen: AtomicUsize,
    files_added: AtomicUsize,
    files_known: AtomicUsize,
    errors: AtomicUsize,
    bytes_added: AtomicU64,
}

/// Final counts of a scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files_seen: usize,
    pub files_added: usize,
    pub files_known: usize,
    pub errors: usize,
    pub bytes_added: u64,
}

impl ScanProgress {
    /// Create a new scan progress tracker
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(spinner_style());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner.set_message("Scanning...");
        Self::with_bar(spinner)
    }

    /// A tracker that draws nothing, for silent runs
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(spinner: ProgressBar) -> Self {
        Self {
            spinner,
            start_time: Instant::now(),
            files_seen: AtomicUsize::new(0),
            files_added: AtomicUsize::new(0),
            files_known: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            bytes_added: AtomicU64::new(0),
        }
    }

    pub fn file_known(&self) {
        self.files_seen.fetch_add(1, Ordering::Relaxed);
        self.files_known.fetch_add(1, Ordering::Relaxed);
        self.update_message();
    }

    pub fn file_added(&self, bytes: u64) {
        self.files_seen.fetch_add(1, Ordering::Relaxed);
        self.files_added.fetch_add(1, Ordering::Relaxed);
        self.bytes_added.fetch_add(bytes, Ordering::Relaxed);
        self.update_message();
    }

    pub fn file_failed(&self) {
        self.files_seen.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.update_message();
    }

    fn update_message(&self) {
        let summary = self.summary();
        self.spinner.set_message(format!(
            "Scanning: {} files, {} new ({}), {} known, {} errors",
            summary.files_seen,
            summary.files_added,
            format_bytes(summary.bytes_added),
            summary.files_known,
            summary.errors
        ));
    }

    /// Run `f` with the spinner cleared so log lines stay readable
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.spinner.suspend(f)
    }

    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            files_seen: self.files_seen.load(Ordering::Relaxed),
            files_added: self.files_added.load(Ordering::Relaxed),
            files_known: self.files_known.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_added: self.bytes_added.load(Ordering::Relaxed),
        }
    }

    /// Finish the progress display with a summary
    pub fn finish(&self) -> ScanSummary {
        let summary = self.summary();
        self.spinner.finish_with_message(format!(
            "✓ Scanned {} files: {} new, {} known, {} errors ({:.1}s)",
            summary.files_seen,
            summary.files_added,
            summary.files_known,
            summary.errors,
            self.start_time.elapsed().as_secs_f64()
        ));
        summary
    }

    /// Finish with an error message
    pub fn finish_with_error(&self, msg: &str) {
        self.spinner.finish_with_message(format!("✗ {}", msg));
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Format bytes into human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

// ============================================================================
// Log tee
// ============================================================================

/// Writes log output to both stderr and a log file
pub struct DualWriter {
    pub console: std::io::Stderr,
    pub file: std::fs::File,
}

impl Write for DualWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = self.console.write(buf);
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let _ = self.console.flush();
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 bytes");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_scan_counters() {
        let progress = ScanProgress::hidden();
        progress.file_added(100);
        progress.file_added(50);
        progress.file_known();
        progress.file_failed();

        let summary = progress.finish();
        assert_eq!(
            summary,
            ScanSummary {
                files_seen: 4,
                files_added: 2,
                files_known: 1,
                errors: 1,
                bytes_added: 150,
            }
        );
    }
}
