use std::io::Write;
use std::sync::Arc;

use crate::transport::ProgressFn;

const BAR_CELLS: usize = 50;

/// Snapshot of a running upload, handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    /// Completion in the range 0.0..=1.0.
    pub fraction: f64,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    pub bytes_per_sec: f64,
}

/// Renders a single-line text bar for a transfer snapshot.
pub fn render_progress_bar(update: &ProgressUpdate) -> String {
    let fraction = update.fraction.clamp(0.0, 1.0);
    let filled = (BAR_CELLS as f64 * fraction) as usize;
    let bar: String = std::iter::repeat_n('█', filled)
        .chain(std::iter::repeat_n('░', BAR_CELLS - filled))
        .collect();
    let transferred_mb = update.transferred_bytes as f64 / (1024.0 * 1024.0);
    let total_mb = update.total_bytes as f64 / (1024.0 * 1024.0);
    let rate_mb = update.bytes_per_sec / (1024.0 * 1024.0);
    format!(
        "[{bar}] {:5.1}%  {transferred_mb:.2}/{total_mb:.2} MB  {rate_mb:.2} MB/s",
        fraction * 100.0
    )
}

/// Progress callback that repaints one stderr line per update and finishes
/// it with a newline once the transfer completes.
pub fn console_reporter() -> ProgressFn {
    Arc::new(|update| {
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r{}", render_progress_bar(&update));
        if update.fraction >= 1.0 {
            let _ = writeln!(err);
        }
        let _ = err.flush();
    })
}
