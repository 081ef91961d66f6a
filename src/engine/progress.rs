//! Progress counter for on-demand scans

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

use crate::IngestStats;

pub type ProgressBar = Arc<Mutex<Bar>>;

/// Create a counter for unknown total (shows count without percentage)
pub fn create_counter(desc: &'static str) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = 0,
        desc = desc,
        animation = Animation::Classic,
        position = 0,
        unit = " files"
    )))
}

/// Force a refresh of the bar (e.g. so counter shows "0 files" immediately).
pub fn refresh_bar(pb: &ProgressBar) {
    if let Ok(mut bar) = pb.try_lock() {
        let _ = bar.refresh();
    }
}

/// Advance the bar by `n`. Skips the update if the lock is contended.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) {
    if let Ok(mut bar) = pb.try_lock() {
        let _ = bar.update(n);
    }
}

/// Batch observer that moves the counter to the running file total.
pub fn on_batch_callback(pb: &ProgressBar) -> impl FnMut(&IngestStats) + use<> {
    let bar = Arc::clone(pb);
    let mut shown = 0_usize;
    move |stats: &IngestStats| {
        update_progress_bar(&bar, stats.files.saturating_sub(shown));
        shown = stats.files;
    }
}
