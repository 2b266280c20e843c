//! Total-items notifier
//!
//! Hosts show the number of stored entries somewhere (an icon badge, a
//! status line). The store calls the notifier after every committed order
//! change and does not wait for or check the result.

use tracing::debug;

/// Receives the new total entry count
pub trait BadgeNotifier: Send + Sync {
    fn update_total_items(&self, count: usize);
}

/// Default notifier: records the count in the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBadge;

impl BadgeNotifier for LogBadge {
    fn update_total_items(&self, count: usize) {
        debug!(count, "Total items updated");
    }
}

impl<F> BadgeNotifier for F
where
    F: Fn(usize) + Send + Sync,
{
    fn update_total_items(&self, count: usize) {
        self(count)
    }
}
