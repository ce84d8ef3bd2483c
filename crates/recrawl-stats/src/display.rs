use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::stats::Stats;

/// Ticker at 2 Hz re-rendering a multi-line stats block. Cursor-relative
/// overwrite and the non-TTY line-oriented fallback are both handled by
/// `indicatif`'s `ProgressBar`, so this module carries no hand-rolled ANSI
/// escape sequences.
pub struct TerminalDisplay {
    bar: ProgressBar,
    total_work: u64,
}

const TICK: Duration = Duration::from_millis(500);

impl TerminalDisplay {
    /// `total_work` is the known seed count, used for the ETA line and the
    /// progress bar's position; pass `0` when the total is not known ahead
    /// of time (the bar then renders as a spinner).
    pub fn new(total_work: u64) -> Self {
        let bar = if total_work > 0 {
            ProgressBar::new(total_work)
        } else {
            ProgressBar::new_spinner()
        };
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} {elapsed_precise} [{bar:40.cyan/blue}] {pos}/{len} \
                 ({msg})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        Self { bar, total_work }
    }

    fn render(&self, stats: &Stats) {
        let snap = stats.snapshot_with_total(self.total_work);
        let completed = snap.success + snap.failed + snap.timeout + snap.skipped + snap.domain_skipped;
        self.bar.set_position(completed.min(self.total_work.max(completed)));

        let eta = snap
            .eta_secs
            .map(|s| format!("{s:.0}s"))
            .unwrap_or_else(|| "?".to_string());

        self.bar.set_message(format!(
            "ok={} fail={} timeout={} skip={} dskip={} {:.1}/s eta={} dns(live={} dead={} to={}) bytes={}",
            snap.success,
            snap.failed,
            snap.timeout,
            snap.skipped,
            snap.domain_skipped,
            snap.rolling_speed,
            eta,
            snap.dns_live,
            snap.dns_dead,
            snap.dns_timeout,
            snap.bytes,
        ));
    }

    /// Run the 2 Hz render loop until `cancel` fires, then freeze stats and
    /// render once more before returning.
    pub async fn run(self, stats: Arc<Stats>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(TICK) => {
                    self.render(&stats);
                }
                _ = cancel.cancelled() => {
                    break;
                }
            }
        }
        stats.freeze();
        self.render(&stats);
        self.bar.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_renders_then_finishes_on_cancel() {
        let stats = Arc::new(Stats::new());
        stats.record_success(200, "a.com", 100, 10);
        let cancel = CancellationToken::new();
        let display = TerminalDisplay::new(10);

        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(display.run(Arc::clone(&stats), cancel_clone));
        cancel.cancel();
        handle.await.unwrap();

        assert!(stats.snapshot().elapsed >= Duration::from_nanos(0));
    }
}
