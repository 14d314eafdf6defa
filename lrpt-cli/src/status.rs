//! Live status line for a running session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use lrpt_core::SessionStatus;

/// Progress bar over the operation window showing the PLL state,
/// signal quality and frame counters.
pub struct StatusReporter {
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StatusReporter {
    pub fn spawn(status: Arc<SessionStatus>, operation_secs: u64) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let done_flag = Arc::clone(&done);

        let handle = std::thread::spawn(move || {
            let bar = ProgressBar::new(operation_secs);
            bar.set_style(
                ProgressStyle::with_template(
                    "{elapsed_precise} [{bar:32}] {pos}/{len}s {msg}",
                )
                .expect("valid template")
                .progress_chars("=>-"),
            );

            let started = std::time::Instant::now();
            while !done_flag.load(Ordering::Relaxed) {
                let elapsed = started.elapsed().as_secs().min(operation_secs);
                bar.set_position(elapsed);
                bar.set_message(format!(
                    "PLL {} | level {:.0} | quality {:.0}% | frames {}/{} | packets {}",
                    if status.pll_locked.load(Ordering::Relaxed) {
                        "locked"
                    } else {
                        "search"
                    },
                    status.signal_level.load(Ordering::Relaxed),
                    status.signal_quality.load(Ordering::Relaxed),
                    status.frames_ok.load(Ordering::Relaxed),
                    status.frames_total.load(Ordering::Relaxed),
                    status.packets.load(Ordering::Relaxed),
                ));
                std::thread::sleep(Duration::from_millis(500));
            }
            bar.finish_and_clear();
        });

        Self {
            done,
            handle: Some(handle),
        }
    }

    pub fn finish(mut self) {
        self.done.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
