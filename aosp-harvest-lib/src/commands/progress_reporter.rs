use crate::crawl::Progress;
use core::fmt::{Debug, Formatter};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;

type ProgressCallback = Box<dyn Fn() -> (u64, u64, String) + Send + Sync>;

/// Refresh rate for progress updates (10 Hz).
const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

const BAR_WIDTH: usize = 25;

/// Frames of a `===>` marker sweeping right, then a `<===` marker sweeping back.
static SPINNER_FRAMES: LazyLock<Vec<String>> = LazyLock::new(|| {
    let sweep = 0..=BAR_WIDTH + 3;
    let right = sweep.clone().map(|step| place("===>", step.cast_signed() - 3));
    let left = sweep.map(|step| place("<===", BAR_WIDTH.cast_signed() - 1 - step.cast_signed()));
    right.chain(left).collect()
});

/// Render `marker` starting at column `start`, clipped to the bar.
fn place(marker: &str, start: isize) -> String {
    (0..BAR_WIDTH.cast_signed())
        .map(|column| {
            usize::try_from(column - start)
                .ok()
                .and_then(|offset| marker.chars().nth(offset))
                .unwrap_or(' ')
        })
        .collect()
}

struct DisplayState {
    show_at: Instant,
    shown: AtomicBool,
    spinning: AtomicBool,
    phase_started: Mutex<Instant>,
}

/// A stderr progress bar that only appears once an operation has run for a while.
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
    state: Arc<DisplayState>,
    callback: Arc<Mutex<ProgressCallback>>,
    refresher: Arc<JoinHandle<()>>,
    use_colors: bool,
}

impl ProgressReporter {
    /// Create a reporter that stays hidden for `delay`.
    #[must_use]
    pub fn new(delay: Duration, use_colors: bool) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden());

        let state = Arc::new(DisplayState {
            show_at: Instant::now() + delay,
            shown: AtomicBool::new(false),
            spinning: AtomicBool::new(false),
            phase_started: Mutex::new(Instant::now()),
        });

        let callback = Arc::new(Mutex::new(Box::new(|| (0u64, 0u64, String::new())) as ProgressCallback));

        Self {
            refresher: Arc::new(tokio::spawn(refresh(bar.clone(), Arc::clone(&state), Arc::clone(&callback)))),
            bar,
            state,
            callback,
            use_colors,
        }
    }

    fn template(&self, body: &str) -> String {
        let prefix = if self.use_colors { "{prefix:>12.bold.cyan}" } else { "{prefix:>12}" };
        format!("{prefix} [{body}] {{msg}}")
    }
}

impl Progress for ProgressReporter {
    fn set_phase(&self, phase: &str) {
        self.bar.set_prefix(phase.to_owned());
        *self.state.phase_started.lock().expect("lock poisoned") = Instant::now();
    }

    fn set_determinate(&self, callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>) {
        *self.callback.lock().expect("lock poisoned") = callback;
        self.state.spinning.store(false, Ordering::Relaxed);
        self.bar.disable_steady_tick();
        self.bar.set_length(0);
        self.bar.set_position(0);
        self.bar.set_style(
            ProgressStyle::default_bar()
                .template(&self.template("{bar:25}"))
                .expect("could not create progress bar style")
                .progress_chars("=> "),
        );
    }

    fn set_indeterminate(&self, callback: Box<dyn Fn() -> String + Send + Sync + 'static>) {
        *self.callback.lock().expect("lock poisoned") = Box::new(move || (0, 0, callback()));
        *self.state.phase_started.lock().expect("lock poisoned") = Instant::now();
        self.state.spinning.store(true, Ordering::Relaxed);
        self.bar.enable_steady_tick(REFRESH_INTERVAL);

        let frames: Vec<&str> = SPINNER_FRAMES.iter().map(String::as_str).collect();
        self.bar.set_style(
            ProgressStyle::default_spinner()
                .template(&self.template("{spinner}"))
                .expect("could not create progress bar style")
                .tick_strings(&frames),
        );
    }

    fn println(&self, msg: &str) {
        self.bar.suspend(|| eprintln!("{msg}"));
    }

    fn done(&self) {
        self.refresher.abort();
        if self.state.shown.load(Ordering::Relaxed) {
            self.bar.finish_and_clear();
        }
    }

    fn use_colors(&self) -> bool {
        self.use_colors
    }
}

impl Debug for ProgressReporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("shown", &self.state.shown.load(Ordering::Relaxed))
            .field("spinning", &self.state.spinning.load(Ordering::Relaxed))
            .field("use_colors", &self.use_colors)
            .finish_non_exhaustive()
    }
}

/// Redraws the bar from the current callback until aborted.
async fn refresh(bar: ProgressBar, state: Arc<DisplayState>, callback: Arc<Mutex<ProgressCallback>>) {
    let mut interval = tokio::time::interval(REFRESH_INTERVAL);
    #[expect(clippy::infinite_loop, reason = "task runs until aborted")]
    loop {
        let _ = interval.tick().await;

        if !state.shown.load(Ordering::Relaxed) {
            if Instant::now() < state.show_at {
                continue;
            }
            state.shown.store(true, Ordering::Relaxed);
            bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        }

        let (length, position, mut message) = {
            let callback = callback.lock().expect("lock poisoned");
            callback()
        };

        if state.spinning.load(Ordering::Relaxed) {
            let elapsed = state.phase_started.lock().expect("lock poisoned").elapsed().as_secs();
            message = format!("{elapsed}s: {message}");
        }

        if length > 0 {
            bar.set_length(length);
            bar.set_position(position);
        }
        bar.set_message(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_frames_have_constant_width() {
        assert!(!SPINNER_FRAMES.is_empty());
        assert!(SPINNER_FRAMES.iter().all(|frame| frame.chars().count() == BAR_WIDTH));
        assert!(SPINNER_FRAMES.iter().any(|frame| frame.contains("===>")));
        assert!(SPINNER_FRAMES.iter().any(|frame| frame.contains("<===")));
    }

    #[tokio::test]
    async fn hidden_reporter_accepts_updates() {
        let reporter = ProgressReporter::new(Duration::from_secs(3600), false);
        reporter.set_phase("Crawling");
        reporter.set_determinate(Box::new(|| (10, 3, "3/10".to_owned())));
        reporter.set_indeterminate(Box::new(|| "working".to_owned()));
        reporter.println("line");
        reporter.done();
        assert!(!reporter.use_colors());
    }
}
