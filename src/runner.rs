//! Runs one network attempt as a supervised background task with a deadline
//! and progress feedback.

use std::future::Future;
use std::io::{IsTerminal, Write};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

const TICK: Duration = Duration::from_millis(100);
const FRAMES: [char; 4] = ['-', '\\', '|', '/'];

/// Observer notified while a task is in flight.
pub trait Progress: Send {
    fn tick(&mut self, elapsed: Duration);
    fn finish(&mut self);
}

/// Progress sink that does nothing; used whenever stderr is not a terminal.
pub struct Silent;

impl Progress for Silent {
    fn tick(&mut self, _elapsed: Duration) {}
    fn finish(&mut self) {}
}

/// ASCII spinner on stderr. Stays silent unless stderr is a terminal so piped
/// output is never polluted.
pub struct Spinner {
    message: String,
    frame: usize,
    enabled: bool,
    drawn: bool,
}

impl Spinner {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            frame: 0,
            enabled: std::io::stderr().is_terminal(),
            drawn: false,
        }
    }
}

impl Progress for Spinner {
    fn tick(&mut self, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r{} {} {:.0}s ", self.message, FRAMES[self.frame], elapsed.as_secs_f64());
        let _ = err.flush();
        self.frame = (self.frame + 1) % FRAMES.len();
        self.drawn = true;
    }

    fn finish(&mut self) {
        if !self.drawn {
            return;
        }
        let _ = erase_line(&mut std::io::stderr().lock());
        self.drawn = false;
    }
}

/// Erase whatever progress line is drawn on stderr. No-op when stderr is not
/// a terminal.
pub fn clear_progress_line() {
    let err = std::io::stderr();
    if err.is_terminal() {
        let _ = erase_line(&mut err.lock());
    }
}

fn erase_line(out: &mut impl Write) -> std::io::Result<()> {
    out.write_all(b"\r\x1b[2K")?;
    out.flush()
}

/// Why a supervised task produced no result of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    TimedOut(Duration),
    Panicked(String),
}

/// Spawn `work`, tick `progress` until it finishes, and abandon it once
/// `timeout` passes. Aborting the task drops its in-flight request, which
/// closes the connection.
pub async fn run<F, T>(work: F, timeout: Duration, progress: &mut dyn Progress) -> Result<T, TaskFailure>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let started = Instant::now();
    let mut handle = tokio::spawn(work);
    let deadline = tokio::time::sleep_until(started + timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let outcome = loop {
        tokio::select! {
            joined = &mut handle => {
                break joined.map_err(|e| TaskFailure::Panicked(e.to_string()));
            }
            _ = &mut deadline => {
                handle.abort();
                break Err(TaskFailure::TimedOut(timeout));
            }
            _ = ticker.tick() => progress.tick(started.elapsed()),
        }
    };
    progress.finish();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Recorder {
        ticks: usize,
        finished: bool,
    }

    impl Progress for Recorder {
        fn tick(&mut self, _elapsed: Duration) {
            self.ticks += 1;
        }
        fn finish(&mut self) {
            self.finished = true;
        }
    }

    #[tokio::test]
    async fn returns_work_output_and_reports_progress() {
        let mut rec = Recorder::default();
        let out = run(
            async {
                tokio::time::sleep(Duration::from_millis(250)).await;
                42
            },
            Duration::from_secs(5),
            &mut rec,
        )
        .await;
        assert_eq!(out, Ok(42));
        assert!(rec.ticks >= 2, "ticks: {}", rec.ticks);
        assert!(rec.finished);
    }

    #[tokio::test]
    async fn timeout_abandons_the_task() {
        let completed = Arc::new(AtomicBool::new(false));
        let flag = completed.clone();
        let mut rec = Recorder::default();
        let started = std::time::Instant::now();
        let out = run(
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                flag.store(true, Ordering::SeqCst);
            },
            Duration::from_millis(50),
            &mut rec,
        )
        .await;
        assert_eq!(out, Err(TaskFailure::TimedOut(Duration::from_millis(50))));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(rec.finished);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_work_is_reported() {
        let out: Result<(), _> = run(async { panic!("boom") }, Duration::from_secs(1), &mut Silent).await;
        assert!(matches!(out, Err(TaskFailure::Panicked(_))));
    }

    #[test]
    fn silent_spinner_never_draws() {
        let mut spinner = Spinner { message: "x".into(), frame: 0, enabled: false, drawn: false };
        spinner.tick(Duration::from_secs(1));
        spinner.finish();
        assert!(!spinner.drawn);
        assert_eq!(spinner.frame, 0);
    }

    #[test]
    fn erase_returns_to_column_zero_and_clears() {
        let mut out = Vec::new();
        erase_line(&mut out).unwrap();
        assert_eq!(out, b"\r\x1b[2K");
    }
}
