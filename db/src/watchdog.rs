//! Watchdog (spec.md §4.7): a cooperative monitor that logs elapsed time at
//! doubling intervals (1s, 2s, 4s, ...) for the life of a long-running
//! `SaveEvent`/`QueryEvents` call, and stops promptly on completion.
//!
//! Grounded on original_source/save.go's per-operation goroutine with a
//! doubling `time.Sleep` loop; reimplemented here as a dedicated thread
//! parked on a condvar so cancellation (`Drop`) is immediate rather than
//! waiting out the current sleep.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub struct Watchdog {
    state: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Starts logging `"{operation} for {subject} has been running for
    /// {elapsed}"` at doubling intervals. The watchdog stops as soon as the
    /// returned guard is dropped.
    pub fn start(operation: &'static str, subject: String) -> Self {
        let state = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_state = state.clone();
        let started = Instant::now();

        let handle = thread::spawn(move || {
            let (lock, cvar) = &*thread_state;
            let mut interval = Duration::from_secs(1);
            let mut done = lock.lock().unwrap();
            loop {
                let (guard, result) = cvar.wait_timeout(done, interval).unwrap();
                done = guard;
                if *done {
                    break;
                }
                if result.timed_out() {
                    tracing::info!(
                        "{operation} for {subject} has been running for {:?}",
                        started.elapsed()
                    );
                    interval *= 2;
                }
            }
        });

        Self {
            state,
            handle: Some(handle),
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        {
            let (lock, cvar) = &*self.state;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_promptly_on_drop() {
        let watchdog = Watchdog::start("Test", "subject".into());
        drop(watchdog);
        // If the thread failed to join promptly this test would hang.
    }
}
