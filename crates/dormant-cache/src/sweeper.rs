//! Background idle sweeper.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the running sweeper thread.
///
/// Stops and joins the thread when dropped.
pub struct SweeperHandle {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Run `tick` every `interval` on a background thread until it returns
    /// `false` or the handle is stopped.
    pub(crate) fn spawn<F>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        info!(interval_ms = interval.as_millis() as u64, "Started session sweeper");

        let handle = std::thread::spawn(move || {
            loop {
                let deadline = Instant::now().checked_add(interval);
                {
                    let mut stopped = thread_signal.stopped.lock();
                    while !*stopped {
                        match deadline {
                            Some(deadline) if Instant::now() >= deadline => break,
                            Some(deadline) => {
                                thread_signal.wake.wait_until(&mut stopped, deadline);
                            }
                            // Interval past the clock's range: sleep until stopped
                            None => thread_signal.wake.wait(&mut stopped),
                        }
                    }
                    if *stopped {
                        break;
                    }
                }

                if !tick() {
                    debug!("Cache dropped, sweeper exiting");
                    break;
                }
            }

            info!("Session sweeper thread exiting");
        });

        Self {
            signal,
            handle: Some(handle),
        }
    }

    /// Check if the sweeper thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the sweeper and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let sweeper = SweeperHandle::spawn(Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(sweeper.is_running());
        sweeper.stop();

        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 3);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_exits_when_tick_declines() {
        let sweeper = SweeperHandle::spawn(Duration::from_millis(1), || false);

        let deadline = Instant::now() + Duration::from_secs(5);
        while sweeper.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!sweeper.is_running());
    }

    #[test]
    fn test_stop_does_not_wait_for_interval() {
        let sweeper = SweeperHandle::spawn(Duration::from_secs(3600), || true);
        let started = Instant::now();
        drop(sweeper);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_unbounded_interval_sleeps_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let sweeper = SweeperHandle::spawn(Duration::MAX, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        std::thread::sleep(Duration::from_millis(30));
        assert!(sweeper.is_running());
        sweeper.stop();
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
