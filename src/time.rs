//! Timers usable from both the page/worker event loop and native builds.

use futures_util::future::{select, Either};
use std::future::Future;
use std::pin::pin;
use std::time::Duration;

/// The deadline passed before the future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

/// Resolves after `duration`.
#[cfg(target_arch = "wasm32")]
pub async fn sleep(duration: Duration) {
    use wasm_bindgen::prelude::*;

    #[wasm_bindgen]
    extern "C" {
        #[wasm_bindgen(js_name = setTimeout)]
        fn set_timeout(closure: &Closure<dyn FnMut()>, millis: u32) -> i32;
        #[wasm_bindgen(js_name = clearTimeout)]
        fn clear_timeout(handle: i32);
    }

    /// Cancels the pending timer when the sleep is dropped early, e.g. when
    /// it loses a `timeout` race, so the callback never outlives its closure.
    struct Timer {
        handle: i32,
        _closure: Closure<dyn FnMut()>,
    }

    impl Drop for Timer {
        fn drop(&mut self) {
            clear_timeout(self.handle);
        }
    }

    let (tx, rx) = futures_channel::oneshot::channel::<()>();
    let closure = Closure::once(move || {
        let _ = tx.send(());
    });
    let millis = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
    let _timer = Timer {
        handle: set_timeout(&closure, millis),
        _closure: closure,
    };
    let _ = rx.await;
}

/// Resolves after `duration`.
///
/// Backed by a timer thread that exits shortly after the sleep is dropped.
#[cfg(not(target_arch = "wasm32"))]
pub async fn sleep(duration: Duration) {
    let (rx, _thread) = start_timer(duration);
    let _ = rx.await;
}

/// Granularity at which a native timer notices its sleeper is gone.
#[cfg(not(target_arch = "wasm32"))]
const TIMER_TICK: Duration = Duration::from_millis(10);

#[cfg(not(target_arch = "wasm32"))]
fn start_timer(
    duration: Duration,
) -> (
    futures_channel::oneshot::Receiver<()>,
    std::thread::JoinHandle<()>,
) {
    let (tx, rx) = futures_channel::oneshot::channel::<()>();
    let thread = std::thread::spawn(move || {
        let deadline = web_time::Instant::now() + duration;
        loop {
            if tx.is_canceled() {
                return;
            }
            let remaining = deadline.saturating_duration_since(web_time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(TIMER_TICK));
        }
        let _ = tx.send(());
    });
    (rx, thread)
}

/// Runs `future` to completion unless `duration` passes first.
pub async fn timeout<F: Future>(duration: Duration, future: F) -> Result<F::Output, Elapsed> {
    let future = pin!(future);
    let delay = pin!(sleep(duration));

    match select(future, delay).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(_) => Err(Elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::pending;

    #[test]
    fn test_timeout_passes_through_ready_futures() {
        let result = pollster::block_on(timeout(Duration::from_secs(5), async { 7 }));
        assert_eq!(result, Ok(7));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_timer_thread_exits_when_sleeper_drops() {
        let (rx, thread) = start_timer(Duration::from_secs(60));
        let started = web_time::Instant::now();
        drop(rx);
        thread.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_expires() {
        let result = pollster::block_on(timeout(Duration::from_millis(20), pending::<()>()));
        assert_eq!(result, Err(Elapsed));
    }
}
