//! Rate-limited delivery of update notifications.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Target delivery rate at throttle level 1.
pub const DEFAULT_DELIVERIES_PER_SECOND: f64 = 12.0;

/// Minimum spacing between deliveries for a throttle level.
///
/// Level 0 disables throttling. Level `n >= 1` spaces deliveries by
/// `sqrt(n) / 12` seconds.
pub fn throttle_interval(level: u32) -> Option<Duration> {
    if level == 0 {
        return None;
    }
    Some(Duration::from_secs_f64(
        f64::from(level).sqrt() / DEFAULT_DELIVERIES_PER_SECOND,
    ))
}

/// A value the controller can park as its pending delivery.
///
/// Only parked values are copied. `refresh_from` lets a parked copy catch up
/// with a later state in place, reusing its allocations.
pub trait Snapshot: Sized + Send + 'static {
    /// Owned copy of `self`.
    fn snapshot(&self) -> Self;

    /// Brings `self` up to date with `latest`.
    fn refresh_from(&mut self, latest: &Self) {
        *self = latest.snapshot();
    }
}

type Sink<T> = Box<dyn FnMut(&T) + Send>;

struct DeliveryState<T> {
    sink: Sink<T>,
    last_delivery: Option<Instant>,
    pending: Option<T>,
    /// Last parked value after its delivery, kept for reuse.
    spare: Option<T>,
    timer_armed: bool,
    closed: bool,
}

impl<T: Snapshot> DeliveryState<T> {
    // The sink runs under the state lock, which keeps deliveries ordered
    // between the owner and the timer task.
    fn deliver(&mut self, value: &T) {
        self.last_delivery = Some(Instant::now());
        (self.sink)(value);
    }

    fn park(&mut self, latest: &T) {
        match self.pending.take().or_else(|| self.spare.take()) {
            Some(mut parked) => {
                parked.refresh_from(latest);
                self.pending = Some(parked);
            }
            None => self.pending = Some(latest.snapshot()),
        }
    }

    fn drop_pending(&mut self) {
        if let Some(parked) = self.pending.take() {
            self.spare = Some(parked);
        }
    }
}

fn lock<T>(state: &Mutex<DeliveryState<T>>) -> MutexGuard<'_, DeliveryState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Coalesces bursts of updates so a sink sees at most one delivery per
/// throttle interval.
///
/// Calls that arrive too early park a copy of their value as the single
/// pending delivery (newer values replace it) and arm one timer that
/// delivers it once the interval has passed. `finalize` cancels that timer
/// and always delivers its own value.
///
/// Deferred deliveries run on the timer task, so the sink may be called from
/// a task other than the one calling `decimate`. Deliveries never overlap and
/// keep their order.
pub struct ThrottledDelivery<T: Snapshot> {
    interval: Option<Duration>,
    state: Arc<Mutex<DeliveryState<T>>>,
    timer: Option<JoinHandle<()>>,
}

impl<T: Snapshot> ThrottledDelivery<T> {
    pub fn new(level: u32, sink: impl FnMut(&T) + Send + 'static) -> Self {
        Self {
            interval: throttle_interval(level),
            state: Arc::new(Mutex::new(DeliveryState {
                sink: Box::new(sink),
                last_delivery: None,
                pending: None,
                spare: None,
                timer_armed: false,
                closed: false,
            })),
            timer: None,
        }
    }

    /// Spacing enforced between deliveries, `None` when unthrottled.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Offers a candidate update; it is delivered now, later, or superseded.
    pub fn decimate(&mut self, value: &T) {
        let shared = Arc::clone(&self.state);
        let mut state = lock(&shared);
        if state.closed {
            return;
        }
        let Some(interval) = self.interval else {
            state.deliver(value);
            return;
        };

        let since_last = state.last_delivery.map(|last| last.elapsed());
        match since_last {
            Some(elapsed) if elapsed < interval => {
                state.park(value);
                if !state.timer_armed {
                    self.arm_timer(&mut state, interval, interval - elapsed);
                }
            }
            _ => {
                state.drop_pending();
                state.deliver(value);
            }
        }
    }

    /// Cancels any deferred delivery and delivers `value` synchronously.
    pub fn finalize(mut self, value: &T) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let mut state = lock(&self.state);
        state.closed = true;
        state.pending = None;
        state.spare = None;
        state.deliver(value);
    }

    fn arm_timer(&mut self, state: &mut DeliveryState<T>, interval: Duration, wait: Duration) {
        // Without a runtime the pending value waits for the next due call.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        state.timer_armed = true;
        let shared = Arc::clone(&self.state);
        self.timer = Some(handle.spawn(async move {
            let mut wait = wait;
            loop {
                tokio::time::sleep(wait).await;
                match deliver_pending(&shared, interval) {
                    Some(remaining) => wait = remaining,
                    None => return,
                }
            }
        }));
    }
}

/// Timer body: delivers the pending value once the interval has passed.
///
/// Returns the remaining wait when a direct delivery happened while the timer
/// was sleeping.
fn deliver_pending<T: Snapshot>(
    shared: &Mutex<DeliveryState<T>>,
    interval: Duration,
) -> Option<Duration> {
    let mut state = lock(shared);
    if !state.closed
        && let Some(elapsed) = state.last_delivery.map(|last| last.elapsed())
        && elapsed < interval
    {
        return Some(interval - elapsed);
    }
    state.timer_armed = false;
    if state.closed {
        return None;
    }
    if let Some(parked) = state.pending.take() {
        state.deliver(&parked);
        state.spare = Some(parked);
    }
    None
}

impl<T: Snapshot> Drop for ThrottledDelivery<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static SNAPSHOTS: AtomicUsize = AtomicUsize::new(0);

    impl Snapshot for u32 {
        fn snapshot(&self) -> Self {
            *self
        }
    }

    /// Counts full copies in `SNAPSHOTS`.
    #[derive(Debug, PartialEq)]
    struct Counted(Vec<u32>);

    impl Snapshot for Counted {
        fn snapshot(&self) -> Self {
            SNAPSHOTS.fetch_add(1, Ordering::SeqCst);
            Counted(self.0.clone())
        }

        fn refresh_from(&mut self, latest: &Self) {
            let known = self.0.len().min(latest.0.len());
            self.0.truncate(known);
            self.0.extend_from_slice(&latest.0[known..]);
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl FnMut(&u32) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        (seen, move |v: &u32| sink_seen.lock().expect("lock").push(*v))
    }

    fn delivered(seen: &Arc<Mutex<Vec<u32>>>) -> Vec<u32> {
        seen.lock().expect("lock").clone()
    }

    #[test]
    fn interval_scales_with_square_root_of_level() {
        assert_eq!(throttle_interval(0), None);
        let one = throttle_interval(1).expect("level 1");
        let four = throttle_interval(4).expect("level 4");
        assert_eq!(one.as_micros(), 83_333);
        assert_eq!(four.as_micros(), 166_666);
    }

    #[test]
    fn level_zero_delivers_every_call_in_order() {
        let (seen, sink) = recorder();
        let mut throttle = ThrottledDelivery::new(0, sink);
        for v in 1..=5 {
            throttle.decimate(&v);
        }
        throttle.finalize(&99);
        assert_eq!(delivered(&seen), vec![1, 2, 3, 4, 5, 99]);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_coalesced_into_latest_value() {
        let (seen, sink) = recorder();
        let mut throttle = ThrottledDelivery::new(1, sink);
        throttle.decimate(&1);
        throttle.decimate(&2);
        throttle.decimate(&3);
        assert_eq!(delivered(&seen), vec![1]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(delivered(&seen), vec![1, 3]);

        throttle.finalize(&4);
        assert_eq!(delivered(&seen), vec![1, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_cancels_pending_delivery() {
        let (seen, sink) = recorder();
        let mut throttle = ThrottledDelivery::new(1, sink);
        throttle.decimate(&1);
        throttle.decimate(&2);
        throttle.finalize(&9);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(delivered(&seen), vec![1, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_stays_under_target() {
        let (seen, sink) = recorder();
        let mut throttle = ThrottledDelivery::new(1, sink);
        let start = Instant::now();
        for v in 0..200 {
            throttle.decimate(&v);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let elapsed = start.elapsed();
        let interval = throttle_interval(1).expect("interval");
        let max = (elapsed.as_secs_f64() / interval.as_secs_f64()).floor() as usize + 1;
        let count = delivered(&seen).len();
        assert!(count <= max, "{count} deliveries exceed {max}");
        assert!(count >= max - 2, "{count} deliveries, expected close to {max}");

        throttle.finalize(&1000);
        assert_eq!(delivered(&seen).last(), Some(&1000));
    }

    #[tokio::test(start_paused = true)]
    async fn deliveries_stay_in_order() {
        let (seen, sink) = recorder();
        let mut throttle = ThrottledDelivery::new(2, sink);
        for v in 0..50 {
            throttle.decimate(&v);
            tokio::time::sleep(Duration::from_millis(13)).await;
        }
        throttle.finalize(&50);
        let values = delivered(&seen);
        assert!(values.windows(2).all(|w| w[0] < w[1]), "{values:?}");
    }

    #[test]
    fn pending_value_waits_for_finalize_without_runtime() {
        let (seen, sink) = recorder();
        let mut throttle = ThrottledDelivery::new(1, sink);
        throttle.decimate(&1);
        throttle.decimate(&2);
        throttle.finalize(&3);
        assert_eq!(delivered(&seen), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_delivery_runs_on_the_timer_task() {
        let owner = tokio::task::try_id();
        let delivering_tasks = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let delivering_tasks = Arc::clone(&delivering_tasks);
            move |_: &u32| {
                delivering_tasks
                    .lock()
                    .expect("lock")
                    .push(tokio::task::try_id());
            }
        };
        let mut throttle = ThrottledDelivery::new(1, sink);
        throttle.decimate(&1);
        throttle.decimate(&2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        throttle.finalize(&3);

        let tasks = delivering_tasks.lock().expect("lock").clone();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0], owner);
        assert!(tasks[1].is_some());
        assert_ne!(tasks[1], owner);
        assert_eq!(tasks[2], owner);
    }

    #[tokio::test(start_paused = true)]
    async fn parked_values_are_refreshed_in_place() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |v: &Counted| seen.lock().expect("lock").push(v.0.len())
        };
        let mut throttle = ThrottledDelivery::new(1, sink);
        let mut latest = Counted(Vec::new());
        SNAPSHOTS.store(0, Ordering::SeqCst);
        for v in 0..60 {
            latest.0.push(v);
            throttle.decimate(&latest);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        throttle.finalize(&latest);

        let lengths = seen.lock().expect("lock").clone();
        assert!(lengths.len() > 2);
        assert_eq!(lengths.last(), Some(&60));
        assert!(lengths.windows(2).all(|w| w[0] < w[1]), "{lengths:?}");
        assert_eq!(SNAPSHOTS.load(Ordering::SeqCst), 1);
    }
}
