//! Tokio-backed clock and feed for running a session against real time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::debug;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

use crate::feed::{FixCallback, LocationFeed, Subscription, TickCallback, TickSource};
use crate::fix::LocationFix;

/// Subscription backed by a spawned task; cancelling aborts the task
struct TaskSubscription {
    task: JoinHandle<()>,
}

impl Subscription for TaskSubscription {
    fn cancel(&mut self) {
        self.task.abort();
    }
}

/// Tick source driven by `tokio::time::interval`. The first tick fires one
/// full period after subscribing.
pub struct IntervalClock {
    handle: Handle,
}

impl IntervalClock {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl TickSource for IntervalClock {
    fn subscribe(&mut self, period: Duration, mut on_tick: TickCallback) -> Box<dyn Subscription> {
        let task = self.handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                on_tick();
            }
        });
        Box::new(TaskSubscription { task })
    }
}

/// Wait for the next undelivered fix
#[derive(Debug, Default)]
struct PendingGap {
    /// When the fix at the cursor is due, while a subscription is waiting on it
    due: Option<Instant>,
    /// Part of the gap still owed after a cancel
    remaining: Option<Duration>,
}

fn lock_gap(gap: &Mutex<PendingGap>) -> MutexGuard<'_, PendingGap> {
    gap.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Replay subscription; cancelling remembers how much of the current gap
/// was still left so a later subscription waits only for the rest
struct ReplaySubscription {
    task: JoinHandle<()>,
    gap: Arc<Mutex<PendingGap>>,
}

impl Subscription for ReplaySubscription {
    fn cancel(&mut self) {
        self.task.abort();
        let mut gap = lock_gap(&self.gap);
        if let Some(due) = gap.due.take() {
            gap.remaining = Some(due.saturating_duration_since(Instant::now()));
        }
    }
}

/// Replays recorded fixes with their original spacing (optionally sped up).
///
/// Pausing keeps the position in the recording. Resuming continues with the
/// next undelivered fix after whatever was left of its gap, so the spacing
/// between fixes holds in active time.
pub struct ReplayFeed {
    handle: Handle,
    fixes: Arc<Vec<LocationFix>>,
    cursor: Arc<AtomicUsize>,
    gap: Arc<Mutex<PendingGap>>,
    time_scale: f64,
    exhausted_tx: Arc<watch::Sender<bool>>,
}

impl ReplayFeed {
    pub fn new(handle: Handle, fixes: Vec<LocationFix>) -> Self {
        let (exhausted_tx, _) = watch::channel(fixes.is_empty());
        Self {
            handle,
            fixes: Arc::new(fixes),
            cursor: Arc::new(AtomicUsize::new(0)),
            gap: Arc::new(Mutex::new(PendingGap::default())),
            time_scale: 1.0,
            exhausted_tx: Arc::new(exhausted_tx),
        }
    }

    /// Playback speed multiplier; values that are not positive fall back to 1
    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = if time_scale.is_finite() && time_scale > 0.0 {
            time_scale
        } else {
            1.0
        };
        self
    }

    /// Flips to `true` once the last fix has been delivered
    pub fn exhausted(&self) -> watch::Receiver<bool> {
        self.exhausted_tx.subscribe()
    }

    pub fn delivered(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

impl LocationFeed for ReplayFeed {
    fn subscribe(&mut self, mut on_fix: FixCallback) -> Box<dyn Subscription> {
        let fixes = self.fixes.clone();
        let cursor = self.cursor.clone();
        let gap = self.gap.clone();
        let exhausted_tx = self.exhausted_tx.clone();
        let time_scale = self.time_scale;

        let task_gap = gap.clone();
        let task = self.handle.spawn(async move {
            let mut carried = lock_gap(&task_gap).remaining.take();
            loop {
                let index = cursor.load(Ordering::SeqCst);
                let Some(fix) = fixes.get(index) else {
                    break;
                };

                let wait = match (carried.take(), index.checked_sub(1)) {
                    (Some(rest), _) => rest,
                    (None, Some(prev)) => (fix.timestamp - fixes[prev].timestamp)
                        .to_std()
                        .unwrap_or_default()
                        .div_f64(time_scale),
                    (None, None) => Duration::ZERO,
                };
                let due = Instant::now() + wait;
                lock_gap(&task_gap).due = Some(due);
                sleep_until(due).await;
                lock_gap(&task_gap).due = None;

                on_fix(fix.clone());
                cursor.store(index + 1, Ordering::SeqCst);
            }
            debug!("Replay exhausted after {} fixes", fixes.len());
            exhausted_tx.send_replace(true);
        });
        Box::new(ReplaySubscription { task, gap })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::session::{SessionStatus, TrackingSession};
    use chrono::{TimeZone, Utc};
    use tokio::time::sleep;

    fn fixes_one_second_apart() -> Vec<LocationFix> {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap();
        [(37.5665, 126.9780), (37.5651, 126.9895), (37.5700, 126.9910)]
            .iter()
            .enumerate()
            .map(|(i, (lat, lon))| {
                LocationFix::new(*lat, *lon, Some(3.0), t0 + chrono::Duration::seconds(i as i64))
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_clock_ticks_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let mut clock = IntervalClock::new(Handle::current());
        let mut sub = clock.subscribe(
            Duration::from_secs(1),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        sleep(Duration::from_millis(3500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        sub.cancel();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_realtime_session_replay() {
        let handle = Handle::current();
        let replay = ReplayFeed::new(handle.clone(), fixes_one_second_apart());
        let mut exhausted = replay.exhausted();

        let mut session = TrackingSession::new(
            TrackerConfig::default(),
            Box::new(replay),
            Box::new(IntervalClock::new(handle)),
        )
        .unwrap();

        session.start();
        exhausted.wait_for(|done| *done).await.unwrap();

        // Last fix lands at t=2s; let the t=2s tick through as well
        sleep(Duration::from_millis(100)).await;
        let stats = session.stats();
        assert_eq!(stats.status, SessionStatus::Running);
        assert_eq!(stats.path_len, 3);
        assert_eq!(stats.elapsed_seconds, 2);
        assert!(stats.distance_km > 0.0);

        let snapshot = session.finish().unwrap();
        assert_eq!(snapshot.path.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_keeps_recorded_spacing() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap();
        let fixes: Vec<LocationFix> = (0..3)
            .map(|i| LocationFix::new(37.5665, 126.9780, Some(3.0), t0 + chrono::Duration::seconds(10 * i)))
            .collect();
        let mut feed = ReplayFeed::new(Handle::current(), fixes);
        let mut exhausted = feed.exhausted();

        let start = Instant::now();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let recorder = |sink: Arc<Mutex<Vec<u64>>>| -> FixCallback {
            Box::new(move |_: LocationFix| {
                sink.lock().unwrap().push(start.elapsed().as_secs_f64().round() as u64)
            })
        };

        let mut sub = feed.subscribe(recorder(delivered.clone()));
        sleep(Duration::from_secs(1)).await;
        sub.cancel();
        assert_eq!(feed.delivered(), 1);

        // Paused for 30 s; the 9 s left of the first gap are still owed
        sleep(Duration::from_secs(30)).await;
        let _sub = feed.subscribe(recorder(delivered.clone()));
        exhausted.wait_for(|done| *done).await.unwrap();

        assert_eq!(*delivered.lock().unwrap(), vec![0, 40, 50]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_resumes_where_paused() {
        let handle = Handle::current();
        let replay = ReplayFeed::new(handle.clone(), fixes_one_second_apart()).with_time_scale(2.0);
        let mut exhausted = replay.exhausted();

        let mut session = TrackingSession::new(
            TrackerConfig::default(),
            Box::new(replay),
            Box::new(IntervalClock::new(handle)),
        )
        .unwrap();

        session.start();
        sleep(Duration::from_millis(100)).await;
        session.pause();
        assert_eq!(session.path().len(), 1);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(session.path().len(), 1);

        session.resume();
        exhausted.wait_for(|done| *done).await.unwrap();
        assert_eq!(session.path().len(), 3);
    }
}
