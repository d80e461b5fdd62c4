use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::feed::{LocationFeed, Subscription, TickSource};
use crate::filter::KalmanFilter1D;
use crate::fix::{Coordinate, LocationFix};
use crate::geo;
use crate::pace::{format_elapsed, pace, Pace};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// No run in progress
    Idle,
    /// Clock and feed subscribed, fixes accumulate
    Running,
    /// Accumulated state kept, clock and feed released
    Paused,
}

impl SessionStatus {
    fn name(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "Idle",
            SessionStatus::Running => "Running",
            SessionStatus::Paused => "Paused",
        }
    }
}

/// Split marked during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    /// 1-based
    pub number: usize,
    /// Active seconds since the previous lap, or since the start
    pub split_seconds: u64,
    pub split_distance_km: f64,
    /// Run totals at the moment the lap was marked
    pub elapsed_seconds: u64,
    pub distance_km: f64,
}

impl Lap {
    pub fn pace(&self) -> String {
        pace(self.split_distance_km, self.split_seconds)
    }
}

/// Completed run handed to a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub path: Vec<Coordinate>,
    pub total_distance_km: f64,
    pub elapsed_seconds: u64,
    pub moving_seconds: u64,
    #[serde(default)]
    pub laps: Vec<Lap>,
}

/// Read-only view of a session, published on every change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub status: SessionStatus,
    pub elapsed_seconds: u64,
    pub moving_seconds: u64,
    pub path_len: usize,
    pub last_coordinate: Option<Coordinate>,
    pub distance_km: f64,
    pub speed_kmh: f64,
    pub heading_deg: Option<f64>,
    pub rejected_fixes: u64,
    pub lap_count: usize,
}

impl SessionStats {
    fn idle() -> Self {
        Self {
            status: SessionStatus::Idle,
            elapsed_seconds: 0,
            moving_seconds: 0,
            path_len: 0,
            last_coordinate: None,
            distance_km: 0.0,
            speed_kmh: 0.0,
            heading_deg: None,
            rejected_fixes: 0,
            lap_count: 0,
        }
    }

    /// Average pace over the run so far
    pub fn pace(&self) -> String {
        pace(self.distance_km, self.elapsed_seconds)
    }

    /// Pace at the current filtered speed
    pub fn current_pace(&self) -> Option<Pace> {
        Pace::from_speed_kmh(self.speed_kmh)
    }

    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed_seconds)
    }

    /// True once the distance has reached the next multiple of `every_km`
    pub fn lap_due(&self, every_km: f64) -> bool {
        every_km > 0.0 && self.distance_km >= every_km * (self.lap_count + 1) as f64
    }
}

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn next_run_id(created_at: DateTime<Utc>) -> String {
    let seq = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("run_{}_{}", created_at.timestamp_millis(), seq)
}

/// Everything the clock and feed callbacks mutate. Always accessed through the
/// session mutex so ticks, fixes, and commands apply one at a time.
struct SessionCore {
    status: SessionStatus,
    created_at: Option<DateTime<Utc>>,
    elapsed_seconds: u64,
    moving_seconds: u64,
    path: Vec<Coordinate>,
    last_coordinate: Option<Coordinate>,
    cumulative_distance_km: f64,
    instantaneous_speed_kmh: f64,
    heading_deg: Option<f64>,
    rejected_fixes: u64,
    laps: Vec<Lap>,
    speed_filter: KalmanFilter1D,
    distance_filter: KalmanFilter1D,
    // Validated, never-used filters cloned for each new run
    speed_prototype: KalmanFilter1D,
    distance_prototype: KalmanFilter1D,
    moving_threshold_kmh: f64,
    stats_tx: watch::Sender<SessionStats>,
}

impl SessionCore {
    fn new(config: &TrackerConfig, stats_tx: watch::Sender<SessionStats>) -> TrackerResult<Self> {
        let speed_prototype = config.speed_filter.build()?;
        let distance_prototype = config.distance_filter.build()?;

        Ok(Self {
            status: SessionStatus::Idle,
            created_at: None,
            elapsed_seconds: 0,
            moving_seconds: 0,
            path: Vec::new(),
            last_coordinate: None,
            cumulative_distance_km: 0.0,
            instantaneous_speed_kmh: 0.0,
            heading_deg: None,
            rejected_fixes: 0,
            laps: Vec::new(),
            speed_filter: speed_prototype.clone(),
            distance_filter: distance_prototype.clone(),
            speed_prototype,
            distance_prototype,
            moving_threshold_kmh: config.moving_speed_threshold_kmh,
            stats_tx,
        })
    }

    fn clear(&mut self) {
        self.created_at = None;
        self.elapsed_seconds = 0;
        self.moving_seconds = 0;
        self.path = Vec::new();
        self.last_coordinate = None;
        self.cumulative_distance_km = 0.0;
        self.instantaneous_speed_kmh = 0.0;
        self.heading_deg = None;
        self.rejected_fixes = 0;
        self.laps = Vec::new();
        self.speed_filter = self.speed_prototype.clone();
        self.distance_filter = self.distance_prototype.clone();
    }

    fn apply_tick(&mut self) {
        if self.status != SessionStatus::Running {
            debug!("Dropping tick received while {}", self.status.name());
            return;
        }

        self.elapsed_seconds += 1;
        if self.instantaneous_speed_kmh >= self.moving_threshold_kmh {
            self.moving_seconds += 1;
        }
        self.publish();
    }

    fn apply_fix(&mut self, fix: LocationFix) {
        if self.status != SessionStatus::Running {
            debug!("Dropping fix from {} received while {}", fix.timestamp, self.status.name());
            return;
        }

        if let Err(err) = fix.coordinate.validate() {
            self.rejected_fixes += 1;
            warn!("{}; skipping fix from {}", err, fix.timestamp);
            return;
        }

        let coordinate = fix.coordinate;
        let reported_heading = fix
            .heading
            .filter(|heading| heading.is_finite())
            .map(|heading| heading.rem_euclid(360.0));

        match self.last_coordinate {
            Some(last) => {
                let raw_km = geo::distance_km(last, coordinate);
                let filtered_km = self.distance_filter.filter(raw_km);
                self.cumulative_distance_km += filtered_km;

                let course = (raw_km > 0.0).then(|| geo::bearing_deg(last, coordinate));
                self.heading_deg = reported_heading.or(course).or(self.heading_deg);

                debug!(
                    "Leg {:.5} km raw, {:.5} km filtered, total {:.4} km",
                    raw_km, filtered_km, self.cumulative_distance_km
                );
            }
            None => {
                if reported_heading.is_some() {
                    self.heading_deg = reported_heading;
                }
            }
        }

        self.last_coordinate = Some(coordinate);
        self.path.push(coordinate);

        self.instantaneous_speed_kmh = self.speed_filter.filter(fix.speed_kmh());
        self.publish();
    }

    fn mark_lap(&mut self) -> Lap {
        let (split_seconds, split_distance_km) = match self.laps.last() {
            Some(previous) => (
                self.elapsed_seconds - previous.elapsed_seconds,
                self.cumulative_distance_km - previous.distance_km,
            ),
            None => (self.elapsed_seconds, self.cumulative_distance_km),
        };
        let lap = Lap {
            number: self.laps.len() + 1,
            split_seconds,
            split_distance_km,
            elapsed_seconds: self.elapsed_seconds,
            distance_km: self.cumulative_distance_km,
        };
        self.laps.push(lap.clone());
        self.publish();
        lap
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            status: self.status,
            elapsed_seconds: self.elapsed_seconds,
            moving_seconds: self.moving_seconds,
            path_len: self.path.len(),
            last_coordinate: self.last_coordinate,
            distance_km: self.cumulative_distance_km,
            speed_kmh: self.instantaneous_speed_kmh,
            heading_deg: self.heading_deg,
            rejected_fixes: self.rejected_fixes,
            lap_count: self.laps.len(),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        SessionSnapshot {
            id: next_run_id(created_at),
            created_at,
            path: self.path.clone(),
            total_distance_km: self.cumulative_distance_km,
            elapsed_seconds: self.elapsed_seconds,
            moving_seconds: self.moving_seconds,
            laps: self.laps.clone(),
        }
    }

    fn publish(&self) {
        self.stats_tx.send_replace(self.stats());
    }
}

fn lock_core(core: &Mutex<SessionCore>) -> MutexGuard<'_, SessionCore> {
    core.lock().unwrap_or_else(|poisoned| {
        warn!("Session lock poisoned by a panicking callback; recovering");
        poisoned.into_inner()
    })
}

fn ignored(command: &'static str, status: SessionStatus) {
    let err = TrackerError::InvalidStateTransition {
        command,
        state: status.name(),
    };
    warn!("{}; ignoring", err);
}

/// One running session: owns the state machine and both filters, and
/// subscribes to the injected clock and location feed while running.
///
/// Commands that do not apply to the current state are no-ops, so repeated
/// taps in a UI are harmless.
pub struct TrackingSession {
    core: Arc<Mutex<SessionCore>>,
    feed: Box<dyn LocationFeed>,
    clock: Box<dyn TickSource>,
    fix_subscription: Option<Box<dyn Subscription>>,
    tick_subscription: Option<Box<dyn Subscription>>,
    tick_interval: Duration,
    stats_rx: watch::Receiver<SessionStats>,
    last_run_tx: watch::Sender<Option<SessionSnapshot>>,
}

impl TrackingSession {
    pub fn new(
        config: TrackerConfig,
        feed: Box<dyn LocationFeed>,
        clock: Box<dyn TickSource>,
    ) -> TrackerResult<Self> {
        config.validate()?;
        let (stats_tx, stats_rx) = watch::channel(SessionStats::idle());
        let core = SessionCore::new(&config, stats_tx)?;

        Ok(Self {
            core: Arc::new(Mutex::new(core)),
            feed,
            clock,
            fix_subscription: None,
            tick_subscription: None,
            tick_interval: config.tick_interval(),
            stats_rx,
            last_run_tx: watch::channel(None).0,
        })
    }

    /// Idle → Running with a fresh path, clock, and filters
    pub fn start(&mut self) {
        {
            let mut core = lock_core(&self.core);
            if core.status != SessionStatus::Idle {
                return ignored("start", core.status);
            }
            core.clear();
            core.created_at = Some(Utc::now());
            core.status = SessionStatus::Running;
            core.publish();
        }
        self.subscribe_sources();
        info!("Run started");
    }

    /// Running → Paused; keeps everything recorded so far
    pub fn pause(&mut self) {
        {
            let mut core = lock_core(&self.core);
            if core.status != SessionStatus::Running {
                return ignored("pause", core.status);
            }
            core.status = SessionStatus::Paused;
            core.publish();
        }
        self.cancel_sources();
        info!("Run paused");
    }

    /// Paused → Running without touching accumulated state
    pub fn resume(&mut self) {
        {
            let mut core = lock_core(&self.core);
            if core.status != SessionStatus::Paused {
                return ignored("resume", core.status);
            }
            core.status = SessionStatus::Running;
            core.publish();
        }
        self.subscribe_sources();
        info!("Run resumed");
    }

    /// Any state → Idle, discarding the run
    pub fn reset(&mut self) {
        {
            let mut core = lock_core(&self.core);
            core.status = SessionStatus::Idle;
            core.clear();
            core.publish();
        }
        self.cancel_sources();
        info!("Session reset");
    }

    /// Mark a lap split while Running or Paused
    pub fn lap(&mut self) -> Option<Lap> {
        let mut core = lock_core(&self.core);
        match core.status {
            SessionStatus::Running | SessionStatus::Paused => {}
            other => {
                ignored("lap", other);
                return None;
            }
        }
        let lap = core.mark_lap();
        info!(
            "Lap {}: {:.3} km in {} ({} pace)",
            lap.number,
            lap.split_distance_km,
            format_elapsed(lap.split_seconds),
            lap.pace()
        );
        Some(lap)
    }

    /// Running/Paused → Idle, returning the completed run.
    ///
    /// The stats channel only ever shows the cleared `Idle` state afterwards;
    /// the completed run is also published on [`TrackingSession::last_run`].
    pub fn finish(&mut self) -> Option<SessionSnapshot> {
        let snapshot = {
            let mut core = lock_core(&self.core);
            match core.status {
                SessionStatus::Running | SessionStatus::Paused => {}
                other => {
                    ignored("finish", other);
                    return None;
                }
            }

            let snapshot = core.snapshot();
            core.status = SessionStatus::Idle;
            core.clear();
            core.publish();
            snapshot
        };
        self.cancel_sources();
        self.last_run_tx.send_replace(Some(snapshot.clone()));

        info!(
            "Run {} finished: {:.3} km in {} ({} fixes)",
            snapshot.id,
            snapshot.total_distance_km,
            format_elapsed(snapshot.elapsed_seconds),
            snapshot.path.len()
        );
        Some(snapshot)
    }

    pub fn status(&self) -> SessionStatus {
        lock_core(&self.core).status
    }

    pub fn elapsed_seconds(&self) -> u64 {
        lock_core(&self.core).elapsed_seconds
    }

    pub fn moving_seconds(&self) -> u64 {
        lock_core(&self.core).moving_seconds
    }

    pub fn path(&self) -> Vec<Coordinate> {
        lock_core(&self.core).path.clone()
    }

    pub fn cumulative_distance_km(&self) -> f64 {
        lock_core(&self.core).cumulative_distance_km
    }

    pub fn instantaneous_speed_kmh(&self) -> f64 {
        lock_core(&self.core).instantaneous_speed_kmh
    }

    pub fn heading_deg(&self) -> Option<f64> {
        lock_core(&self.core).heading_deg
    }

    pub fn stats(&self) -> SessionStats {
        lock_core(&self.core).stats()
    }

    /// Change notifications; the receiver always holds the latest stats
    pub fn watch(&self) -> watch::Receiver<SessionStats> {
        self.stats_rx.clone()
    }

    pub fn laps(&self) -> Vec<Lap> {
        lock_core(&self.core).laps.clone()
    }

    /// Most recently finished run, updated once per `finish()`
    pub fn last_run(&self) -> watch::Receiver<Option<SessionSnapshot>> {
        self.last_run_tx.subscribe()
    }

    // Never called with the core lock held: sources may deliver synchronously
    // or wait for an in-flight callback when cancelled.
    fn subscribe_sources(&mut self) {
        self.cancel_sources();

        let core = Arc::clone(&self.core);
        self.tick_subscription = Some(
            self.clock
                .subscribe(self.tick_interval, Box::new(move || lock_core(&core).apply_tick())),
        );

        let core = Arc::clone(&self.core);
        self.fix_subscription = Some(
            self.feed
                .subscribe(Box::new(move |fix| lock_core(&core).apply_fix(fix))),
        );
    }

    fn cancel_sources(&mut self) {
        if let Some(mut subscription) = self.tick_subscription.take() {
            subscription.cancel();
        }
        if let Some(mut subscription) = self.fix_subscription.take() {
            subscription.cancel();
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.cancel_sources();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FixCallback, ManualClock, ManualFeed};
    use approx::assert_relative_eq;

    fn session() -> (TrackingSession, ManualFeed, ManualClock) {
        let feed = ManualFeed::new();
        let clock = ManualClock::new();
        let session = TrackingSession::new(
            TrackerConfig::default(),
            Box::new(feed.clone()),
            Box::new(clock.clone()),
        )
        .unwrap();
        (session, feed, clock)
    }

    fn fix(lat: f64, lon: f64, speed: Option<f64>) -> LocationFix {
        LocationFix::new(lat, lon, speed, Utc::now())
    }

    fn seoul_run(feed: &ManualFeed, clock: &ManualClock) {
        feed.push(fix(37.5665, 126.9780, Some(3.0)));
        clock.tick();
        feed.push(fix(37.5651, 126.9895, Some(3.2)));
        clock.tick();
        feed.push(fix(37.5700, 126.9910, Some(2.9)));
    }

    #[test]
    fn test_three_fix_scenario() {
        let (mut session, feed, clock) = session();
        session.start();
        assert_eq!(clock.interval(), Some(Duration::from_secs(1)));

        seoul_run(&feed, &clock);

        assert_eq!(session.path().len(), 3);
        assert!(session.cumulative_distance_km() > 0.0);
        assert_eq!(session.elapsed_seconds(), 2);
        assert_eq!(session.stats().pace(), pace(session.cumulative_distance_km(), 2));
    }

    #[test]
    fn test_first_leg_is_unsmoothed() {
        let (mut session, feed, _clock) = session();
        session.start();
        let a = Coordinate::new(37.5665, 126.9780);
        let b = Coordinate::new(37.5651, 126.9895);
        feed.push(LocationFix::new(a.latitude, a.longitude, None, Utc::now()));
        feed.push(LocationFix::new(b.latitude, b.longitude, None, Utc::now()));
        assert_relative_eq!(session.cumulative_distance_km(), geo::distance_km(a, b));
    }

    #[test]
    fn test_stationary_fixes_accumulate_nothing() {
        let (mut session, feed, clock) = session();
        session.start();
        for _ in 0..20 {
            feed.push(fix(37.5665, 126.9780, Some(0.0)));
            clock.tick();
        }
        assert_eq!(session.path().len(), 20);
        assert!(session.cumulative_distance_km().abs() < 1e-12);
        assert_eq!(session.moving_seconds(), 0);
        assert_eq!(session.elapsed_seconds(), 20);
    }

    #[test]
    fn test_negative_speed_clamped() {
        let (mut session, feed, _clock) = session();
        session.start();
        feed.push(fix(37.5665, 126.9780, Some(-0.5)));
        assert_eq!(session.instantaneous_speed_kmh(), 0.0);
    }

    #[test]
    fn test_speed_is_filtered() {
        let (mut session, feed, _clock) = session();
        session.start();
        feed.push(fix(37.5665, 126.9780, Some(2.0)));
        assert_relative_eq!(session.instantaneous_speed_kmh(), 7.2);
        feed.push(fix(37.5666, 126.9781, Some(4.0)));
        let speed = session.instantaneous_speed_kmh();
        assert!(speed > 7.2 && speed < 14.4);
    }

    #[test]
    fn test_pause_resume_preserves_state() {
        let (mut session, feed, clock) = session();
        session.start();
        seoul_run(&feed, &clock);
        let distance = session.cumulative_distance_km();

        session.pause();
        assert_eq!(session.status(), SessionStatus::Paused);
        assert!(!feed.is_subscribed());
        assert!(!clock.is_subscribed());
        assert!(!clock.tick());
        assert!(!feed.push(fix(37.6, 127.0, Some(3.0))));

        session.resume();
        assert_eq!(session.status(), SessionStatus::Running);
        assert_eq!(session.path().len(), 3);
        assert_eq!(session.cumulative_distance_km(), distance);
        assert_eq!(session.elapsed_seconds(), 2);

        clock.tick();
        feed.push(fix(37.5710, 126.9920, Some(3.0)));
        assert_eq!(session.path().len(), 4);
        assert_eq!(session.elapsed_seconds(), 3);
        assert!(session.cumulative_distance_km() > distance);
    }

    #[test]
    fn test_reset_from_every_state() {
        let (mut session, feed, clock) = session();

        session.reset();
        assert_eq!(session.status(), SessionStatus::Idle);

        session.start();
        seoul_run(&feed, &clock);
        session.reset();
        assert_cleared(&session);
        assert!(!feed.is_subscribed());
        assert!(!clock.is_subscribed());

        session.start();
        seoul_run(&feed, &clock);
        session.pause();
        session.reset();
        assert_cleared(&session);
        session.reset();
        assert_cleared(&session);
    }

    fn assert_cleared(session: &TrackingSession) {
        let stats = session.stats();
        assert_eq!(stats.status, SessionStatus::Idle);
        assert_eq!(stats.path_len, 0);
        assert_eq!(stats.elapsed_seconds, 0);
        assert_eq!(stats.distance_km, 0.0);
        assert_eq!(stats.speed_kmh, 0.0);
        assert_eq!(stats.last_coordinate, None);
        assert_eq!(stats.heading_deg, None);
    }

    #[test]
    fn test_finish_returns_snapshot_and_clears() {
        let (mut session, feed, clock) = session();
        session.start();
        seoul_run(&feed, &clock);
        let path = session.path();
        let distance = session.cumulative_distance_km();

        let snapshot = session.finish().unwrap();
        assert_eq!(snapshot.path, path);
        assert_eq!(snapshot.total_distance_km, distance);
        assert_eq!(snapshot.elapsed_seconds, 2);
        assert!(snapshot.id.starts_with("run_"));
        assert_cleared(&session);
        assert!(!feed.is_subscribed());

        session.start();
        assert_eq!(session.status(), SessionStatus::Running);
        assert!(session.path().is_empty());
        feed.push(fix(37.5665, 126.9780, Some(-1.0)));
        assert_eq!(session.path().len(), 1);
        assert_eq!(session.instantaneous_speed_kmh(), 0.0);
    }

    #[test]
    fn test_finish_from_paused() {
        let (mut session, feed, clock) = session();
        session.start();
        seoul_run(&feed, &clock);
        session.pause();
        let snapshot = session.finish().unwrap();
        assert_eq!(snapshot.path.len(), 3);
    }

    #[test]
    fn test_snapshot_ids_unique() {
        let (mut session, _feed, _clock) = session();
        session.start();
        let first = session.finish().unwrap();
        session.start();
        let second = session.finish().unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_invalid_commands_are_noops() {
        let (mut session, feed, clock) = session();
        session.pause();
        session.resume();
        assert!(session.finish().is_none());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(!feed.is_subscribed());

        session.start();
        seoul_run(&feed, &clock);
        session.start();
        session.resume();
        assert_eq!(session.path().len(), 3);
        assert_eq!(session.elapsed_seconds(), 2);

        session.pause();
        session.pause();
        assert_eq!(session.status(), SessionStatus::Paused);
        assert_eq!(session.path().len(), 3);
    }

    #[test]
    fn test_malformed_fix_skipped() {
        let (mut session, feed, _clock) = session();
        session.start();
        feed.push(fix(37.5665, 126.9780, Some(3.0)));
        feed.push(fix(f64::NAN, 126.9790, Some(3.0)));
        feed.push(fix(37.5670, f64::INFINITY, Some(3.0)));

        let stats = session.stats();
        assert_eq!(stats.path_len, 1);
        assert_eq!(stats.distance_km, 0.0);
        assert_eq!(stats.rejected_fixes, 2);

        feed.push(fix(37.5670, 126.9790, Some(3.0)));
        assert!(session.cumulative_distance_km().is_finite());
        assert!(session.cumulative_distance_km() > 0.0);
    }

    #[test]
    fn test_heading_prefers_reported_course() {
        let (mut session, feed, _clock) = session();
        session.start();
        feed.push(fix(0.0, 0.0, None));
        feed.push(fix(0.001, 0.0, None));
        assert_relative_eq!(session.heading_deg().unwrap(), 0.0, epsilon = 1e-6);

        feed.push(fix(0.001, 0.001, None).with_heading(-45.0));
        assert_relative_eq!(session.heading_deg().unwrap(), 315.0);

        // No movement and no report keeps the last heading
        feed.push(fix(0.001, 0.001, None));
        assert_relative_eq!(session.heading_deg().unwrap(), 315.0);
    }

    #[test]
    fn test_moving_time_counts_only_when_moving() {
        let (mut session, feed, clock) = session();
        session.start();
        clock.tick();
        feed.push(fix(37.5665, 126.9780, Some(3.0)));
        clock.tick();
        clock.tick();
        assert_eq!(session.elapsed_seconds(), 3);
        assert_eq!(session.moving_seconds(), 2);
    }

    /// Feed that keeps calling back after cancel, like a platform provider
    /// whose teardown lags behind the request.
    struct LaggingFeed {
        callback: Arc<Mutex<Option<FixCallback>>>,
    }

    struct NoopSubscription;

    impl Subscription for NoopSubscription {
        fn cancel(&mut self) {}
    }

    impl LocationFeed for LaggingFeed {
        fn subscribe(&mut self, on_fix: FixCallback) -> Box<dyn Subscription> {
            *self.callback.lock().unwrap() = Some(on_fix);
            Box::new(NoopSubscription)
        }
    }

    #[test]
    fn test_late_fixes_after_pause_are_dropped() {
        let callback = Arc::new(Mutex::new(None));
        let feed = LaggingFeed {
            callback: callback.clone(),
        };
        let mut session = TrackingSession::new(
            TrackerConfig::default(),
            Box::new(feed),
            Box::new(ManualClock::new()),
        )
        .unwrap();

        let deliver = |f: LocationFix| {
            if let Some(on_fix) = callback.lock().unwrap().as_mut() {
                on_fix(f);
            }
        };

        session.start();
        deliver(fix(37.5665, 126.9780, Some(3.0)));
        session.pause();
        deliver(fix(37.5651, 126.9895, Some(3.0)));
        assert_eq!(session.path().len(), 1);

        session.reset();
        deliver(fix(37.5651, 126.9895, Some(3.0)));
        assert!(session.path().is_empty());
    }

    #[test]
    fn test_watch_sees_updates() {
        let (mut session, feed, clock) = session();
        let rx = session.watch();
        assert_eq!(rx.borrow().status, SessionStatus::Idle);

        session.start();
        seoul_run(&feed, &clock);
        {
            let stats = rx.borrow();
            assert_eq!(stats.status, SessionStatus::Running);
            assert_eq!(stats.path_len, 3);
            assert_eq!(stats.elapsed_display(), "00:02");
        }

        session.finish();
        assert_eq!(rx.borrow().status, SessionStatus::Idle);
        assert_eq!(rx.borrow().path_len, 0);
    }

    #[test]
    fn test_last_run_carries_final_figures() {
        let (mut session, feed, clock) = session();
        let mut last_run = session.last_run();
        assert!(last_run.borrow().is_none());

        session.start();
        seoul_run(&feed, &clock);
        let distance = session.cumulative_distance_km();
        let returned = session.finish().unwrap();

        assert!(last_run.has_changed().unwrap());
        let published = last_run.borrow_and_update().clone().unwrap();
        assert_eq!(published, returned);
        assert_eq!(published.path.len(), 3);
        assert_eq!(published.elapsed_seconds, 2);
        assert_eq!(published.total_distance_km, distance);

        // A no-op finish publishes nothing new
        assert!(session.finish().is_none());
        assert!(!last_run.has_changed().unwrap());
    }

    #[test]
    fn test_laps_record_splits() {
        let (mut session, feed, clock) = session();
        assert!(session.lap().is_none());

        session.start();
        feed.push(fix(37.5665, 126.9780, Some(3.0)));
        clock.tick();
        feed.push(fix(37.5651, 126.9895, Some(3.0)));
        let first = session.lap().unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(first.split_seconds, 1);
        assert_eq!(first.split_distance_km, session.cumulative_distance_km());

        clock.tick();
        clock.tick();
        feed.push(fix(37.5700, 126.9910, Some(3.0)));
        session.pause();
        let second = session.lap().unwrap();
        assert_eq!(second.number, 2);
        assert_eq!(second.split_seconds, 2);
        assert_eq!(second.elapsed_seconds, 3);
        assert_relative_eq!(
            second.split_distance_km,
            session.cumulative_distance_km() - first.distance_km
        );
        assert_eq!(session.stats().lap_count, 2);

        let snapshot = session.finish().unwrap();
        assert_eq!(snapshot.laps, vec![first, second]);
        assert!(session.laps().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = TrackerConfig::default();
        config.speed_filter.measurement_noise = 0.0;
        let result = TrackingSession::new(
            config,
            Box::new(ManualFeed::new()),
            Box::new(ManualClock::new()),
        );
        assert!(matches!(result, Err(TrackerError::InvalidConfiguration(_))));
    }
}
