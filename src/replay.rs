use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use log::info;

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::feed::{ManualClock, ManualFeed};
use crate::fix::LocationFix;
use crate::session::{SessionSnapshot, SessionStats, TrackingSession};

/// Load a recorded fix log: a JSON array of fixes, optionally gzip-compressed
/// (`.gz` extension). Fixes are returned sorted by timestamp.
pub fn load_fix_log(path: &Path) -> TrackerResult<Vec<LocationFix>> {
    let file = File::open(path)
        .map_err(|e| TrackerError::StorageError(format!("cannot open {}: {}", path.display(), e)))?;
    let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut fixes: Vec<LocationFix> = serde_json::from_reader(reader)?;
    fixes.sort_by_key(|fix| fix.timestamp);
    info!("Loaded {} fixes from {}", fixes.len(), path.display());
    Ok(fixes)
}

/// Runs a recording through a session without waiting on real time: the clock
/// ticks once per whole second between the first fix and each later one.
pub struct SteppedReplay {
    session: TrackingSession,
    feed: ManualFeed,
    clock: ManualClock,
    auto_lap_km: Option<f64>,
}

impl SteppedReplay {
    pub fn new(config: TrackerConfig) -> TrackerResult<Self> {
        let feed = ManualFeed::new();
        let clock = ManualClock::new();
        let session = TrackingSession::new(config, Box::new(feed.clone()), Box::new(clock.clone()))?;
        Ok(Self {
            session,
            feed,
            clock,
            auto_lap_km: None,
        })
    }

    /// Mark a lap each time the run covers another `every_km`
    pub fn with_auto_lap_km(mut self, every_km: f64) -> TrackerResult<Self> {
        if !(every_km.is_finite() && every_km > 0.0) {
            return Err(TrackerError::InvalidConfiguration(format!(
                "lap distance must be positive, got {}",
                every_km
            )));
        }
        self.auto_lap_km = Some(every_km);
        Ok(self)
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    /// Start, deliver every fix, and finish. `observe` sees the stats after each fix.
    pub fn run(
        &mut self,
        fixes: &[LocationFix],
        mut observe: impl FnMut(&SessionStats),
    ) -> Option<SessionSnapshot> {
        self.session.start();

        if let Some(first) = fixes.first() {
            let mut ticks_sent = 0i64;
            for fix in fixes {
                let due = (fix.timestamp - first.timestamp).num_seconds();
                while ticks_sent < due {
                    self.clock.tick();
                    ticks_sent += 1;
                }
                self.feed.push(fix.clone());
                if let Some(every_km) = self.auto_lap_km {
                    if self.session.stats().lap_due(every_km) {
                        self.session.lap();
                    }
                }
                observe(&self.session.stats());
            }
        }

        self.session.finish()
    }
}
