// Run tracker core
// Live distance, speed, pace and elapsed time for a single running session

pub mod config;
pub mod error;
pub mod feed;
pub mod filter;
pub mod fix;
pub mod geo;
pub mod pace;
pub mod replay;
pub mod runtime;
pub mod session;
pub mod store;

pub use config::{FilterConfig, TrackerConfig};
pub use error::{TrackerError, TrackerResult};
pub use feed::{LocationFeed, ManualClock, ManualFeed, Subscription, TickSource};
pub use filter::KalmanFilter1D;
pub use fix::{Coordinate, LocationFix};
pub use pace::{format_elapsed, pace, Pace};
pub use session::{Lap, SessionSnapshot, SessionStats, SessionStatus, TrackingSession};
pub use store::{JsonFileStore, MemoryStore, SessionStore, StoredRun};
