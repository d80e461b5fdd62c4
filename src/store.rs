use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::fix::Coordinate;
use crate::geo;
use crate::pace::{format_elapsed, pace};
use crate::session::{Lap, SessionSnapshot};

/// Persisted run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub id: String,
    pub date: DateTime<Utc>,
    /// Metres
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Active seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Seconds spent above the moving threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moving: Option<u64>,
    pub path: Vec<Coordinate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub laps: Vec<Lap>,
}

impl From<&SessionSnapshot> for StoredRun {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            date: snapshot.created_at,
            distance: Some(snapshot.total_distance_km * 1000.0),
            duration: Some(snapshot.elapsed_seconds),
            moving: Some(snapshot.moving_seconds),
            path: snapshot.path.clone(),
            laps: snapshot.laps.clone(),
        }
    }
}

impl StoredRun {
    /// Recorded distance, or the raw path length for records saved without one
    pub fn distance_km(&self) -> f64 {
        self.distance
            .map(|metres| metres / 1000.0)
            .unwrap_or_else(|| geo::path_length_km(&self.path))
    }

    /// One-line summary for listings
    pub fn summary(&self) -> String {
        let duration = self.duration.unwrap_or(0);
        format!(
            "{}  {}  {:.2} km  {}  {} pace  {} points",
            self.id,
            self.date.format("%Y-%m-%d %H:%M"),
            self.distance_km(),
            format_elapsed(duration),
            pace(self.distance_km(), duration),
            self.path.len()
        )
    }

    /// GPX 1.1 document with the run as a single track segment
    pub fn to_gpx(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<gpx version=\"1.1\" creator=\"run_tracker\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n");
        xml.push_str("  <metadata>\n");
        xml.push_str(&format!("    <name>Run {}</name>\n", escape_xml(&self.id)));
        xml.push_str(&format!("    <time>{}</time>\n", self.date.to_rfc3339()));
        xml.push_str("  </metadata>\n");
        xml.push_str("  <trk>\n");
        xml.push_str(&format!("    <name>Run {}</name>\n", escape_xml(&self.id)));
        xml.push_str("    <trkseg>\n");

        for point in &self.path {
            xml.push_str(&format!(
                "      <trkpt lat=\"{}\" lon=\"{}\"></trkpt>\n",
                point.latitude, point.longitude
            ));
        }

        xml.push_str("    </trkseg>\n");
        xml.push_str("  </trk>\n");
        xml.push_str("</gpx>\n");

        xml
    }
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Durable list of completed runs, newest first
pub trait SessionStore {
    fn append(&mut self, snapshot: &SessionSnapshot) -> TrackerResult<StoredRun>;

    fn list_all(&self) -> TrackerResult<Vec<StoredRun>>;

    /// Returns false when no run had that id
    fn delete_by_id(&mut self, id: &str) -> TrackerResult<bool>;

    /// Remove every run; returns how many were removed
    fn clear(&mut self) -> TrackerResult<usize>;

    fn get(&self, id: &str) -> TrackerResult<StoredRun> {
        self.list_all()?
            .into_iter()
            .find(|run| run.id == id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))
    }
}

/// All runs in one JSON array on disk. Writes go to a temporary file that is
/// renamed over the original, so a failed write leaves the previous list intact.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> TrackerResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> TrackerResult<Vec<StoredRun>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, runs: &[StoredRun]) -> TrackerResult<()> {
        let json = serde_json::to_string_pretty(runs)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Wrote {} runs to {}", runs.len(), self.path.display());
        Ok(())
    }
}

impl SessionStore for JsonFileStore {
    fn append(&mut self, snapshot: &SessionSnapshot) -> TrackerResult<StoredRun> {
        let mut runs = self.load()?;
        let run = StoredRun::from(snapshot);
        runs.insert(0, run.clone());
        self.save(&runs)?;
        info!("Saved run {} to {}", run.id, self.path.display());
        Ok(run)
    }

    fn list_all(&self) -> TrackerResult<Vec<StoredRun>> {
        self.load()
    }

    fn delete_by_id(&mut self, id: &str) -> TrackerResult<bool> {
        let mut runs = self.load()?;
        let before = runs.len();
        runs.retain(|run| run.id != id);
        if runs.len() == before {
            return Ok(false);
        }
        self.save(&runs)?;
        info!("Deleted run {}", id);
        Ok(true)
    }

    fn clear(&mut self) -> TrackerResult<usize> {
        let removed = self.load()?.len();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        info!("Cleared {} runs from {}", removed, self.path.display());
        Ok(removed)
    }
}

/// In-process store for hosts that persist elsewhere, and for tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    runs: Vec<StoredRun>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn append(&mut self, snapshot: &SessionSnapshot) -> TrackerResult<StoredRun> {
        let run = StoredRun::from(snapshot);
        self.runs.insert(0, run.clone());
        Ok(run)
    }

    fn list_all(&self) -> TrackerResult<Vec<StoredRun>> {
        Ok(self.runs.clone())
    }

    fn delete_by_id(&mut self, id: &str) -> TrackerResult<bool> {
        let before = self.runs.len();
        self.runs.retain(|run| run.id != id);
        Ok(self.runs.len() != before)
    }

    fn clear(&mut self) -> TrackerResult<usize> {
        Ok(std::mem::take(&mut self.runs).len())
    }
}
