//! Snapshot persistence with atomic file writes.
//!
//! Stores the active pair set, Kalman filter snapshots, open positions,
//! equity and the signal log so a restart resumes where it stopped. A
//! missing, unreadable, stale or mismatched Kalman snapshot means the filter
//! starts again from its prior.
//!
//! # Safety
//! - Uses atomic file writes (write to temp, fsync, rename) for durability
//! - The signal log is append-only JSON lines

use crate::discovery::PairCandidate;
use crate::math::{KalmanConfig, KalmanHedgeRatio, KalmanState};
use crate::portfolio::{EquitySnapshot, PairPosition};
use crate::strategy::Signal;
use crate::types::PairId;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Filter state of one pair at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalmanSnapshot {
    pub pair: PairId,
    pub state: KalmanState,
    pub saved_at: DateTime<Utc>,
}

impl KalmanSnapshot {
    pub fn new(pair: PairId, state: KalmanState) -> Self {
        Self {
            pair,
            state,
            saved_at: Utc::now(),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.saved_at > max_age
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_kalman(&self, snapshot: &KalmanSnapshot) -> Result<(), PersistenceError>;
    async fn load_kalman(&self, pair: &PairId) -> Result<Option<KalmanSnapshot>, PersistenceError>;
    async fn save_active_pairs(&self, pairs: &[PairCandidate]) -> Result<(), PersistenceError>;
    async fn load_active_pairs(&self) -> Result<Option<Vec<PairCandidate>>, PersistenceError>;
    async fn save_positions(&self, positions: &[PairPosition]) -> Result<(), PersistenceError>;
    /// Empty when nothing was saved.
    async fn load_positions(&self) -> Result<Vec<PairPosition>, PersistenceError>;
    async fn save_equity(&self, snapshot: &EquitySnapshot) -> Result<(), PersistenceError>;
    async fn load_equity(&self) -> Result<Option<EquitySnapshot>, PersistenceError>;
    async fn append_signal(&self, signal: &Signal) -> Result<(), PersistenceError>;
}

/// Restore a pair's filter from the store, falling back to the prior when
/// the snapshot is missing, unreadable, for another pair, or older than
/// `max_age`.
pub async fn restore_kalman(
    store: &dyn SnapshotStore,
    pair: &PairId,
    config: KalmanConfig,
    prior_beta: f64,
    prior_intercept: f64,
    max_age: Duration,
) -> KalmanHedgeRatio {
    let snapshot = match store.load_kalman(pair).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return KalmanHedgeRatio::new(config, prior_beta, prior_intercept),
        Err(e) => {
            warn!(pair = %pair, error = %e, "Kalman snapshot unreadable, starting from prior");
            return KalmanHedgeRatio::new(config, prior_beta, prior_intercept);
        }
    };

    if &snapshot.pair != pair {
        warn!(pair = %pair, found = %snapshot.pair, "Kalman snapshot for another pair ignored");
        return KalmanHedgeRatio::new(config, prior_beta, prior_intercept);
    }
    if snapshot.is_stale(Utc::now(), max_age) {
        debug!(pair = %pair, saved_at = %snapshot.saved_at, "Stale Kalman snapshot ignored");
        return KalmanHedgeRatio::new(config, prior_beta, prior_intercept);
    }
    debug!(pair = %pair, updates = snapshot.state.update_count, "Kalman state restored");
    KalmanHedgeRatio::from_state(config, prior_beta, prior_intercept, snapshot.state)
}

/// JSON files under one directory.
///
/// ```text
/// <dir>/active_pairs.json
/// <dir>/positions.json
/// <dir>/equity.json
/// <dir>/signals.jsonl
/// <dir>/kalman/<Y>__<X>.json
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(dir.join("kalman")).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn kalman_path(&self, pair: &PairId) -> PathBuf {
        self.dir
            .join("kalman")
            .join(format!("{}__{}.json", pair.dependent, pair.independent))
    }

    /// Persist atomically.
    ///
    /// 1. Write to temporary file
    /// 2. Sync to disk (fsync)
    /// 3. Atomic rename (POSIX guarantees atomicity on same filesystem)
    async fn write_atomic<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(value)?;
        let temp_path = path.with_extension("json.tmp");

        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;

        // If we crash here, either the old file or new file exists - never a partial file
        tokio::fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn save_kalman(&self, snapshot: &KalmanSnapshot) -> Result<(), PersistenceError> {
        self.write_atomic(&self.kalman_path(&snapshot.pair), snapshot)
            .await
    }

    async fn load_kalman(&self, pair: &PairId) -> Result<Option<KalmanSnapshot>, PersistenceError> {
        Self::read_json(&self.kalman_path(pair)).await
    }

    async fn save_active_pairs(&self, pairs: &[PairCandidate]) -> Result<(), PersistenceError> {
        self.write_atomic(&self.dir.join("active_pairs.json"), pairs)
            .await
    }

    async fn load_active_pairs(&self) -> Result<Option<Vec<PairCandidate>>, PersistenceError> {
        Self::read_json(&self.dir.join("active_pairs.json")).await
    }

    async fn save_positions(&self, positions: &[PairPosition]) -> Result<(), PersistenceError> {
        self.write_atomic(&self.dir.join("positions.json"), positions)
            .await
    }

    async fn load_positions(&self) -> Result<Vec<PairPosition>, PersistenceError> {
        Ok(Self::read_json(&self.dir.join("positions.json"))
            .await?
            .unwrap_or_default())
    }

    async fn save_equity(&self, snapshot: &EquitySnapshot) -> Result<(), PersistenceError> {
        self.write_atomic(&self.dir.join("equity.json"), snapshot)
            .await
    }

    async fn load_equity(&self) -> Result<Option<EquitySnapshot>, PersistenceError> {
        Self::read_json(&self.dir.join("equity.json")).await
    }

    async fn append_signal(&self, signal: &Signal) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_vec(signal)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join("signals.jsonl"))
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    kalman: DashMap<(String, String), KalmanSnapshot>,
    active_pairs: Mutex<Option<Vec<PairCandidate>>>,
    positions: Mutex<Vec<PairPosition>>,
    equity: Mutex<Option<EquitySnapshot>>,
    signals: Mutex<Vec<Signal>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn positions(&self) -> Vec<PairPosition> {
        self.positions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn equity(&self) -> Option<EquitySnapshot> {
        self.equity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

fn replace<T>(slot: &Mutex<T>, value: T) {
    *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save_kalman(&self, snapshot: &KalmanSnapshot) -> Result<(), PersistenceError> {
        self.kalman
            .insert(snapshot.pair.canonical_key(), snapshot.clone());
        Ok(())
    }

    async fn load_kalman(&self, pair: &PairId) -> Result<Option<KalmanSnapshot>, PersistenceError> {
        Ok(self
            .kalman
            .get(&pair.canonical_key())
            .map(|entry| entry.value().clone()))
    }

    async fn save_active_pairs(&self, pairs: &[PairCandidate]) -> Result<(), PersistenceError> {
        replace(&self.active_pairs, Some(pairs.to_vec()));
        Ok(())
    }

    async fn load_active_pairs(&self) -> Result<Option<Vec<PairCandidate>>, PersistenceError> {
        Ok(self
            .active_pairs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    async fn save_positions(&self, positions: &[PairPosition]) -> Result<(), PersistenceError> {
        replace(&self.positions, positions.to_vec());
        Ok(())
    }

    async fn load_positions(&self) -> Result<Vec<PairPosition>, PersistenceError> {
        Ok(self.positions())
    }

    async fn save_equity(&self, snapshot: &EquitySnapshot) -> Result<(), PersistenceError> {
        replace(&self.equity, Some(snapshot.clone()));
        Ok(())
    }

    async fn load_equity(&self) -> Result<Option<EquitySnapshot>, PersistenceError> {
        Ok(self.equity())
    }

    async fn append_signal(&self, signal: &Signal) -> Result<(), PersistenceError> {
        self.signals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(signal.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn warmed_filter() -> KalmanHedgeRatio {
        let mut kalman = KalmanHedgeRatio::new(KalmanConfig::default(), 1.0, 0.0);
        for i in 0..20 {
            let x = 100.0 + i as f64;
            kalman.update(x, 1.5 * x + 2.0).unwrap();
        }
        kalman
    }

    #[tokio::test]
    async fn test_kalman_snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let pair = PairId::new("KO", "PEP");
        let filter = warmed_filter();

        let store = JsonFileStore::open(dir.path()).await.unwrap();
        store
            .save_kalman(&KalmanSnapshot::new(pair.clone(), filter.state().clone()))
            .await
            .unwrap();

        // Fresh handle on the same directory
        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        let restored = restore_kalman(
            &reopened,
            &pair,
            KalmanConfig::default(),
            1.0,
            0.0,
            Duration::hours(1),
        )
        .await;
        assert_eq!(restored.state(), filter.state());
        assert!(!dir.path().join("kalman/KO__PEP.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_stale_snapshot_falls_back_to_prior() {
        let store = MemoryStore::new();
        let pair = PairId::new("KO", "PEP");
        let mut snapshot = KalmanSnapshot::new(pair.clone(), warmed_filter().state().clone());
        snapshot.saved_at = Utc::now() - Duration::hours(2);
        store.save_kalman(&snapshot).await.unwrap();

        let restored = restore_kalman(
            &store,
            &pair,
            KalmanConfig::default(),
            0.8,
            1.0,
            Duration::hours(1),
        )
        .await;
        assert_eq!(restored.update_count(), 0);
        assert_eq!(restored.beta(), 0.8);
    }

    #[tokio::test]
    async fn test_snapshot_for_reversed_pair_ignored() {
        let store = MemoryStore::new();
        let stored = PairId::new("PEP", "KO");
        store
            .save_kalman(&KalmanSnapshot::new(stored, warmed_filter().state().clone()))
            .await
            .unwrap();

        let restored = restore_kalman(
            &store,
            &PairId::new("KO", "PEP"),
            KalmanConfig::default(),
            1.0,
            0.0,
            Duration::hours(1),
        )
        .await;
        assert_eq!(restored.update_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_falls_back_to_prior() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let pair = PairId::new("A", "B");
        std::fs::write(dir.path().join("kalman/A__B.json"), b"{not json").unwrap();

        assert!(store.load_kalman(&pair).await.is_err());
        let restored =
            restore_kalman(&store, &pair, KalmanConfig::default(), 1.0, 0.0, Duration::hours(1))
                .await;
        assert_eq!(restored.update_count(), 0);
    }

    #[tokio::test]
    async fn test_book_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert!(store.load_positions().await.unwrap().is_empty());
        assert!(store.load_equity().await.unwrap().is_none());

        let position = crate::portfolio::tests::long_position(
            PairId::new("KO", "PEP"),
            dec!(10),
            dec!(20),
        );
        let equity = EquitySnapshot {
            timestamp: 7,
            equity: dec!(10040),
            cash: dec!(9999),
            unrealized: dec!(41),
            drawdown: 0.001,
            open_positions: 1,
            high_water_mark: dec!(10050),
        };
        store.save_positions(&[position.clone()]).await.unwrap();
        store.save_equity(&equity).await.unwrap();

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.load_positions().await.unwrap(), vec![position]);
        assert_eq!(reopened.load_equity().await.unwrap(), Some(equity));
    }

    #[tokio::test]
    async fn test_signal_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let signal = Signal {
            pair: PairId::new("A", "B"),
            kind: crate::strategy::SignalKind::LongSpread,
            z_score: -2.1,
            confidence: 0.52,
            hedge_ratio: 1.1,
            dependent_price: dec!(10),
            independent_price: dec!(9),
            timestamp: 42,
        };
        store.append_signal(&signal).await.unwrap();
        store.append_signal(&signal).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("signals.jsonl")).unwrap();
        assert_eq!(text.lines().count(), 2);
        let parsed: Signal = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(parsed, signal);
    }
}
