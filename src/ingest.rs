use crate::error::SnapshotError;
use crate::store::StatisticsStore;
use crate::types::OpeningRecord;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Crash-recovery checkpoint cadence, in records. Runs over tens of
/// millions of records span hours.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 500_000;
pub const DEFAULT_PRUNE_THRESHOLD: u64 = 3;
const PROGRESS_INTERVAL: u64 = 100_000;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub data_dir: PathBuf,
    pub checkpoint_interval: u64,
    pub prune_threshold: u64,
}

impl IngestOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub ingested: u64,
    pub replay_errors: u64,
    pub checkpoints: u64,
    pub cancelled: bool,
}

/// Drives filtered records into the store: a single sequential pass
/// with a periodic checkpoint. The checkpoint is the only fatal failure
/// point; a replay error abandons just that record.
///
/// Cancellation is honored at checkpoint boundaries only, never
/// mid-record, so the snapshot on disk always reflects whole records.
/// A cancelled run leaves an unpruned snapshot behind for resumption;
/// pruning happens once, at the end of a completed pass.
pub fn run(
    store: &mut StatisticsStore,
    records: impl Iterator<Item = OpeningRecord>,
    options: &IngestOptions,
    cancel: &AtomicBool,
) -> Result<IngestSummary, SnapshotError> {
    let mut summary = IngestSummary::default();

    for record in records {
        if let Err(e) = store.ingest(&record) {
            summary.replay_errors += 1;
            warn!(error = %e, "replay failed, record abandoned");
        }
        summary.ingested += 1;

        if summary.ingested.is_multiple_of(PROGRESS_INTERVAL) {
            info!(
                records = summary.ingested,
                positions = store.len(),
                "ingestion progress"
            );
        }

        if summary.ingested.is_multiple_of(options.checkpoint_interval) {
            store.checkpoint(&options.data_dir)?;
            summary.checkpoints += 1;
            if cancel.load(Ordering::Relaxed) {
                summary.cancelled = true;
                info!(records = summary.ingested, "ingestion cancelled");
                return Ok(summary);
            }
        }
    }

    store.prune_outliers(options.prune_threshold);
    store.checkpoint(&options.data_dir)?;
    summary.checkpoints += 1;
    info!(
        records = summary.ingested,
        replay_errors = summary.replay_errors,
        positions = store.len(),
        "ingestion pass complete"
    );
    Ok(summary)
}

/// Expands a stream path argument: a literal path, or a glob pattern
/// when it contains wildcard characters.
pub fn expand_paths(pattern: &str) -> io::Result<Vec<PathBuf>> {
    if pattern.contains('*') || pattern.contains('?') {
        let paths = glob::glob(pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
            .filter_map(|entry| entry.ok())
            .collect();
        Ok(paths)
    } else {
        Ok(vec![PathBuf::from(pattern)])
    }
}

/// Opens one raw stream file, decoding zstd transparently.
pub fn open_stream(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "zst") {
        Ok(Box::new(BufReader::new(zstd::stream::read::Decoder::new(
            file,
        )?)))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GameOutcome, SanList};
    use shakmaty::Color;
    use std::sync::atomic::AtomicBool;

    fn record(sans: &[&str], outcome: GameOutcome) -> OpeningRecord {
        let sans: SanList = sans.iter().map(|s| s.to_string()).collect();
        OpeningRecord { sans, outcome }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("opening-oracle-ingest-{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn options(dir: &Path, interval: u64, prune: u64) -> IngestOptions {
        IngestOptions {
            data_dir: dir.to_path_buf(),
            checkpoint_interval: interval,
            prune_threshold: prune,
        }
    }

    #[test]
    fn test_run_ingests_and_snapshots() {
        let dir = temp_dir("basic");
        let records = vec![
            record(&["e4", "e5"], GameOutcome::WhiteWin),
            record(&["e4", "e5"], GameOutcome::Draw),
            record(&["e4", "e5"], GameOutcome::WhiteWin),
        ];

        let mut store = StatisticsStore::new();
        let cancel = AtomicBool::new(false);
        let summary = run(
            &mut store,
            records.into_iter(),
            &options(&dir, 100, 3),
            &cancel,
        )
        .unwrap();

        assert_eq!(summary.ingested, 3);
        assert_eq!(summary.replay_errors, 0);
        assert_eq!(summary.checkpoints, 1); // final export only
        assert!(!summary.cancelled);

        let restored = StatisticsStore::load(&dir).unwrap();
        assert_eq!(restored, store);
        let entry = restored
            .get(Color::White, "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR")
            .unwrap();
        assert_eq!(entry.games, 3);
        assert_eq!(entry.half_points, 5);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_run_counts_replay_errors_and_continues() {
        let dir = temp_dir("replay-errors");
        let records = vec![
            record(&["e4", "Qd4"], GameOutcome::WhiteWin), // illegal ply 2
            record(&["d4", "d5"], GameOutcome::BlackWin),
        ];

        let mut store = StatisticsStore::new();
        let cancel = AtomicBool::new(false);
        let summary = run(
            &mut store,
            records.into_iter(),
            &options(&dir, 100, 1),
            &cancel,
        )
        .unwrap();

        assert_eq!(summary.ingested, 2);
        assert_eq!(summary.replay_errors, 1);
        // The legal ply before the failure was kept.
        assert_eq!(store.len(), 3);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_run_prunes_at_export() {
        let dir = temp_dir("prune");
        let mut records = vec![record(&["a4", "a5"], GameOutcome::Draw)];
        for _ in 0..3 {
            records.push(record(&["e4", "e5"], GameOutcome::WhiteWin));
        }

        let mut store = StatisticsStore::new();
        let cancel = AtomicBool::new(false);
        run(
            &mut store,
            records.into_iter(),
            &options(&dir, 100, 3),
            &cancel,
        )
        .unwrap();

        // Only the 3-game line survives the export prune.
        assert_eq!(store.len(), 2);
        let restored = StatisticsStore::load(&dir).unwrap();
        assert_eq!(restored, store);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_cancellation_at_checkpoint_boundary() {
        let dir = temp_dir("cancel");
        let records: Vec<_> = (0..10)
            .map(|_| record(&["e4", "e5"], GameOutcome::Draw))
            .collect();

        let mut store = StatisticsStore::new();
        let cancel = AtomicBool::new(true);
        let summary = run(
            &mut store,
            records.into_iter(),
            &options(&dir, 4, 3),
            &cancel,
        )
        .unwrap();

        // Stopped at the first checkpoint boundary, not mid-stream.
        assert!(summary.cancelled);
        assert_eq!(summary.ingested, 4);
        assert_eq!(summary.checkpoints, 1);

        // The snapshot is unpruned and resumable.
        let restored = StatisticsStore::load(&dir).unwrap();
        assert_eq!(restored, store);
        assert_eq!(store.len(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_expand_paths_literal_and_glob() {
        let paths = expand_paths("/tmp/no-wildcards.pgn").unwrap();
        assert_eq!(paths, vec![PathBuf::from("/tmp/no-wildcards.pgn")]);

        // A glob over an empty directory expands to nothing.
        let dir = temp_dir("glob");
        std::fs::create_dir_all(&dir).unwrap();
        let pattern = format!("{}/*.pgn", dir.display());
        assert!(expand_paths(&pattern).unwrap().is_empty());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
