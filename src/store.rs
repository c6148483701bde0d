use crate::error::{ReplayError, SnapshotError};
use crate::key::position_key;
use crate::types::OpeningRecord;
use serde::{Deserialize, Serialize};
use shakmaty::{Chess, Color, Position, san::SanPlus};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::info;

pub const WHITE_SNAPSHOT: &str = "openings_white.json";
pub const BLACK_SNAPSHOT: &str = "openings_black.json";

/// Aggregate outcome for one position, from the perspective of the side
/// that just moved into it. The score is held in half-points (win = 2,
/// draw = 1, loss = 0) so repeated accumulation stays exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatEntry {
    pub games: u64,
    pub half_points: u64,
}

impl StatEntry {
    fn add(&mut self, half_points: u64) {
        self.games += 1;
        self.half_points += half_points;
    }

    pub fn score(&self) -> f64 {
        self.half_points as f64 / 2.0
    }

    pub fn win_rate(&self) -> f64 {
        if self.games == 0 {
            return 0.0;
        }
        self.half_points as f64 / (2 * self.games) as f64
    }
}

type Table = HashMap<String, StatEntry>;

/// Position-indexed outcome statistics: one table per side to move,
/// keyed by the canonical placement key of the position reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatisticsStore {
    white: Table,
    black: Table,
}

impl StatisticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.white.len() + self.black.len()
    }

    pub fn is_empty(&self) -> bool {
        self.white.is_empty() && self.black.is_empty()
    }

    fn table(&self, side: Color) -> &Table {
        match side {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    fn table_mut(&mut self, side: Color) -> &mut Table {
        match side {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    pub fn get(&self, side: Color, key: &str) -> Option<StatEntry> {
        self.table(side).get(key).copied()
    }

    /// Merges one game outcome at `key` into `side`'s table.
    pub fn merge(&mut self, side: Color, key: String, half_points: u64) {
        self.table_mut(side).entry(key).or_default().add(half_points);
    }

    /// Replays `record` from the start position; after every half-move
    /// the mover's outcome is merged into the mover's table under the
    /// key of the position just reached.
    ///
    /// A replay failure abandons the rest of the record. There is no
    /// rollback: merges already applied are kept, and each is a whole
    /// completed merge, so the store stays internally consistent.
    pub fn ingest(&mut self, record: &OpeningRecord) -> Result<(), ReplayError> {
        let mut pos = Chess::default();
        for (ply, text) in record.sans.iter().enumerate() {
            let san: SanPlus = text
                .parse()
                .map_err(|_| ReplayError::BadSan(text.clone(), ply + 1))?;
            let mover = pos.turn();
            let m = san
                .san
                .to_move(&pos)
                .map_err(|_| ReplayError::IllegalMove(text.clone(), ply + 1))?;
            pos.play_unchecked(m);

            let half_points = record.outcome.half_points_for(mover);
            self.merge(mover, position_key(&pos), half_points);
        }
        Ok(())
    }

    /// Drops every entry with fewer than `min_games` games from both
    /// tables. Run only at export time: an entry below the threshold
    /// now may still cross it in a later ingestion session.
    pub fn prune_outliers(&mut self, min_games: u64) {
        let before = self.len();
        self.white.retain(|_, entry| entry.games >= min_games);
        self.black.retain(|_, entry| entry.games >= min_games);
        info!(
            removed = before - self.len(),
            remaining = self.len(),
            min_games,
            "pruned outlier entries"
        );
    }

    /// Serializes both tables under `dir`, each through a temp file
    /// renamed into place so a crash never corrupts the previous
    /// snapshot.
    pub fn checkpoint(&self, dir: &Path) -> Result<(), SnapshotError> {
        fs::create_dir_all(dir).map_err(|e| SnapshotError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        write_table(&self.white, &dir.join(WHITE_SNAPSHOT))?;
        write_table(&self.black, &dir.join(BLACK_SNAPSHOT))?;
        Ok(())
    }

    /// Loads the snapshot under `dir`. A missing snapshot is not an
    /// error: it yields an empty store.
    pub fn load(dir: &Path) -> Result<Self, SnapshotError> {
        Ok(Self {
            white: read_table(&dir.join(WHITE_SNAPSHOT))?,
            black: read_table(&dir.join(BLACK_SNAPSHOT))?,
        })
    }
}

fn write_table(table: &Table, path: &PathBuf) -> Result<(), SnapshotError> {
    let io_err = |e: std::io::Error| SnapshotError::Io {
        path: path.clone(),
        source: e,
    };

    let tmp = path.with_extension("json.tmp");
    let file = File::create(&tmp).map_err(io_err)?;
    serde_json::to_writer(BufWriter::new(file), table).map_err(|e| SnapshotError::Io {
        path: tmp.clone(),
        source: e.into(),
    })?;
    fs::rename(&tmp, path).map_err(io_err)
}

fn read_table(path: &PathBuf) -> Result<Table, SnapshotError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Table::default()),
        Err(e) => {
            return Err(SnapshotError::Io {
                path: path.clone(),
                source: e,
            });
        }
    };
    serde_json::from_reader(BufReader::new(file)).map_err(|e| SnapshotError::Corrupt {
        path: path.clone(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GameOutcome, SanList};

    pub(crate) fn record(sans: &[&str], outcome: GameOutcome) -> OpeningRecord {
        let sans: SanList = sans.iter().map(|s| s.to_string()).collect();
        OpeningRecord { sans, outcome }
    }

    fn key_after(sans: &[&str]) -> String {
        let mut pos = Chess::default();
        for text in sans {
            let san: SanPlus = text.parse().unwrap();
            let m = san.san.to_move(&pos).unwrap();
            pos.play_unchecked(m);
        }
        position_key(&pos)
    }

    #[test]
    fn test_ingest_updates_both_tables_per_ply() {
        let mut store = StatisticsStore::new();
        store
            .ingest(&record(&["e4", "e5", "Nf3", "Nc6"], GameOutcome::WhiteWin))
            .unwrap();

        // White's plies land in the white table with a win...
        let after_e4 = store.get(Color::White, &key_after(&["e4"])).unwrap();
        assert_eq!(after_e4, StatEntry { games: 1, half_points: 2 });
        let after_nf3 = store
            .get(Color::White, &key_after(&["e4", "e5", "Nf3"]))
            .unwrap();
        assert_eq!(after_nf3.games, 1);
        assert_eq!(after_nf3.score(), 1.0);

        // ...black's in the black table with a loss.
        let after_e5 = store.get(Color::Black, &key_after(&["e4", "e5"])).unwrap();
        assert_eq!(after_e5, StatEntry { games: 1, half_points: 0 });
        assert_eq!(after_e5.score(), 0.0);

        // No cross-table leakage.
        assert!(store.get(Color::Black, &key_after(&["e4"])).is_none());
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_ingest_n_times_scales_counts_exactly() {
        let mut store = StatisticsStore::new();
        let rec = record(&["d4", "d5", "c4", "e6"], GameOutcome::Draw);
        for _ in 0..5 {
            store.ingest(&rec).unwrap();
        }
        for (side, sans) in [
            (Color::White, vec!["d4"]),
            (Color::Black, vec!["d4", "d5"]),
            (Color::White, vec!["d4", "d5", "c4"]),
            (Color::Black, vec!["d4", "d5", "c4", "e6"]),
        ] {
            let entry = store.get(side, &key_after(&sans)).unwrap();
            assert_eq!(entry.games, 5);
            assert_eq!(entry.half_points, 5); // 5 draws at 1 half-point
            assert_eq!(entry.score(), 2.5);
        }
    }

    #[test]
    fn test_transpositions_merge_into_one_entry() {
        let mut store = StatisticsStore::new();
        store
            .ingest(&record(&["d4", "Nf6", "c4", "e6"], GameOutcome::WhiteWin))
            .unwrap();
        store
            .ingest(&record(&["c4", "e6", "d4", "Nf6"], GameOutcome::BlackWin))
            .unwrap();

        let entry = store
            .get(Color::Black, &key_after(&["d4", "Nf6", "c4", "e6"]))
            .unwrap();
        assert_eq!(entry.games, 2);
        assert_eq!(entry.half_points, 2); // one loss + one win for black
    }

    #[test]
    fn test_illegal_replay_keeps_completed_merges() {
        let mut store = StatisticsStore::new();
        // Qd4 is blocked by white's own d-pawn.
        let err = store
            .ingest(&record(&["e4", "e5", "Qd4", "Nc6"], GameOutcome::BlackWin))
            .unwrap_err();
        assert!(matches!(err, ReplayError::IllegalMove(_, 3)));

        // The two legal plies were merged and stay merged.
        assert_eq!(store.len(), 2);
        let entry = store.get(Color::White, &key_after(&["e4"])).unwrap();
        assert_eq!(entry, StatEntry { games: 1, half_points: 0 });
    }

    #[test]
    fn test_unparseable_san_abandons_record() {
        let mut store = StatisticsStore::new();
        let err = store
            .ingest(&record(&["e4", "??"], GameOutcome::Draw))
            .unwrap_err();
        assert!(matches!(err, ReplayError::BadSan(_, 2)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_prune_outliers_threshold() {
        let mut store = StatisticsStore::new();
        let frequent = record(&["e4", "e5"], GameOutcome::WhiteWin);
        let rare = record(&["a4", "a5"], GameOutcome::WhiteWin);
        for _ in 0..3 {
            store.ingest(&frequent).unwrap();
        }
        for _ in 0..2 {
            store.ingest(&rare).unwrap();
        }

        let surviving_key = key_after(&["e4"]);
        let before = store.get(Color::White, &surviving_key).unwrap();

        store.prune_outliers(3);

        // Entries at or above the threshold are unchanged.
        assert_eq!(store.get(Color::White, &surviving_key), Some(before));
        assert_eq!(store.len(), 2);
        assert!(store.get(Color::White, &key_after(&["a4"])).is_none());
        assert!(store.get(Color::Black, &key_after(&["a4", "a5"])).is_none());
    }

    #[test]
    fn test_checkpoint_restore_round_trip() {
        let dir = std::env::temp_dir().join("opening-oracle-test-snapshot");
        let _ = fs::remove_dir_all(&dir);

        let mut store = StatisticsStore::new();
        store
            .ingest(&record(&["e4", "c5", "Nf3", "d6"], GameOutcome::WhiteWin))
            .unwrap();
        store
            .ingest(&record(&["e4", "c5", "Nf3", "d6"], GameOutcome::Draw))
            .unwrap();
        store.checkpoint(&dir).unwrap();

        let restored = StatisticsStore::load(&dir).unwrap();
        assert_eq!(restored, store);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_snapshot_is_empty_store() {
        let dir = std::env::temp_dir().join("opening-oracle-test-missing");
        let _ = fs::remove_dir_all(&dir);
        let store = StatisticsStore::load(&dir).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_win_rate() {
        let entry = StatEntry {
            games: 4,
            half_points: 5, // two wins, one draw, one loss
        };
        assert_eq!(entry.win_rate(), 0.625);
        assert_eq!(StatEntry::default().win_rate(), 0.0);
    }
}
