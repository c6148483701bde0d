use crate::error::SessionError;
use crate::key::position_key;
use crate::store::{StatEntry, StatisticsStore};
use shakmaty::{Chess, Color, Position, san::SanPlus};
use std::fmt::Write;
use std::sync::Arc;

/// Candidates with fewer than 1% of the games seen across all
/// candidates at a position are noise.
const NOISE_FLOOR_PERCENT: u64 = 1;
/// Candidates below this win rate (in half-points per game, 0.35 =
/// 7/20) are unlikely choices and, if chosen anyway, favorable.
const RATE_FLOOR: (u64, u64) = (7, 10);

/// One ranked candidate move, rendered in SAN relative to the position
/// it was generated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub san: String,
    pub games: u64,
    pub half_points: u64,
}

impl Suggestion {
    pub fn win_rate(&self) -> f64 {
        if self.games == 0 {
            return 0.0;
        }
        self.half_points as f64 / (2 * self.games) as f64
    }

    fn passes_rate_floor(&self) -> bool {
        let (num, den) = RATE_FLOOR;
        // half_points / (2 * games) >= 7/20
        self.half_points * den >= self.games * num
    }
}

/// Result of a query against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Exact-line statistics for the position just reached by the
    /// advised side's own move.
    Direct(StatEntry),
    /// Ranked candidate moves for the advised side, best first.
    Ranked(Vec<Suggestion>),
    /// Candidates had statistics, but every one was filtered out.
    NoSurvivors,
    /// No legal continuation has any statistics; the line is unexplored.
    Unexplored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Active,
    Exhausted,
}

/// A stateful walkthrough over a loaded, immutable store. Sessions are
/// read-only against the store; any number may share one snapshot.
pub struct QuerySession {
    store: Arc<StatisticsStore>,
    advised: Color,
    sans: Vec<String>,
    /// Positions before each entered ply; `current` is the live board.
    history: Vec<Chess>,
    current: Chess,
    suggestion: Option<Suggestion>,
    state: SessionState,
}

impl QuerySession {
    pub fn new(store: Arc<StatisticsStore>, advised: Color) -> Self {
        Self {
            store,
            advised,
            sans: Vec::new(),
            history: Vec::new(),
            current: Chess::default(),
            suggestion: None,
            state: SessionState::Empty,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn advised(&self) -> Color {
        self.advised
    }

    pub fn suggestion(&self) -> Option<&Suggestion> {
        self.suggestion.as_ref()
    }

    /// The move sequence so far, with move-number labels.
    pub fn current_line(&self) -> String {
        let mut out = String::new();
        for (ply, san) in self.sans.iter().enumerate() {
            if !out.is_empty() {
                out.push(' ');
            }
            if ply.is_multiple_of(2) {
                let _ = write!(out, "{}. ", ply / 2 + 1);
            }
            out.push_str(san);
        }
        out
    }

    /// Validates and appends one or more whitespace-separated SAN moves,
    /// then re-queries. All moves are validated before any is committed:
    /// on failure the session is unchanged.
    pub fn enter_move(&mut self, text: &str) -> Result<Lookup, SessionError> {
        let mut scratch = self.current.clone();
        let mut appended = Vec::new();
        let mut befores = Vec::new();

        let mut any = false;
        for token in text.split_whitespace() {
            any = true;
            let san: SanPlus = token
                .parse()
                .map_err(|_| SessionError::InvalidMove(token.to_string()))?;
            let m = san
                .san
                .to_move(&scratch)
                .map_err(|_| SessionError::InvalidMove(token.to_string()))?;
            befores.push(scratch.clone());
            let canonical = SanPlus::from_move_and_play_unchecked(&mut scratch, m);
            appended.push(canonical.to_string());
        }
        if !any {
            return Err(SessionError::InvalidMove(text.to_string()));
        }

        self.sans.extend(appended);
        self.history.extend(befores);
        self.current = scratch;
        self.suggestion = None;
        Ok(self.lookup())
    }

    /// Queries the store for the current position.
    ///
    /// With the advised side to move, every legal move is keyed and the
    /// matching entries are ranked; the top candidate becomes the
    /// session suggestion. With the opponent to move (the advised side
    /// just moved), the position's own entry is fetched directly: how
    /// this exact line has performed.
    pub fn lookup(&mut self) -> Lookup {
        let outcome = if self.current.turn() == self.advised {
            self.ranked(1)
        } else {
            self.direct()
        };
        self.transition(&outcome);
        outcome
    }

    /// Re-runs the ranked branch, returning up to `k` candidates.
    pub fn rank_expand(&mut self, k: usize) -> Lookup {
        let outcome = self.ranked(k.max(1));
        self.transition(&outcome);
        outcome
    }

    /// Appends the top-ranked candidate from the last query.
    pub fn accept_suggestion(&mut self) -> Result<Lookup, SessionError> {
        let san = self
            .suggestion
            .as_ref()
            .map(|s| s.san.clone())
            .ok_or(SessionError::NoSuggestion)?;
        self.enter_move(&san)
    }

    /// Removes the last two ply, returning to the advised side's
    /// previous decision point. Defined (a no-op) on an empty session.
    pub fn undo(&mut self) {
        for _ in 0..2 {
            if let Some(prev) = self.history.pop() {
                self.current = prev;
                self.sans.pop();
            }
        }
        self.suggestion = None;
        self.state = if self.sans.is_empty() {
            SessionState::Empty
        } else {
            SessionState::Active
        };
    }

    pub fn new_game(&mut self) {
        self.sans.clear();
        self.history.clear();
        self.current = Chess::default();
        self.suggestion = None;
        self.state = SessionState::Empty;
    }

    fn transition(&mut self, outcome: &Lookup) {
        self.state = match outcome {
            Lookup::NoSurvivors | Lookup::Unexplored => SessionState::Exhausted,
            _ if self.sans.is_empty() => SessionState::Empty,
            _ => SessionState::Active,
        };
    }

    fn direct(&self) -> Lookup {
        match self.store.get(self.advised, &position_key(&self.current)) {
            Some(entry) => Lookup::Direct(entry),
            None => Lookup::Unexplored,
        }
    }

    fn ranked(&mut self, k: usize) -> Lookup {
        let mut candidates = Vec::new();
        for m in self.current.legal_moves() {
            let mut child = self.current.clone();
            let san = SanPlus::from_move_and_play_unchecked(&mut child, m);
            if let Some(entry) = self.store.get(self.advised, &position_key(&child)) {
                candidates.push(Suggestion {
                    san: san.to_string(),
                    games: entry.games,
                    half_points: entry.half_points,
                });
            }
        }

        if candidates.is_empty() {
            self.suggestion = None;
            return Lookup::Unexplored;
        }

        let survivors = filter_and_rank(candidates, k);
        match survivors.first() {
            Some(top) => {
                self.suggestion = Some(top.clone());
                Lookup::Ranked(survivors)
            }
            None => {
                self.suggestion = None;
                Lookup::NoSurvivors
            }
        }
    }
}

/// Applies the noise and win-rate floors, sorts by win rate (ties:
/// sample size, then SAN, for run-to-run determinism), and keeps the
/// top `k`. Comparison is exact integer arithmetic throughout.
fn filter_and_rank(candidates: Vec<Suggestion>, k: usize) -> Vec<Suggestion> {
    let total: u64 = candidates.iter().map(|c| c.games).sum();

    let mut survivors: Vec<Suggestion> = candidates
        .into_iter()
        .filter(|c| c.games * 100 >= total * NOISE_FLOOR_PERCENT)
        .filter(Suggestion::passes_rate_floor)
        .collect();

    survivors.sort_by(|a, b| {
        // win rate descending via cross-multiplication
        (b.half_points * a.games)
            .cmp(&(a.half_points * b.games))
            .then(b.games.cmp(&a.games))
            .then(a.san.cmp(&b.san))
    });
    survivors.truncate(k);
    survivors
}
