use crate::types::{FilterConfig, GameOutcome, OPENING_PLY, OpeningRecord, SanList};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::io::BufRead;
use tracing::{debug, warn};

/// Result tokens, longest first so that `1/2-1/2` is never matched as a
/// truncated `1/2`.
const RESULT_TOKENS: [&str; 4] = ["1/2-1/2", "1/2", "1-0", "0-1"];

/// Rejection counters for one filter pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub accepted: u64,
    pub variant_rejects: u64,
    pub rating_rejects: u64,
    pub time_rejects: u64,
    pub short_rejects: u64,
    pub malformed_rejects: u64,
}

impl FilterStats {
    pub fn rejected(&self) -> u64 {
        self.variant_rejects
            + self.rating_rejects
            + self.time_rejects
            + self.short_rejects
            + self.malformed_rejects
    }
}

/// Header gates for the record currently being scanned. Reset whenever
/// an `[Event` tag opens the next record.
#[derive(Debug, Clone, Default)]
struct HeaderGates {
    variant_rejected: bool,
    total_seconds: Option<u32>,
    white_elo: Option<u32>,
    black_elo: Option<u32>,
}

enum GateVerdict {
    Accept,
    Variant,
    Time,
    Rating,
}

impl HeaderGates {
    fn verdict(&self, config: &FilterConfig) -> GateVerdict {
        if self.variant_rejected {
            return GateVerdict::Variant;
        }
        match self.total_seconds {
            Some(total) if config.time_class.contains_total(total) => {}
            _ => return GateVerdict::Time,
        }
        match (self.white_elo, self.black_elo) {
            (Some(w), Some(b)) if config.accepts_elo(w) && config.accepts_elo(b) => {}
            _ => return GateVerdict::Rating,
        }
        GateVerdict::Accept
    }
}

/// Lazily filters a raw multi-game stream into [`OpeningRecord`]s.
///
/// The scan is purely textual; no move is replayed here. Most of a raw
/// stream is out-of-range noise, and replay is the expensive step.
pub struct OpeningFilter<R: BufRead> {
    reader: R,
    config: FilterConfig,
    gates: HeaderGates,
    pending: VecDeque<OpeningRecord>,
    line: String,
    stats: FilterStats,
    done: bool,
}

impl<R: BufRead> OpeningFilter<R> {
    pub fn new(reader: R, config: FilterConfig) -> Self {
        Self {
            reader,
            config,
            gates: HeaderGates::default(),
            pending: VecDeque::new(),
            line: String::new(),
            stats: FilterStats::default(),
            done: false,
        }
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    fn scan_tag(&mut self, line: &str) {
        let Some(name) = tag_name(line) else { return };
        match name {
            "Event" => self.gates = HeaderGates::default(),
            "Variant" => {
                if tag_value(line) != Some("Standard") {
                    self.gates.variant_rejected = true;
                }
            }
            "TimeControl" => {
                self.gates.total_seconds = tag_value(line).and_then(total_seconds);
            }
            "WhiteElo" => {
                self.gates.white_elo = tag_value(line).and_then(|v| v.parse().ok());
            }
            "BlackElo" => {
                self.gates.black_elo = tag_value(line).and_then(|v| v.parse().ok());
            }
            _ => {}
        }
    }

    /// Evaluates a move-list line against the current header gates and
    /// queues every record it yields (a producer defect can glue two
    /// records onto one line).
    fn scan_moveline(&mut self, line: &str) {
        match self.gates.verdict(&self.config) {
            GateVerdict::Accept => {}
            GateVerdict::Variant => {
                self.stats.variant_rejects += 1;
                return;
            }
            GateVerdict::Time => {
                self.stats.time_rejects += 1;
                return;
            }
            GateVerdict::Rating => {
                self.stats.rating_rejects += 1;
                return;
            }
        }

        for segment in split_implicit_boundaries(line) {
            match normalize_record(segment) {
                Ok(record) => {
                    self.stats.accepted += 1;
                    self.pending.push_back(record);
                }
                Err(Rejection::TooShort) => {
                    self.stats.short_rejects += 1;
                }
                Err(Rejection::Malformed) => {
                    self.stats.malformed_rejects += 1;
                    debug!(segment, "malformed move list skipped");
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for OpeningFilter<R> {
    type Item = OpeningRecord;

    fn next(&mut self) -> Option<OpeningRecord> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(record);
            }
            if self.done {
                return None;
            }

            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.done = true;
                }
                Ok(_) => {
                    let line = self.line.trim_end_matches(['\n', '\r']).to_owned();
                    if line.starts_with('[') {
                        self.scan_tag(&line);
                    } else if line.starts_with("1.") {
                        self.scan_moveline(&line);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "stream read failed, stopping scan");
                    self.done = true;
                }
            }
        }
    }
}

enum Rejection {
    TooShort,
    Malformed,
}

fn tag_name(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find([' ', '"', ']'])?;
    Some(&rest[..end])
}

fn tag_value(line: &str) -> Option<&str> {
    let start = line.find('"')? + 1;
    let end = line.rfind('"')?;
    if end < start {
        return None;
    }
    line.get(start..end)
}

/// Total time estimate for a `TimeControl` tag value: base plus 60
/// seconds per increment point. Daily controls (`1/86400`) and unknown
/// markers do not parse.
fn total_seconds(value: &str) -> Option<u32> {
    if value.contains('/') {
        return None;
    }
    match value.split_once('+') {
        Some((base, inc)) => {
            let base: u32 = base.parse().ok()?;
            let inc: u32 = inc.parse().ok()?;
            base.checked_add(inc.checked_mul(60)?)
        }
        None => value.parse().ok(),
    }
}

/// Splits a move-list line wherever a result token is immediately
/// followed by `1` with no separator: the producer's concurrent appends
/// are known to drop the line break between two records.
fn split_implicit_boundaries(line: &str) -> SmallVec<[&str; 2]> {
    let mut segments = SmallVec::new();
    let mut rest = line;

    'outer: loop {
        let bytes = rest.as_bytes();
        for i in 0..bytes.len() {
            if i > 0 && !bytes[i - 1].is_ascii_whitespace() {
                continue;
            }
            for token in RESULT_TOKENS {
                let end = i + token.len();
                // Byte comparison: `i` may fall inside a multibyte
                // character, where slicing the str would panic. A match
                // proves both bounds are ASCII boundaries.
                if bytes[i..].starts_with(token.as_bytes()) && bytes.get(end) == Some(&b'1') {
                    segments.push(&rest[..end]);
                    rest = &rest[end..];
                    continue 'outer;
                }
            }
        }
        segments.push(rest);
        return segments;
    }
}

/// Strips balanced (possibly nested) `{ ... }` comment spans, collapses
/// runs of whitespace, and deletes the dangling move-number fragment in
/// front of an ellipsis continuation marker.
pub fn strip_annotations(moveline: &str) -> String {
    let mut result = String::with_capacity(moveline.len());
    let mut brace_depth = 0u32;
    let mut prev_was_space = false;
    let mut dot_run = 0u8;

    for ch in moveline.chars() {
        if ch != '.' || brace_depth > 0 {
            dot_run = 0;
        }
        match ch {
            '{' => {
                brace_depth += 1;
            }
            '}' => {
                brace_depth = brace_depth.saturating_sub(1);
                if brace_depth == 0 {
                    prev_was_space = true;
                }
            }
            _ if brace_depth > 0 => {}
            '.' => {
                dot_run += 1;
                if dot_run == 3 {
                    // Ellipsis: the move-number fragment before it is a
                    // continuation label, not a token.
                    while !result.is_empty() && !result.ends_with(' ') {
                        result.pop();
                    }
                    prev_was_space = true;
                    dot_run = 0;
                } else {
                    result.push('.');
                    prev_was_space = false;
                }
            }
            c if c.is_whitespace() => {
                if !prev_was_space && !result.is_empty() {
                    result.push(' ');
                    prev_was_space = true;
                }
            }
            c => {
                result.push(c);
                prev_was_space = false;
            }
        }
    }

    result.trim_end().to_string()
}

/// Normalizes one move-list segment into an [`OpeningRecord`].
fn normalize_record(segment: &str) -> Result<OpeningRecord, Rejection> {
    let segment = segment.trim();

    // A ply separator in the third column marks a black-to-start or
    // variant fragment, rejected before any further work.
    if segment.as_bytes().get(2) == Some(&b'.') {
        return Err(Rejection::Malformed);
    }

    let stripped = strip_annotations(segment);

    let mut sans: SanList = SmallVec::new();
    let mut outcome = None;
    for token in stripped.split_whitespace() {
        if token.ends_with('.') {
            continue; // move-number label
        }
        if let Some(parsed) = GameOutcome::from_token(token) {
            outcome = Some(parsed);
            break;
        }
        if sans.len() < OPENING_PLY {
            sans.push(token.to_string());
        }
    }

    let outcome = outcome.ok_or(Rejection::Malformed)?;
    if sans.len() < OPENING_PLY {
        return Err(Rejection::TooShort);
    }
    Ok(OpeningRecord { sans, outcome })
}
