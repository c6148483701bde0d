use shakmaty::Color;
use smallvec::SmallVec;

/// Opening records are truncated to this many half-moves.
pub const OPENING_PLY: usize = 24;

pub type SanList = SmallVec<[String; OPENING_PLY]>;

/// Final result of a game, as declared by its result token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    WhiteWin,
    BlackWin,
    Draw,
}

impl GameOutcome {
    /// Parses a result token. `1/2` is accepted alongside `1/2-1/2`
    /// because the producing stream is known to truncate draw tokens.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "1-0" => Some(Self::WhiteWin),
            "0-1" => Some(Self::BlackWin),
            "1/2-1/2" | "1/2" => Some(Self::Draw),
            _ => None,
        }
    }

    /// Outcome value from `side`'s perspective, in half-points:
    /// 2 for a win, 1 for a draw, 0 for a loss.
    pub fn half_points_for(self, side: Color) -> u64 {
        match (self, side) {
            (Self::WhiteWin, Color::White) | (Self::BlackWin, Color::Black) => 2,
            (Self::Draw, _) => 1,
            _ => 0,
        }
    }
}

/// One accepted game, reduced to its opening phase: exactly
/// [`OPENING_PLY`] half-moves in SAN plus the game outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpeningRecord {
    pub sans: SanList,
    pub outcome: GameOutcome,
}

/// Time-control class, each a closed-open interval over the total time
/// estimate base + 60 * increment (seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeClass {
    Bullet,
    Blitz,
    Rapid,
}

impl TimeClass {
    pub fn seconds(self) -> std::ops::Range<u32> {
        match self {
            Self::Bullet => 0..180,
            Self::Blitz => 180..600,
            Self::Rapid => 600..3600,
        }
    }

    pub fn contains_total(self, total_seconds: u32) -> bool {
        self.seconds().contains(&total_seconds)
    }
}

/// Acceptance criteria for the filter pass.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Inclusive rating range; both players must fall inside it.
    pub elo_min: u32,
    pub elo_max: u32,
    pub time_class: TimeClass,
}

impl FilterConfig {
    pub fn accepts_elo(&self, elo: u32) -> bool {
        elo >= self.elo_min && elo <= self.elo_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_token() {
        assert_eq!(GameOutcome::from_token("1-0"), Some(GameOutcome::WhiteWin));
        assert_eq!(GameOutcome::from_token("0-1"), Some(GameOutcome::BlackWin));
        assert_eq!(GameOutcome::from_token("1/2-1/2"), Some(GameOutcome::Draw));
        assert_eq!(GameOutcome::from_token("1/2"), Some(GameOutcome::Draw));
        assert_eq!(GameOutcome::from_token("*"), None);
        assert_eq!(GameOutcome::from_token("e4"), None);
    }

    #[test]
    fn test_half_points_per_perspective() {
        assert_eq!(GameOutcome::WhiteWin.half_points_for(Color::White), 2);
        assert_eq!(GameOutcome::WhiteWin.half_points_for(Color::Black), 0);
        assert_eq!(GameOutcome::BlackWin.half_points_for(Color::White), 0);
        assert_eq!(GameOutcome::BlackWin.half_points_for(Color::Black), 2);
        assert_eq!(GameOutcome::Draw.half_points_for(Color::White), 1);
        assert_eq!(GameOutcome::Draw.half_points_for(Color::Black), 1);
    }

    #[test]
    fn test_time_class_boundaries() {
        assert!(TimeClass::Bullet.contains_total(0));
        assert!(TimeClass::Bullet.contains_total(179));
        assert!(!TimeClass::Bullet.contains_total(180));
        assert!(TimeClass::Blitz.contains_total(180));
        assert!(!TimeClass::Blitz.contains_total(600));
        assert!(TimeClass::Rapid.contains_total(600));
        assert!(!TimeClass::Rapid.contains_total(3600));
    }

    #[test]
    fn test_elo_range_is_inclusive() {
        let config = FilterConfig {
            elo_min: 1500,
            elo_max: 1700,
            time_class: TimeClass::Blitz,
        };
        assert!(config.accepts_elo(1500));
        assert!(config.accepts_elo(1700));
        assert!(!config.accepts_elo(1499));
        assert!(!config.accepts_elo(1701));
    }
}
