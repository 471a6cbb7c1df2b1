//! Range types for ordered-set queries.

/// One end of a score interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    /// No bound on this end.
    Open,
    /// Inclusive bound.
    Incl(f64),
    /// Exclusive bound.
    Excl(f64),
}

/// A score interval for range-by-score and count-by-score operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    /// Lower end of the interval.
    pub min: ScoreBound,
    /// Upper end of the interval.
    pub max: ScoreBound,
}

impl ScoreRange {
    /// The unbounded interval.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            min: ScoreBound::Open,
            max: ScoreBound::Open,
        }
    }

    /// Closed interval `[min, max]`.
    #[must_use]
    pub const fn closed(min: f64, max: f64) -> Self {
        Self {
            min: ScoreBound::Incl(min),
            max: ScoreBound::Incl(max),
        }
    }

    /// Interval `[min, +inf)`.
    #[must_use]
    pub const fn at_least(min: f64) -> Self {
        Self {
            min: ScoreBound::Incl(min),
            max: ScoreBound::Open,
        }
    }

    /// Interval `(-inf, max]`.
    #[must_use]
    pub const fn at_most(max: f64) -> Self {
        Self {
            min: ScoreBound::Open,
            max: ScoreBound::Incl(max),
        }
    }

    /// Degenerate interval `[value, value]`.
    #[must_use]
    pub const fn exact(value: f64) -> Self {
        Self::closed(value, value)
    }

    /// Whether `score` falls inside the interval.
    #[must_use]
    pub fn contains(&self, score: f64) -> bool {
        let above_min = match self.min {
            ScoreBound::Open => true,
            ScoreBound::Incl(min) => score >= min,
            ScoreBound::Excl(min) => score > min,
        };
        let below_max = match self.max {
            ScoreBound::Open => true,
            ScoreBound::Incl(max) => score <= max,
            ScoreBound::Excl(max) => score < max,
        };
        above_min && below_max
    }
}

/// One end of a lexicographic interval over ordered-set members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexBound {
    /// No bound on this end.
    Open,
    /// Inclusive bound.
    Incl(String),
    /// Exclusive bound.
    Excl(String),
    /// Upper bound covering exactly the strings that start with the given
    /// prefix. Only meaningful as a `max` bound.
    PrefixEnd(String),
}

/// A lexicographic interval for range-by-lex and count-by-lex operations.
///
/// Lexicographic ranges are only well-defined when the queried members
/// share a single score, which is how the index layer uses them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexRange {
    /// Lower end of the interval.
    pub min: LexBound,
    /// Upper end of the interval.
    pub max: LexBound,
}

impl LexRange {
    /// The unbounded interval.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            min: LexBound::Open,
            max: LexBound::Open,
        }
    }

    /// The interval of exactly the members starting with `prefix`.
    ///
    /// An empty prefix yields the unbounded interval.
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Self::all();
        }
        Self {
            min: LexBound::Incl(prefix.clone()),
            max: LexBound::PrefixEnd(prefix),
        }
    }

    /// Whether `member` falls inside the interval.
    #[must_use]
    pub fn contains(&self, member: &str) -> bool {
        let above_min = match &self.min {
            LexBound::Open => true,
            LexBound::Incl(min) => member >= min.as_str(),
            LexBound::Excl(min) => member > min.as_str(),
            // A PrefixEnd used as a min admits nothing above the prefix run.
            LexBound::PrefixEnd(p) => member >= p.as_str() && !member.starts_with(p.as_str()),
        };
        let below_max = match &self.max {
            LexBound::Open => true,
            LexBound::Incl(max) => member <= max.as_str(),
            LexBound::Excl(max) => member < max.as_str(),
            LexBound::PrefixEnd(p) => member < p.as_str() || member.starts_with(p.as_str()),
        };
        above_min && below_max
    }

    /// The least member value that can fall inside the interval, used to
    /// seek into an ordered structure before scanning forward.
    #[must_use]
    pub fn scan_floor(&self) -> Option<&str> {
        match &self.min {
            LexBound::Open => None,
            LexBound::Incl(s) | LexBound::Excl(s) | LexBound::PrefixEnd(s) => Some(s.as_str()),
        }
    }

    /// Whether every member at or beyond `member` is out of the interval,
    /// allowing a forward scan to stop early.
    #[must_use]
    pub fn past_end(&self, member: &str) -> bool {
        match &self.max {
            LexBound::Open => false,
            LexBound::Incl(max) => member > max.as_str(),
            LexBound::Excl(max) => member >= max.as_str(),
            LexBound::PrefixEnd(p) => member > p.as_str() && !member.starts_with(p.as_str()),
        }
    }
}
