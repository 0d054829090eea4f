//! Continuous contract symbology.
//!
//! Databento expresses a rolling futures series as `{root}.{rule}.{rank}`:
//! - `ES.c.0` - E-mini S&P 500, calendar roll, front contract
//! - `CL.v.0` - Crude Oil, highest volume contract
//! - `GC.n.1` - Gold, second-highest open interest contract
//!
//! An optional fourth part names the venue (`ES.c.0.GLBX`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Roll rule of a continuous symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RollRule {
    /// 'c' - roll by expiration date order
    #[default]
    Calendar,
    /// 'v' - roll to the highest volume contract
    Volume,
    /// 'n' - roll to the highest open interest contract
    OpenInterest,
}

impl RollRule {
    /// Single character code used in the symbol
    pub fn as_char(&self) -> char {
        match self {
            Self::Calendar => 'c',
            Self::Volume => 'v',
            Self::OpenInterest => 'n',
        }
    }

    /// Parse from single character
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'c' => Some(Self::Calendar),
            'v' => Some(Self::Volume),
            'n' => Some(Self::OpenInterest),
            _ => None,
        }
    }
}

impl fmt::Display for RollRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calendar => write!(f, "CALENDAR"),
            Self::Volume => write!(f, "VOLUME"),
            Self::OpenInterest => write!(f, "OPEN_INTEREST"),
        }
    }
}

/// Parsed continuous contract symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuousSymbol {
    /// Root symbol (e.g., "ES", "CL")
    pub root: String,
    /// Roll rule
    pub rule: RollRule,
    /// Depth in the roll chain (0 = front)
    pub rank: u8,
    /// Optional venue suffix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
}

impl ContinuousSymbol {
    /// Create a continuous symbol without venue
    pub fn new(root: impl Into<String>, rule: RollRule, rank: u8) -> Self {
        Self {
            root: root.into(),
            rule,
            rank,
            venue: None,
        }
    }

    /// Front contract with calendar roll (`ROOT.c.0`)
    pub fn front_month(root: impl Into<String>) -> Self {
        Self::new(root, RollRule::Calendar, 0)
    }

    /// Parse `root.rule.rank` or `root.rule.rank.venue`.
    pub fn parse(symbol: &str) -> Result<Self, ContinuousSymbolError> {
        let parts: Vec<&str> = symbol.split('.').collect();

        if parts.len() != 3 && parts.len() != 4 {
            return Err(ContinuousSymbolError::InvalidFormat(format!(
                "expected 'root.rule.rank' or 'root.rule.rank.venue', got '{}'",
                symbol
            )));
        }

        let root = parts[0].to_string();
        if root.is_empty() {
            return Err(ContinuousSymbolError::InvalidFormat(
                "root symbol cannot be empty".to_string(),
            ));
        }

        let mut rule_chars = parts[1].chars();
        let rule = match (rule_chars.next(), rule_chars.next()) {
            (Some(c), None) => RollRule::from_char(c),
            _ => None,
        }
        .ok_or_else(|| {
            ContinuousSymbolError::InvalidRollRule(format!(
                "'{}', expected 'c', 'v', or 'n'",
                parts[1]
            ))
        })?;

        let rank = parts[2].parse::<u8>().map_err(|_| {
            ContinuousSymbolError::InvalidRank(format!(
                "'{}', expected a non-negative integer",
                parts[2]
            ))
        })?;

        let venue = parts.get(3).map(|v| v.to_string());

        Ok(Self {
            root,
            rule,
            rank,
            venue,
        })
    }

    /// Check whether a symbol string uses continuous symbology
    pub fn is_continuous(symbol: &str) -> bool {
        Self::parse(symbol).is_ok()
    }

    /// Symbol string without venue, as sent to the provider
    pub fn to_symbol_string(&self) -> String {
        format!("{}.{}.{}", self.root, self.rule.as_char(), self.rank)
    }
}

impl fmt::Display for ContinuousSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.venue {
            Some(ref venue) => write!(f, "{}.{}", self.to_symbol_string(), venue),
            None => write!(f, "{}", self.to_symbol_string()),
        }
    }
}

impl FromStr for ContinuousSymbol {
    type Err = ContinuousSymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error type for continuous symbol parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContinuousSymbolError {
    #[error("Invalid continuous symbol format: {0}")]
    InvalidFormat(String),

    #[error("Invalid roll rule: {0}")]
    InvalidRollRule(String),

    #[error("Invalid rank: {0}")]
    InvalidRank(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_front_month() {
        let sym = ContinuousSymbol::parse("ES.c.0").unwrap();
        assert_eq!(sym.root, "ES");
        assert_eq!(sym.rule, RollRule::Calendar);
        assert_eq!(sym.rank, 0);
        assert_eq!(sym.venue, None);
        assert_eq!(sym, ContinuousSymbol::front_month("ES"));
    }

    #[test]
    fn test_parse_with_venue() {
        let sym: ContinuousSymbol = "GC.n.2.COMX".parse().unwrap();
        assert_eq!(sym.rule, RollRule::OpenInterest);
        assert_eq!(sym.rank, 2);
        assert_eq!(sym.venue.as_deref(), Some("COMX"));
        assert_eq!(sym.to_string(), "GC.n.2.COMX");
        assert_eq!(sym.to_symbol_string(), "GC.n.2");
    }

    #[test]
    fn test_raw_symbols_are_not_continuous() {
        assert!(!ContinuousSymbol::is_continuous("ES"));
        assert!(!ContinuousSymbol::is_continuous("ESH4"));
        assert!(!ContinuousSymbol::is_continuous("ES.FUT"));
        assert!(ContinuousSymbol::is_continuous("MES.v.1"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            ContinuousSymbol::parse(".c.0"),
            Err(ContinuousSymbolError::InvalidFormat(_))
        ));
        assert!(matches!(
            ContinuousSymbol::parse("ES.x.0"),
            Err(ContinuousSymbolError::InvalidRollRule(_))
        ));
        assert!(matches!(
            ContinuousSymbol::parse("ES.cv.0"),
            Err(ContinuousSymbolError::InvalidRollRule(_))
        ));
        assert!(matches!(
            ContinuousSymbol::parse("ES.c.-1"),
            Err(ContinuousSymbolError::InvalidRank(_))
        ));
    }
}
