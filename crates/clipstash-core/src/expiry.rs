//! Time-to-live selection for local entries
//!
//! Only picks which entries are old enough to go. Scheduling the check is
//! the host's job; deleting goes through the store so favorites stay.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{Entry, EntryId};

/// Unit of a TTL amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    /// Thirty days
    Months,
}

impl TtlUnit {
    pub fn as_millis(self) -> i64 {
        match self {
            TtlUnit::Minutes => 60_000,
            TtlUnit::Hours => 3_600_000,
            TtlUnit::Days => 86_400_000,
            TtlUnit::Weeks => 604_800_000,
            TtlUnit::Months => 2_592_000_000,
        }
    }
}

impl FromStr for TtlUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim_end_matches('s') {
            "minute" => Ok(TtlUnit::Minutes),
            "hour" => Ok(TtlUnit::Hours),
            "day" => Ok(TtlUnit::Days),
            "week" => Ok(TtlUnit::Weeks),
            "month" => Ok(TtlUnit::Months),
            other => Err(format!("unknown TTL unit '{}'", other)),
        }
    }
}

/// How long local entries are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTtl {
    pub amount: u32,
    pub unit: TtlUnit,
}

impl LocalTtl {
    pub fn new(amount: u32, unit: TtlUnit) -> Self {
        Self { amount, unit }
    }

    pub fn as_millis(&self) -> i64 {
        i64::from(self.amount) * self.unit.as_millis()
    }
}

impl fmt::Display for LocalTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            TtlUnit::Minutes => "minutes",
            TtlUnit::Hours => "hours",
            TtlUnit::Days => "days",
            TtlUnit::Weeks => "weeks",
            TtlUnit::Months => "months",
        };
        write!(f, "{} {}", self.amount, unit)
    }
}

/// Parses `"<amount> <unit>"`, e.g. `"7 days"` or `"1 hour"`
impl FromStr for LocalTtl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("expected '<amount> <unit>', got '{}'", s));
        };
        let amount = amount
            .parse()
            .map_err(|_| format!("invalid TTL amount '{}'", amount))?;
        Ok(LocalTtl::new(amount, unit.parse()?))
    }
}

/// Ids of entries created at least `ttl` before `now`
pub fn expired_ids(entries: &[Entry], ttl: &LocalTtl, now: i64) -> Vec<EntryId> {
    let max_age = ttl.as_millis();
    entries
        .iter()
        .filter(|e| now.saturating_sub(e.created_at) >= max_age)
        .map(|e| e.id.clone())
        .collect()
}
