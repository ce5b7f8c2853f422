//! Editions: the point in time identifying one backup run
//!
//! Every archive carries exactly one edition in its file name, and every
//! ledger row records the edition that archived it.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

/// Rendering used in archive file names (no colons, UTC)
pub const EDITION_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// A backup run's timestamp, at one-second resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edition(DateTime<Utc>);

impl Edition {
    /// The edition for a backup starting now
    pub fn now() -> Self {
        Self(Utc::now().trunc_subsecs(0))
    }

    /// Rebuild an edition from its ledger representation
    pub fn from_unix(secs: i64) -> Result<Self> {
        Utc.timestamp_opt(secs, 0)
            .single()
            .map(Self)
            .ok_or_else(|| Error::InvalidEdition(secs.to_string()))
    }

    /// Parse an edition out of an archive file name fragment
    pub fn parse(s: &str) -> Result<Self> {
        let naive = NaiveDateTime::parse_from_str(s, EDITION_FORMAT)
            .map_err(|_| Error::InvalidEdition(s.to_string()))?;
        Ok(Self(Utc.from_utc_datetime(&naive)))
    }

    /// Seconds since the Unix epoch, as stored in the ledger
    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }

    /// The underlying instant
    pub fn when(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(EDITION_FORMAT))
    }
}

impl FromStr for Edition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
