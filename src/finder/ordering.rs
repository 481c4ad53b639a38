// SPDX-License-Identifier: Apache-2.0

//! Ranking of matched files by values captured from their names.
//!
//! Rotated siblings usually share the include glob (`app.log`, `app.log.1`,
//! `app.2023020612.log`, ...). Ranking picks the currently active file(s):
//! a regex captures named values from each file name, every [`SortRule`]
//! parses one capture, and the rules form a priority chain where later rules
//! only break ties left by earlier ones.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::format::{Item, Parsed, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Ordering configuration for a finder
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderingCriteria {
    /// Regex with named capture groups applied to each file name
    #[serde(default)]
    pub regex: String,

    /// Number of best-ranked files returned
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Sort rules in priority order
    #[serde(default)]
    pub sort_by: Vec<SortRule>,
}

fn default_top_n() -> usize {
    1
}

fn default_location() -> String {
    "UTC".to_string()
}

impl Default for OrderingCriteria {
    fn default() -> Self {
        Self {
            regex: String::new(),
            top_n: default_top_n(),
            sort_by: Vec::new(),
        }
    }
}

impl OrderingCriteria {
    pub fn is_empty(&self) -> bool {
        self.regex.is_empty() && self.sort_by.is_empty()
    }
}

/// A single sort rule. `regex_key` names the capture group it reads.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "sort_type", rename_all = "snake_case")]
pub enum SortRule {
    /// Lexical string comparison
    Alphabetical {
        regex_key: String,
        #[serde(default)]
        ascending: bool,
    },
    /// Integer comparison
    Numeric {
        regex_key: String,
        #[serde(default)]
        ascending: bool,
    },
    /// Time comparison using a strftime-style layout (e.g. `%Y%m%d%H`)
    Timestamp {
        regex_key: String,
        #[serde(default)]
        ascending: bool,
        layout: String,
        /// `UTC`, `Local`, or a fixed offset such as `+05:30`
        #[serde(default = "default_location")]
        location: String,
    },
}

impl SortRule {
    pub fn regex_key(&self) -> &str {
        match self {
            SortRule::Alphabetical { regex_key, .. }
            | SortRule::Numeric { regex_key, .. }
            | SortRule::Timestamp { regex_key, .. } => regex_key,
        }
    }

    pub fn ascending(&self) -> bool {
        match self {
            SortRule::Alphabetical { ascending, .. }
            | SortRule::Numeric { ascending, .. }
            | SortRule::Timestamp { ascending, .. } => *ascending,
        }
    }
}

/// Value extracted from a capture group by a rule
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue {
    Text(String),
    Number(i64),
    Time(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy)]
enum TimeLocation {
    Utc,
    Local,
    Fixed(FixedOffset),
}

impl FromStr for TimeLocation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "" | "UTC" | "utc" | "Etc/UTC" => Ok(TimeLocation::Utc),
            "Local" | "local" => Ok(TimeLocation::Local),
            other => FixedOffset::from_str(other)
                .map(TimeLocation::Fixed)
                .map_err(|_| {
                    format!(
                        "invalid location '{}'. Valid options: UTC, Local, or an offset like +05:30",
                        other
                    )
                }),
        }
    }
}

#[derive(Debug, Clone)]
enum SortKind {
    Alphabetical,
    Numeric,
    Timestamp {
        layout: String,
        location: TimeLocation,
    },
}

/// A sort rule ready for use: location parsed, layout checked.
#[derive(Debug, Clone)]
struct RankRule {
    regex_key: String,
    ascending: bool,
    kind: SortKind,
}

impl RankRule {
    fn new(rule: &SortRule) -> Result<Self> {
        let kind = match rule {
            SortRule::Alphabetical { .. } => SortKind::Alphabetical,
            SortRule::Numeric { .. } => SortKind::Numeric,
            SortRule::Timestamp {
                layout, location, ..
            } => {
                if layout.is_empty() {
                    return Err(Error::Config(
                        "timestamp sort rule requires a layout".to_string(),
                    ));
                }
                if StrftimeItems::new(layout).any(|item| matches!(item, Item::Error)) {
                    return Err(Error::Config(format!(
                        "invalid timestamp layout '{}'",
                        layout
                    )));
                }
                check_layout_round_trip(layout)?;
                let location = location.parse::<TimeLocation>().map_err(Error::Config)?;
                SortKind::Timestamp {
                    layout: layout.clone(),
                    location,
                }
            }
        };

        Ok(Self {
            regex_key: rule.regex_key().to_string(),
            ascending: rule.ascending(),
            kind,
        })
    }

    fn extract(&self, raw: &str) -> std::result::Result<SortValue, String> {
        match &self.kind {
            SortKind::Alphabetical => Ok(SortValue::Text(raw.to_string())),
            SortKind::Numeric => raw
                .parse::<i64>()
                .map(SortValue::Number)
                .map_err(|e| format!("'{}' is not a number: {}", raw, e)),
            SortKind::Timestamp { layout, location } => {
                parse_timestamp(raw, layout, *location).map(SortValue::Time)
            }
        }
    }

    fn compare(&self, a: &SortValue, b: &SortValue) -> Ordering {
        let ord = a.cmp(b);
        if self.ascending { ord } else { ord.reverse() }
    }
}

/// A layout must be able to read back a date it wrote, otherwise no file
/// name could ever match it.
fn check_layout_round_trip(layout: &str) -> Result<()> {
    use std::fmt::Write;

    let reference = Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).single();
    let mut sample = String::new();
    let formatted = match reference {
        Some(t) => write!(sample, "{}", t.format_with_items(StrftimeItems::new(layout))).is_ok(),
        None => false,
    };

    if !formatted {
        return Err(Error::Config(format!(
            "invalid timestamp layout '{}'",
            layout
        )));
    }

    parse_timestamp(&sample, layout, TimeLocation::Utc)
        .map(|_| ())
        .map_err(|e| {
            Error::Config(format!(
                "timestamp layout '{}' cannot identify a date: {}",
                layout, e
            ))
        })
}

fn parse_timestamp(
    value: &str,
    layout: &str,
    location: TimeLocation,
) -> std::result::Result<DateTime<Utc>, String> {
    let mut parsed = Parsed::new();
    chrono::format::parse(&mut parsed, value, StrftimeItems::new(layout))
        .map_err(|e| format!("'{}' does not match layout '{}': {}", value, layout, e))?;

    // Layouts like %Y%m%d%H stop at the hour. Setting a field that was
    // already parsed fails and leaves the parsed value in place.
    let _ = parsed.set_hour(0);
    let _ = parsed.set_minute(0);
    let _ = parsed.set_second(0);

    let date = parsed.to_naive_date().map_err(|e| e.to_string())?;
    let time = parsed.to_naive_time().map_err(|e| e.to_string())?;
    let naive = NaiveDateTime::new(date, time);

    let resolved = match location {
        TimeLocation::Utc => Some(naive.and_utc()),
        TimeLocation::Local => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc)),
        TimeLocation::Fixed(offset) => offset
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.with_timezone(&Utc)),
    };

    resolved.ok_or_else(|| format!("'{}' does not exist in the configured location", value))
}

/// Compiled ordering criteria
#[derive(Debug, Clone)]
pub(crate) struct Ranker {
    regex: Regex,
    top_n: usize,
    rules: Vec<RankRule>,
}

impl Ranker {
    pub(crate) fn new(criteria: &OrderingCriteria) -> Result<Self> {
        if criteria.regex.is_empty() {
            return Err(Error::Config(
                "ordering_criteria.regex must be set when sort rules are configured".to_string(),
            ));
        }
        if criteria.sort_by.is_empty() {
            return Err(Error::Config(
                "ordering_criteria.sort_by must contain at least one rule".to_string(),
            ));
        }
        if criteria.top_n == 0 {
            return Err(Error::Config(
                "ordering_criteria.top_n must be at least 1".to_string(),
            ));
        }

        let regex = Regex::new(&criteria.regex).map_err(|e| Error::Regex(e.to_string()))?;
        let names: Vec<&str> = regex.capture_names().flatten().collect();

        let mut rules = Vec::with_capacity(criteria.sort_by.len());
        for rule in &criteria.sort_by {
            if !names.contains(&rule.regex_key()) {
                return Err(Error::Config(format!(
                    "sort rule key '{}' is not a named capture group in '{}'",
                    rule.regex_key(),
                    criteria.regex
                )));
            }
            rules.push(RankRule::new(rule)?);
        }

        Ok(Self {
            regex,
            top_n: criteria.top_n,
            rules,
        })
    }

    /// Keep the best `top_n` paths, best first. Paths whose name does not
    /// match the regex, or whose captures fail to parse, are dropped.
    pub(crate) fn rank(&self, paths: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut candidates: Vec<(PathBuf, Vec<SortValue>)> = paths
            .into_iter()
            .filter_map(|path| {
                let values = self.extract(&path)?;
                Some((path, values))
            })
            .collect();

        // Stable sort: full ties keep the lexical order of the input
        candidates.sort_by(|(_, a), (_, b)| self.compare(a, b));
        candidates.truncate(self.top_n);

        candidates.into_iter().map(|(path, _)| path).collect()
    }

    fn extract(&self, path: &Path) -> Option<Vec<SortValue>> {
        let name = path.file_name()?.to_str()?;
        let captures = self.regex.captures(name)?;

        let mut values = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let raw = captures.name(&rule.regex_key)?.as_str();
            match rule.extract(raw) {
                Ok(value) => values.push(value),
                Err(e) => {
                    debug!(path = ?path, key = %rule.regex_key, "Dropping file from ranking: {}", e);
                    return None;
                }
            }
        }
        Some(values)
    }

    fn compare(&self, a: &[SortValue], b: &[SortValue]) -> Ordering {
        self.rules
            .iter()
            .zip(a.iter().zip(b.iter()))
            .map(|(rule, (a, b))| rule.compare(a, b))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}
