//! Content calendar: `topics.txt` parsing and day lookup with wraparound.
//!
//! The calendar file is a sequence of blank-line separated blocks:
//!
//! ```text
//! Day 3
//! Topic: Understanding Crypto Wallets
//! Category: Beginner Guide
//! Additional Details: hot vs cold storage
//! ```
//!
//! `Category:` and `Additional Details:` are optional. Days must run 1..=N without gaps so
//! that a day number and its position in the calendar always agree.
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::model::CalendarEntry;

pub const DEFAULT_CATEGORY: &str = "General";

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("failed to read calendar {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("calendar contains no entries")]
    Empty,
    #[error("calendar day {0} appears more than once")]
    Duplicate(u32),
    #[error("calendar days must be contiguous from 1: expected day {expected}, found day {found}")]
    Gap { expected: u32, found: u32 },
    #[error("calendar day {0} has a blank topic")]
    BlankTopic(u32),
}

/// Map any day >= 1 onto `1..=len`. Day 0 is treated as day 1.
pub fn wrap_day(day: u32, len: usize) -> u32 {
    if len == 0 {
        return 1;
    }
    let len = len as u64;
    ((u64::from(day.max(1)) - 1) % len + 1) as u32
}

/// Cursor value after `day` has been published: `(day % len) + 1`.
pub fn next_day_after(day: u32, len: usize) -> u32 {
    wrap_day(day.max(1).saturating_add(1), len)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calendar {
    entries: Vec<CalendarEntry>,
}

impl Calendar {
    /// Validate and index a set of entries. Order of the input does not matter.
    pub fn from_entries(mut entries: Vec<CalendarEntry>) -> Result<Self, CalendarError> {
        if entries.is_empty() {
            return Err(CalendarError::Empty);
        }
        entries.sort_by_key(|e| e.day);
        for (idx, entry) in entries.iter().enumerate() {
            let expected = idx as u32 + 1;
            if entry.day == expected {
                continue;
            }
            if idx > 0 && entry.day == entries[idx - 1].day {
                return Err(CalendarError::Duplicate(entry.day));
            }
            return Err(CalendarError::Gap {
                expected,
                found: entry.day,
            });
        }
        Ok(Self { entries })
    }

    pub fn parse(raw: &str, categories: &[String]) -> Result<Self, CalendarError> {
        Self::from_entries(parse_blocks(raw, categories))
    }

    pub fn load(path: &Path, categories: &[String]) -> Result<Self, CalendarError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CalendarError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw, categories)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CalendarEntry] {
        &self.entries
    }

    /// Entry for `day`, wrapping past the end of the calendar.
    pub fn entry_for(&self, day: u32) -> Result<&CalendarEntry, CalendarError> {
        let day = wrap_day(day, self.entries.len());
        let entry = &self.entries[(day - 1) as usize];
        if entry.topic.trim().is_empty() {
            return Err(CalendarError::BlankTopic(entry.day));
        }
        Ok(entry)
    }
}

/// Label rotation for entries without an explicit category.
pub fn category_for(day: u32, categories: &[String]) -> String {
    if categories.is_empty() {
        return DEFAULT_CATEGORY.to_string();
    }
    categories[day as usize % categories.len()].clone()
}

fn parse_blocks(raw: &str, categories: &[String]) -> Vec<CalendarEntry> {
    let normalized = raw.replace("\r\n", "\n");
    let mut entries = Vec::new();

    for block in normalized.trim().split("\n\n") {
        let lines: Vec<&str> = block
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() < 2 {
            continue;
        }
        let Some(day_part) = lines[0].strip_prefix("Day") else {
            warn!(line = lines[0], "skipping calendar block without a Day header");
            continue;
        };
        let day = match day_part.trim().trim_end_matches(':').parse::<u32>() {
            Ok(day) if day > 0 => day,
            _ => {
                warn!(line = lines[0], "skipping calendar block with invalid day number");
                continue;
            }
        };

        let topic = lines[1]
            .strip_prefix("Topic:")
            .unwrap_or(lines[1])
            .trim()
            .to_string();

        let mut category = None;
        let mut details = None;
        for line in &lines[2..] {
            if let Some(v) = line.strip_prefix("Category:") {
                category = Some(v.trim().to_string()).filter(|v| !v.is_empty());
            } else if let Some(v) = line.strip_prefix("Additional Details:") {
                details = Some(v.trim().to_string()).filter(|v| !v.is_empty());
            }
        }

        entries.push(CalendarEntry {
            day,
            topic,
            category: category.unwrap_or_else(|| category_for(day, categories)),
            details,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Day 1\nTopic: What is Bitcoin?\nAdditional Details: history and basics\n\n\
Day 2\nTopic: Wallets 101\nCategory: Tools & Tutorials\n\n\
Day 3\nTopic: Staking explained\n";

    fn cats() -> Vec<String> {
        vec!["Beginner Guide".into(), "Crypto Investment".into()]
    }

    #[test]
    fn parses_blocks_with_optional_fields() {
        let cal = Calendar::parse(SAMPLE, &cats()).unwrap();
        assert_eq!(cal.len(), 3);
        let first = cal.entry_for(1).unwrap();
        assert_eq!(first.topic, "What is Bitcoin?");
        assert_eq!(first.details.as_deref(), Some("history and basics"));
        assert_eq!(first.category, "Crypto Investment");
        assert_eq!(cal.entry_for(2).unwrap().category, "Tools & Tutorials");
        assert_eq!(cal.entry_for(3).unwrap().details, None);
    }

    #[test]
    fn skips_malformed_headers() {
        let raw = "Week 1\nTopic: nope\n\nDay x\nTopic: nope\n\nDay 1\nTopic: ok\n";
        let cal = Calendar::parse(raw, &[]).unwrap();
        assert_eq!(cal.len(), 1);
        assert_eq!(cal.entry_for(1).unwrap().category, DEFAULT_CATEGORY);
    }

    #[test]
    fn empty_calendar_is_rejected() {
        assert!(matches!(Calendar::parse("", &[]), Err(CalendarError::Empty)));
        assert!(matches!(
            Calendar::parse("just some text\n", &[]),
            Err(CalendarError::Empty)
        ));
    }

    #[test]
    fn gaps_and_duplicates_are_rejected() {
        let gap = "Day 1\nTopic: a\n\nDay 3\nTopic: c\n";
        assert!(matches!(
            Calendar::parse(gap, &[]),
            Err(CalendarError::Gap { expected: 2, found: 3 })
        ));
        let dup = "Day 1\nTopic: a\n\nDay 1\nTopic: b\n";
        assert!(matches!(
            Calendar::parse(dup, &[]),
            Err(CalendarError::Duplicate(1))
        ));
    }

    #[test]
    fn blank_topic_fails_lookup_only_for_that_day() {
        let raw = "Day 1\nTopic: a\n\nDay 2\nTopic:\n";
        let cal = Calendar::parse(raw, &[]).unwrap();
        assert!(cal.entry_for(1).is_ok());
        assert!(matches!(cal.entry_for(2), Err(CalendarError::BlankTopic(2))));
    }

    #[test]
    fn lookup_wraps_past_the_end() {
        let cal = Calendar::parse(SAMPLE, &cats()).unwrap();
        assert_eq!(cal.entry_for(4).unwrap().day, 1);
        assert_eq!(cal.entry_for(6).unwrap().day, 3);
        assert_eq!(cal.entry_for(0).unwrap().day, 1);
    }

    #[test]
    fn lookup_and_cursor_wraparound_agree() {
        for len in 1..=7usize {
            for day in 1..=(10 * len as u32) {
                let next = next_day_after(day, len);
                assert_eq!(next, (day % len as u32) + 1, "len={len} day={day}");
                assert_eq!(wrap_day(next, len), wrap_day(day + 1, len));
            }
        }
    }

    #[test]
    fn category_rotation_uses_day_modulo() {
        let c = cats();
        assert_eq!(category_for(2, &c), "Beginner Guide");
        assert_eq!(category_for(3, &c), "Crypto Investment");
    }
}
