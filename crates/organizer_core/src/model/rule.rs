//! Recurrence rule model.
//!
//! # Responsibility
//! - Define the closed set of rule kinds an item can carry.
//! - Encode/decode the ordered rule array persisted per item.
//!
//! # Invariants
//! - Rule order is significant: later rules may cancel contributions of
//!   earlier ones, so encoding never reorders.
//! - Persisted rule arrays are written only through `rules_to_json`, after
//!   `Rule::validate()`.
//!
//! All timestamps are unix epoch seconds.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Seconds in one day; interval of the daily rule.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// One persisted recurrence specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// Single occurrence at `start`.
    OccurOnce {
        start: i64,
        #[serde(default)]
        end: Option<i64>,
        /// Alarm rings `alarm_offset` seconds before `start` (negative means after).
        #[serde(default)]
        alarm_offset: Option<i64>,
    },
    /// Occurrences at `reference_start + k * interval` for every integer `k`.
    OccurRegularly {
        reference_start: i64,
        interval: i64,
        #[serde(default)]
        duration: Option<i64>,
        #[serde(default)]
        alarm_offset: Option<i64>,
    },
    /// Cancels occurrences contributed by earlier rules of the same item.
    ExceptOnce {
        start: i64,
        end: i64,
        /// When set, any occurrence overlapping the range is removed, not only
        /// those starting inside it.
        inclusive: bool,
    },
}

/// Dispatch key used to find the resolver for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleTag {
    OccurOnce,
    OccurRegularly,
    ExceptOnce,
}

impl RuleTag {
    /// Stable string id, identical to the persisted `rule` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OccurOnce => "occur_once",
            Self::OccurRegularly => "occur_regularly",
            Self::ExceptOnce => "except_once",
        }
    }
}

impl Display for RuleTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Rule {
    /// Builds a validated occur-once rule.
    pub fn occur_once(
        start: i64,
        end: Option<i64>,
        alarm_offset: Option<i64>,
    ) -> Result<Self, RuleError> {
        let rule = Self::OccurOnce {
            start,
            end,
            alarm_offset,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Builds a validated rule repeating every `interval` seconds.
    pub fn occur_regularly(
        reference_start: i64,
        interval: i64,
        duration: Option<i64>,
        alarm_offset: Option<i64>,
    ) -> Result<Self, RuleError> {
        let rule = Self::OccurRegularly {
            reference_start,
            interval,
            duration,
            alarm_offset,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Builds a validated daily rule anchored at `reference_start`.
    pub fn every_day(
        reference_start: i64,
        duration: Option<i64>,
        alarm_offset: Option<i64>,
    ) -> Result<Self, RuleError> {
        Self::occur_regularly(reference_start, SECONDS_PER_DAY, duration, alarm_offset)
    }

    /// Builds a validated except-once rule.
    pub fn except_once(start: i64, end: i64, inclusive: bool) -> Result<Self, RuleError> {
        let rule = Self::ExceptOnce {
            start,
            end,
            inclusive,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn tag(&self) -> RuleTag {
        match self {
            Self::OccurOnce { .. } => RuleTag::OccurOnce,
            Self::OccurRegularly { .. } => RuleTag::OccurRegularly,
            Self::ExceptOnce { .. } => RuleTag::ExceptOnce,
        }
    }

    /// Validates field-level invariants.
    pub fn validate(&self) -> Result<(), RuleError> {
        match *self {
            Self::OccurOnce { start, end, .. } => match end {
                Some(end) if end < start => Err(RuleError::EndBeforeStart { start, end }),
                _ => Ok(()),
            },
            Self::OccurRegularly {
                interval, duration, ..
            } => {
                if interval <= 0 {
                    return Err(RuleError::NonPositiveInterval(interval));
                }
                match duration {
                    Some(duration) if duration < 0 => Err(RuleError::NegativeDuration(duration)),
                    _ => Ok(()),
                }
            }
            Self::ExceptOnce { start, end, .. } => {
                if end < start {
                    return Err(RuleError::EndBeforeStart { start, end });
                }
                Ok(())
            }
        }
    }
}

/// Encodes an ordered rule list into its persisted JSON array form.
pub fn rules_to_json(rules: &[Rule]) -> Result<String, RuleError> {
    for rule in rules {
        rule.validate()?;
    }
    serde_json::to_string(rules).map_err(|err| RuleError::Encode(err.to_string()))
}

/// Decodes a persisted JSON rule array, preserving order.
pub fn rules_from_json(value: &str) -> Result<Vec<Rule>, RuleError> {
    serde_json::from_str(value).map_err(|err| RuleError::Decode(err.to_string()))
}

/// Rule validation and codec errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    EndBeforeStart { start: i64, end: i64 },
    NonPositiveInterval(i64),
    NegativeDuration(i64),
    Encode(String),
    Decode(String),
}

impl Display for RuleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndBeforeStart { start, end } => {
                write!(f, "rule end {end} is earlier than start {start}")
            }
            Self::NonPositiveInterval(value) => {
                write!(f, "rule interval must be positive, got {value}")
            }
            Self::NegativeDuration(value) => {
                write!(f, "rule duration must not be negative, got {value}")
            }
            Self::Encode(message) => write!(f, "failed to encode rules: {message}"),
            Self::Decode(message) => write!(f, "failed to decode rules: {message}"),
        }
    }
}

impl Error for RuleError {}

#[cfg(test)]
mod tests {
    use super::{rules_from_json, rules_to_json, Rule, RuleError, RuleTag, SECONDS_PER_DAY};

    #[test]
    fn encodes_tagged_objects_in_order() {
        let rules = vec![
            Rule::occur_once(100, Some(200), Some(30)).unwrap(),
            Rule::except_once(100, 150, false).unwrap(),
        ];
        let json = rules_to_json(&rules).unwrap();
        assert!(json.starts_with("[{\"rule\":\"occur_once\""));
        assert!(json.contains("{\"rule\":\"except_once\""));
        assert_eq!(rules_from_json(&json).unwrap(), rules);
    }

    #[test]
    fn decodes_rules_with_missing_optional_fields() {
        let rules =
            rules_from_json(r#"[{"rule":"occur_regularly","reference_start":0,"interval":60}]"#)
                .unwrap();
        assert_eq!(
            rules,
            vec![Rule::OccurRegularly {
                reference_start: 0,
                interval: 60,
                duration: None,
                alarm_offset: None,
            }]
        );
        assert_eq!(rules[0].tag(), RuleTag::OccurRegularly);
    }

    #[test]
    fn empty_rule_list_round_trips_as_empty_array() {
        assert_eq!(rules_to_json(&[]).unwrap(), "[]");
        assert!(rules_from_json("[]").unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_rule_tag() {
        let err = rules_from_json(r#"[{"rule":"occur_fortnightly","start":1}]"#).unwrap_err();
        assert!(matches!(err, RuleError::Decode(_)));
    }

    #[test]
    fn validates_rule_fields() {
        assert_eq!(
            Rule::occur_once(10, Some(5), None).unwrap_err(),
            RuleError::EndBeforeStart { start: 10, end: 5 }
        );
        assert_eq!(
            Rule::occur_regularly(0, 0, None, None).unwrap_err(),
            RuleError::NonPositiveInterval(0)
        );
        assert_eq!(
            Rule::every_day(0, Some(-1), None).unwrap_err(),
            RuleError::NegativeDuration(-1)
        );
        assert!(Rule::except_once(5, 5, true).is_ok());
    }

    #[test]
    fn every_day_uses_daily_interval() {
        let rule = Rule::every_day(3_600, Some(1_800), Some(600)).unwrap();
        assert!(matches!(
            rule,
            Rule::OccurRegularly { interval, .. } if interval == SECONDS_PER_DAY
        ));
        assert_eq!(rule.tag().as_str(), "occur_regularly");
    }

    #[test]
    fn encoding_refuses_invalid_rules() {
        let invalid = Rule::ExceptOnce {
            start: 9,
            end: 1,
            inclusive: false,
        };
        assert!(rules_to_json(&[invalid]).is_err());
    }
}
