//! Cron trigger specifications.
//!
//! Triggers are expressed as named cron fields (`hour`, `minute`, ...) rather
//! than a single expression string, so that operators can post a partial
//! object such as `{"hour": 1, "minute": 0}`. An empty spec means the job is
//! installed paused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{Error, Result};

/// Field names in order of decreasing significance.
pub const FIELD_NAMES: [&str; 7] = [
    "year",
    "month",
    "day",
    "day_of_week",
    "hour",
    "minute",
    "second",
];

const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// A cron trigger made of individually optional fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CronSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second: Option<String>,
}

impl CronSpec {
    /// Build a spec from a JSON object of cron fields.
    ///
    /// Values may be integers or strings (`"*/5"`, `"mon-fri"`). Unknown field
    /// names and non-scalar values are rejected. The result is validated.
    pub fn from_json(fields: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let mut spec = CronSpec::default();
        for (name, value) in fields {
            let value = match value {
                serde_json::Value::String(s) => s.trim().to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(Error::InvalidTrigger(format!(
                        "value for '{}' must be a string or integer, got {}",
                        name, other
                    )));
                }
            };
            spec.set(name, value)?;
        }
        spec.validate()?;
        Ok(spec)
    }

    /// Set a field by name.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let slot = match name {
            "year" => &mut self.year,
            "month" => &mut self.month,
            "day" => &mut self.day,
            "day_of_week" => &mut self.day_of_week,
            "hour" => &mut self.hour,
            "minute" => &mut self.minute,
            "second" => &mut self.second,
            other => {
                return Err(Error::InvalidTrigger(format!(
                    "unsupported cron field: {}",
                    other
                )));
            }
        };
        *slot = Some(value.into());
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&str> {
        match name {
            "year" => self.year.as_deref(),
            "month" => self.month.as_deref(),
            "day" => self.day.as_deref(),
            "day_of_week" => self.day_of_week.as_deref(),
            "hour" => self.hour.as_deref(),
            "minute" => self.minute.as_deref(),
            "second" => self.second.as_deref(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        FIELD_NAMES.iter().all(|name| self.get(name).is_none())
    }

    /// Human-readable description, e.g. `cron[hour='1', minute='0']`.
    pub fn describe(&self) -> String {
        let fields: Vec<String> = FIELD_NAMES
            .iter()
            .filter_map(|name| self.get(name).map(|v| format!("{}='{}'", name, v)))
            .collect();
        format!("cron[{}]", fields.join(", "))
    }

    /// Seven-field expression understood by the `cron` crate
    /// (`sec min hour day-of-month month day-of-week year`).
    ///
    /// Unset fields more significant than the last set field match anything;
    /// those after it take their minimum, except day-of-week which always
    /// defaults to any day.
    pub fn expression(&self) -> Result<String> {
        let last_set = FIELD_NAMES
            .iter()
            .rposition(|name| self.get(name).is_some())
            .ok_or_else(|| Error::InvalidTrigger("no cron fields set".to_string()))?;

        let resolve = |idx: usize| -> String {
            let name = FIELD_NAMES[idx];
            match self.get(name) {
                Some(v) => v.to_string(),
                None if idx > last_set => match name {
                    "month" | "day" => "1".to_string(),
                    "hour" | "minute" | "second" => "0".to_string(),
                    _ => "*".to_string(),
                },
                None => "*".to_string(),
            }
        };

        let day_of_week = translate_day_of_week(&resolve(3))?;
        Ok(format!(
            "{} {} {} {} {} {} {}",
            resolve(6),
            resolve(5),
            resolve(4),
            resolve(2),
            resolve(1),
            day_of_week,
            resolve(0),
        ))
    }

    /// Parse into a `cron::Schedule`, rejecting invalid field combinations.
    pub fn schedule(&self) -> Result<cron::Schedule> {
        let expr = self.expression()?;
        cron::Schedule::from_str(&expr).map_err(|e| {
            Error::InvalidTrigger(format!("{} is not a valid trigger: {}", self.describe(), e))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        self.schedule().map(|_| ())
    }

    /// Next fire time strictly after `after`. `None` for an empty spec or a
    /// trigger that never fires again.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        if self.is_empty() {
            return Ok(None);
        }
        Ok(self.schedule()?.after(&after).next())
    }
}

/// Translate day-of-week values written as 0=Monday..6=Sunday or `mon`..`sun`
/// into the day names the `cron` crate accepts.
fn translate_day_of_week(value: &str) -> Result<String> {
    let atom = |a: &str| -> Result<String> {
        if let Ok(n) = a.parse::<usize>() {
            return DAY_NAMES
                .get(n)
                .map(|d| d.to_string())
                .ok_or_else(|| Error::InvalidTrigger(format!("day_of_week out of range: {}", n)));
        }
        DAY_NAMES
            .iter()
            .find(|d| d.eq_ignore_ascii_case(a))
            .map(|d| d.to_string())
            .ok_or_else(|| Error::InvalidTrigger(format!("unknown day_of_week: {}", a)))
    };

    let mut items = Vec::new();
    for item in value.split(',') {
        let item = item.trim();
        let (base, step) = match item.split_once('/') {
            Some((b, s)) => (b, Some(s)),
            None => (item, None),
        };
        let base = if base == "*" {
            "*".to_string()
        } else if let Some((start, end)) = base.split_once('-') {
            format!("{}-{}", atom(start.trim())?, atom(end.trim())?)
        } else {
            atom(base)?
        };
        items.push(match step {
            Some(s) => format!("{}/{}", base, s),
            None => base,
        });
    }
    Ok(items.join(","))
}
