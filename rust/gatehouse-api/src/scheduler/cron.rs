//! Cron expression parsing and evaluation.
//!
//! Standard five-field format: `minute hour day month weekday`. Each field
//! is expanded at parse time into a bitmask of allowed values, so matching
//! a timestamp is five bit tests. Fields accept comma-separated terms,
//! where a term is `*`, a single value, a range `a-b`, or either of those
//! with a `/step` suffix; steps count from the start of their range, as
//! cron does. Schedules are evaluated in the local timezone of the node
//! that ticks them.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, TimeZone, Timelike};

/// A parsed cron expression: one allowed-value bitmask per field.
#[derive(Debug, Clone)]
pub struct CronExpression {
    minute: u64,
    hour: u64,
    day: u64,
    month: u64,
    weekday: u64,
}

impl CronExpression {
    /// Parse a five-field cron expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = fields.as_slice() else {
            bail!("cron expression must have 5 fields: {expr}");
        };

        Ok(Self {
            minute: field_mask(minute, 0, 59).context("invalid minute field")?,
            hour: field_mask(hour, 0, 23).context("invalid hour field")?,
            day: field_mask(day, 1, 31).context("invalid day field")?,
            month: field_mask(month, 1, 12).context("invalid month field")?,
            weekday: field_mask(weekday, 0, 6).context("invalid weekday field")?,
        })
    }

    /// Whether the expression matches the given minute.
    pub fn matches<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> bool {
        has_bit(self.minute, time.minute())
            && has_bit(self.hour, time.hour())
            && has_bit(self.day, time.day())
            && has_bit(self.month, time.month())
            && has_bit(self.weekday, time.weekday().num_days_from_sunday())
    }
}

fn has_bit(mask: u64, value: u32) -> bool {
    value < 64 && mask & (1 << value) != 0
}

/// Expand one field into its allowed-value bitmask.
///
/// Every term reduces to a (start, end, step) triple over `min..=max`, so
/// `*`, `7`, `1-5`, `*/15`, and `10-50/10` all go through the same loop.
fn field_mask(field: &str, min: u32, max: u32) -> Result<u64> {
    if field.is_empty() {
        bail!("empty field");
    }

    let mut mask = 0u64;
    for term in field.split(',') {
        let (span, step) = match term.split_once('/') {
            Some((span, step)) => {
                let step: u32 = step.parse().with_context(|| format!("bad step in {term:?}"))?;
                (span, step)
            }
            None => (term, 1),
        };
        if step == 0 {
            bail!("step must be at least 1 in {term:?}");
        }

        let (start, end) = span_bounds(span, min, max)
            .with_context(|| format!("bad term {term:?}, expected {min}-{max}"))?;

        for value in (start..=end).step_by(step as usize) {
            mask |= 1 << value;
        }
    }
    Ok(mask)
}

/// Resolve `*`, `a`, or `a-b` to inclusive bounds within `min..=max`.
fn span_bounds(span: &str, min: u32, max: u32) -> Result<(u32, u32)> {
    let (start, end) = match span {
        "*" => (min, max),
        _ => match span.split_once('-') {
            Some((a, b)) => (a.parse()?, b.parse()?),
            None => {
                let value: u32 = span.parse()?;
                (value, value)
            }
        },
    };
    if start < min || end > max || start > end {
        bail!("out of range");
    }
    Ok((start, end))
}
