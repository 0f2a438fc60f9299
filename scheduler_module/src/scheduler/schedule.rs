use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;

use super::types::SchedulerError;

/// Compile a standard 5-field cron expression
/// (minute hour day-of-month month day-of-week).
///
/// The `cron` crate wants a seconds field and follows the Quartz
/// day-of-week convention (SUN=1..SAT=7), so a constant `0` seconds field
/// is prepended and numeric day-of-week ordinals are shifted from the
/// standard 0-7 scale (Sunday = 0 or 7). Names pass through unchanged, as
/// do out-of-range numerics so the parser rejects them.
pub fn compile_cron_expression(expression: &str) -> Result<CronSchedule, SchedulerError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(SchedulerError::InvalidCron(fields.len()));
    }
    let normalized = format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        shift_day_of_week(fields[4])
    );
    Ok(CronSchedule::from_str(&normalized)?)
}

/// The first fire strictly after `after`, or `None` if the schedule is
/// exhausted.
pub fn next_run_after(schedule: &CronSchedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

fn shift_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(shift_part)
        .collect::<Vec<_>>()
        .join(",")
}

fn shift_part(part: &str) -> String {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (part, None),
    };
    let shifted = match range.split_once('-') {
        Some((start, end)) => match (start.parse::<u8>(), end.parse::<u8>()) {
            (Ok(start), Ok(end)) if start <= 7 && end <= 7 => {
                return expand_numeric_range(start, end, step)
                    .unwrap_or_else(|| part.to_string());
            }
            _ => format!("{}-{}", shift_ordinal(start), shift_ordinal(end)),
        },
        None => shift_ordinal(range),
    };
    match step {
        Some(step) => format!("{}/{}", shifted, step),
        None => shifted,
    }
}

/// Numeric ranges expand into an explicit list of shifted ordinals:
/// shifting the endpoints independently would corrupt any range touching
/// Sunday (`5-7` would become the inverted `6-1`, `0-7` the Sunday-only
/// `1-1`). A range with end < start wraps through Sunday.
fn expand_numeric_range(start: u8, end: u8, step: Option<&str>) -> Option<String> {
    let step = match step {
        Some(raw) => raw.parse::<usize>().ok().filter(|value| *value > 0)?,
        None => 1,
    };
    let ordinals: Vec<u8> = if start <= end {
        (start..=end).collect()
    } else {
        (start..=7).chain(0..=end).collect()
    };
    let mut quartz: Vec<u8> = ordinals
        .into_iter()
        .step_by(step)
        .map(|ordinal| (ordinal % 7) + 1)
        .collect();
    quartz.sort_unstable();
    quartz.dedup();
    Some(
        quartz
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn shift_ordinal(token: &str) -> String {
    match token.parse::<u8>() {
        Ok(value) if value <= 7 => ((value % 7) + 1).to_string(),
        _ => token.to_string(),
    }
}
