//! Condition evaluation.
//!
//! Evaluates strategy conditions against the current indicator readings and,
//! for crossovers, the readings of the previous candle.
//!
//! # Evaluation Semantics
//!
//! - A condition whose indicator or target cannot be resolved is `false`
//! - `above` / `below`: strict comparison at the current candle
//! - `crosses_above`: previous value ≤ previous target and current value > current target
//! - `crosses_below`: previous value ≥ previous target and current value < current target
//! - Crossovers are `false` without previous readings
//! - `MatchMode::All` short-circuits on the first `false`, `MatchMode::Any` on the first `true`
//! - An empty condition list is `false` in both modes

use crate::domain::condition::{Comparison, Condition, IndicatorRef, MatchMode, Target};
use crate::domain::indicator::Readings;

fn resolve_indicator(readings: &Readings, r: &IndicatorRef) -> Option<f64> {
    readings.get(&r.name).and_then(|v| v.field(r.field))
}

fn resolve_target(readings: &Readings, target: &Target) -> Option<f64> {
    match target {
        Target::Value(v) => Some(*v),
        Target::Indicator(r) => resolve_indicator(readings, r),
    }
}

pub fn evaluate_condition(
    condition: &Condition,
    current: &Readings,
    previous: Option<&Readings>,
) -> bool {
    let (Some(value), Some(target)) = (
        resolve_indicator(current, &condition.indicator),
        resolve_target(current, &condition.target),
    ) else {
        return false;
    };

    match condition.comparison {
        Comparison::Above => value > target,
        Comparison::Below => value < target,
        Comparison::CrossesAbove | Comparison::CrossesBelow => {
            let Some(previous) = previous else {
                return false;
            };
            let (Some(prev_value), Some(prev_target)) = (
                resolve_indicator(previous, &condition.indicator),
                resolve_target(previous, &condition.target),
            ) else {
                return false;
            };

            if condition.comparison == Comparison::CrossesAbove {
                prev_value <= prev_target && value > target
            } else {
                prev_value >= prev_target && value < target
            }
        }
    }
}

pub fn evaluate(
    conditions: &[Condition],
    mode: MatchMode,
    current: &Readings,
    previous: Option<&Readings>,
) -> bool {
    if conditions.is_empty() {
        return false;
    }
    match mode {
        MatchMode::All => conditions
            .iter()
            .all(|c| evaluate_condition(c, current, previous)),
        MatchMode::Any => conditions
            .iter()
            .any(|c| evaluate_condition(c, current, previous)),
    }
}

/// Per-condition results, for debug traces.
pub fn condition_results(
    conditions: &[Condition],
    current: &Readings,
    previous: Option<&Readings>,
) -> Vec<bool> {
    conditions
        .iter()
        .map(|c| evaluate_condition(c, current, previous))
        .collect()
}
