//! Weighted linear complexity score for a coding task.

use crate::config::ComplexityPolicy;
use crate::models::{Complexity, StepKind};

const ADD_LINES_PER_NEW_NAME: f64 = 25.0;
const ADD_LINES_PER_TOUCHED_SYMBOL: f64 = 10.0;
const COMPLEXITY_PER_NEW_NAME: f64 = 2.0;

/// Raw, uncapped factors for one task.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ComplexityInputs {
    pub files: usize,
    pub symbol_complexity: f64,
    pub fan_out: usize,
    pub line_delta: f64,
}

impl ComplexityInputs {
    /// Derive factors from what a task touches.
    ///
    /// `touched_complexity` and `touched_lines` are sums over the touched
    /// symbols; `new_names` counts produced names with no symbol yet.
    pub fn estimate(
        kind: StepKind,
        files: usize,
        touched_symbols: usize,
        touched_complexity: u32,
        touched_lines: u32,
        new_names: usize,
        fan_out: usize,
    ) -> Self {
        let line_delta = match kind {
            StepKind::Add => {
                new_names as f64 * ADD_LINES_PER_NEW_NAME
                    + touched_symbols as f64 * ADD_LINES_PER_TOUCHED_SYMBOL
            }
            StepKind::Edit => f64::from(touched_lines) / 2.0,
            StepKind::Remove | StepKind::Refactor => f64::from(touched_lines),
        };
        Self {
            files,
            symbol_complexity: f64::from(touched_complexity)
                + new_names as f64 * COMPLEXITY_PER_NEW_NAME,
            fan_out,
            line_delta,
        }
    }
}

fn factor(value: f64, cap: f64) -> f64 {
    if cap <= 0.0 {
        return 0.0;
    }
    (value / cap).clamp(0.0, 1.0)
}

/// Score in [0, 1], rounded to four decimals so equal inputs always
/// serialize identically.
pub fn score(policy: &ComplexityPolicy, inputs: &ComplexityInputs) -> f64 {
    let raw = policy.file_weight * factor(inputs.files as f64, policy.file_cap)
        + policy.symbol_complexity_weight
            * factor(inputs.symbol_complexity, policy.symbol_complexity_cap)
        + policy.fan_out_weight * factor(inputs.fan_out as f64, policy.fan_out_cap)
        + policy.line_delta_weight * factor(inputs.line_delta, policy.line_delta_cap);
    (raw.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0
}

pub fn label(policy: &ComplexityPolicy, score: f64) -> Complexity {
    if score <= policy.trivial_threshold {
        Complexity::Trivial
    } else if score <= policy.moderate_threshold {
        Complexity::Moderate
    } else {
        Complexity::Complex
    }
}
