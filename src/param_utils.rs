use crate::error::EngineError;
use crate::models::{ParameterRange, ParameterSet};
use std::collections::HashSet;

/// Extract a parameter as usize, rounded, with a default and a minimum
pub fn get_param_usize(params: &ParameterSet, key: &str, default: usize, min: usize) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(min as f64) as usize)
        .unwrap_or(default)
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_f64_clamped(
    params: &ParameterSet,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    let raw = params.get(key).copied().unwrap_or(default);
    if !raw.is_finite() {
        return default;
    }
    raw.clamp(min, max)
}

const STEP_EPSILON: f64 = 1e-9;

/// Expand one stepped range into its concrete values, inclusive of both
/// endpoints when the step lands on them. `(5, 20, 5)` yields
/// `[5, 10, 15, 20]`; a value within `STEP_EPSILON` of the end counts
/// as on it.
pub fn range_values(range: &ParameterRange) -> Result<Vec<f64>, EngineError> {
    if !range.start_value.is_finite() || !range.end_value.is_finite() || !range.step.is_finite() {
        return Err(EngineError::validation(
            range.name.clone(),
            "range bounds and step must be finite",
        ));
    }
    if range.step <= 0.0 {
        return Err(EngineError::validation(
            range.name.clone(),
            format!("step must be positive (value: {})", range.step),
        ));
    }
    if range.start_value > range.end_value {
        return Err(EngineError::validation(
            range.name.clone(),
            format!(
                "startValue {} exceeds endValue {}",
                range.start_value, range.end_value
            ),
        ));
    }

    let mut values = Vec::new();
    let mut index = 0usize;
    loop {
        let value = range.start_value + index as f64 * range.step;
        if value > range.end_value + STEP_EPSILON {
            break;
        }
        values.push(value.min(range.end_value));
        index += 1;
    }
    Ok(values)
}

/// Expand parameter ranges into the full Cartesian product of concrete
/// parameter sets. The first range varies slowest (outermost), the last
/// fastest, so the output order is deterministic. Each combination is
/// the base parameters with the ranged names overridden.
pub fn expand_combinations(
    base: &ParameterSet,
    ranges: &[ParameterRange],
) -> Result<Vec<ParameterSet>, EngineError> {
    if ranges.is_empty() {
        return Err(EngineError::validation(
            "parameterRanges",
            "at least one parameter range is required",
        ));
    }

    let mut seen = HashSet::new();
    for range in ranges {
        if !seen.insert(range.name.as_str()) {
            return Err(EngineError::validation(
                "parameterRanges",
                format!("duplicate parameter name `{}`", range.name),
            ));
        }
    }

    let mut expanded: Vec<Vec<f64>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        expanded.push(range_values(range)?);
    }

    let total: usize = expanded.iter().map(Vec::len).product();
    let mut combinations = Vec::with_capacity(total);
    let mut indices = vec![0usize; ranges.len()];

    'outer: loop {
        let mut params = base.clone();
        for (range, (values, &value_index)) in
            ranges.iter().zip(expanded.iter().zip(indices.iter()))
        {
            params.insert(range.name.clone(), values[value_index]);
        }
        combinations.push(params);

        // Advance like an odometer with the last range fastest.
        for position in (0..indices.len()).rev() {
            indices[position] += 1;
            if indices[position] < expanded[position].len() {
                continue 'outer;
            }
            indices[position] = 0;
        }
        break;
    }

    Ok(combinations)
}
