//! Variable merging for step input and runtime accumulation

use std::collections::HashMap;

use super::model::TestDataSet;

/// Read-only merge of test data sets and runtime variables
pub struct VariableStore;

impl VariableStore {
    /// Merge data sets in order; later sets override earlier ones
    pub fn merge<'a, I>(sets: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = &'a TestDataSet>,
    {
        let mut merged = HashMap::new();
        for set in sets {
            merged.extend(
                set.variables
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        merged
    }

    /// Copy of `base` with every key of `top` applied over it
    pub fn overlay(
        base: &HashMap<String, String>,
        top: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut result = base.clone();
        Self::accumulate(&mut result, top);
        result
    }

    /// Apply `output` onto `accumulator` without dropping existing keys
    pub fn accumulate(accumulator: &mut HashMap<String, String>, output: &HashMap<String, String>) {
        accumulator.extend(output.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}
