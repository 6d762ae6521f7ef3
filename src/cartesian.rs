//! Ordered cartesian expansion of parameter grids.

use indexmap::IndexMap;

/// Enumerate every combination binding each parameter to one of its
/// values. The first parameter varies slowest; emit order follows the
/// map's insertion order and is stable within one invocation.
///
/// An empty parameter map yields no combinations. Empty value arrays are
/// rejected by input validation before expansion runs.
#[must_use]
pub fn expand(parameters: &IndexMap<String, Vec<String>>) -> Vec<IndexMap<String, String>> {
    if parameters.is_empty() {
        return Vec::new();
    }

    let mut combinations: Vec<IndexMap<String, String>> = vec![IndexMap::new()];
    for (name, values) in parameters {
        let mut next = Vec::with_capacity(combinations.len() * values.len());
        for combination in &combinations {
            for value in values {
                let mut extended = combination.clone();
                extended.insert(name.clone(), value.clone());
                next.push(extended);
            }
        }
        combinations = next;
    }
    combinations
}
