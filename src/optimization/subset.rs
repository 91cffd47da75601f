//! Exact subset matching over a bucket's pending notionals.
//!
//! Given notionals sorted ascending and a target, find a subset whose sum
//! is exactly the target. Small inputs are handled directly (equality for
//! one value, a two-pointer scan for two); larger inputs decompose
//! recursively: at each level every element is tried as the smallest member
//! of the subset, either alone or together with a match found in the suffix
//! after it.
//!
//! Because every non-empty subset has a unique smallest member and each
//! level also checks the singleton case, the decomposition visits every
//! distinct subset and is therefore complete. Its cost is exponential in the
//! worst case, so the search is bounded by a step budget; running out of
//! budget is reported separately from a proven miss.

/// Outcome of an exact subset search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubsetMatch {
    /// Indices into the input slice, ascending.
    Found(Vec<usize>),
    /// No subset sums to the target.
    NotFound,
    /// The step budget ran out before the search finished.
    BudgetExhausted,
}

impl SubsetMatch {
    pub fn is_found(&self) -> bool {
        matches!(self, SubsetMatch::Found(_))
    }
}

/// Find a subset of `values` (sorted ascending) summing exactly to `target`.
///
/// A zero target never matches, and an empty input is a miss without
/// spending any budget.
pub fn find_exact_subset(values: &[u64], target: u64, max_steps: u64) -> SubsetMatch {
    debug_assert!(values.windows(2).all(|w| w[0] <= w[1]));
    if target == 0 || values.is_empty() {
        return SubsetMatch::NotFound;
    }
    let mut search = KSum {
        steps: 0,
        max_steps,
        exhausted: false,
    };
    match search.solve(values, target) {
        Some(indices) => SubsetMatch::Found(indices),
        None if search.exhausted => SubsetMatch::BudgetExhausted,
        None => SubsetMatch::NotFound,
    }
}

struct KSum {
    steps: u64,
    max_steps: u64,
    exhausted: bool,
}

impl KSum {
    fn solve(&mut self, values: &[u64], target: u64) -> Option<Vec<usize>> {
        self.steps += 1;
        if self.steps > self.max_steps {
            self.exhausted = true;
            return None;
        }
        match values.len() {
            0 => None,
            1 => (values[0] == target).then(|| vec![0]),
            2 => two_pointer(values, target),
            _ => self.decompose(values, target),
        }
    }

    fn decompose(&mut self, values: &[u64], target: u64) -> Option<Vec<usize>> {
        let mut suffix_sum: u128 = values.iter().map(|v| *v as u128).sum();
        for (i, &value) in values.iter().enumerate() {
            if suffix_sum < target as u128 || value > target {
                break;
            }
            if i > 0 && value == values[i - 1] {
                suffix_sum -= value as u128;
                continue;
            }
            if value == target {
                return Some(vec![i]);
            }
            if let Some(rest) = self.solve(&values[i + 1..], target - value) {
                let mut indices = Vec::with_capacity(rest.len() + 1);
                indices.push(i);
                indices.extend(rest.into_iter().map(|j| j + i + 1));
                return Some(indices);
            }
            if self.exhausted {
                return None;
            }
            suffix_sum -= value as u128;
        }
        None
    }
}

/// Single or pair match over ascending values.
fn two_pointer(values: &[u64], target: u64) -> Option<Vec<usize>> {
    if let Some(i) = values.iter().position(|v| *v == target) {
        return Some(vec![i]);
    }
    if values.len() < 2 {
        return None;
    }
    let (mut lo, mut hi) = (0, values.len() - 1);
    while lo < hi {
        let sum = values[lo] as u128 + values[hi] as u128;
        match sum.cmp(&(target as u128)) {
            std::cmp::Ordering::Equal => return Some(vec![lo, hi]),
            std::cmp::Ordering::Less => lo += 1,
            std::cmp::Ordering::Greater => hi -= 1,
        }
    }
    None
}
