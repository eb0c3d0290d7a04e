//! Set fitter (C7): covers a permission set with the smallest combination
//! of known named sets (used by the global-macros suggester to propose
//! permission macros for open-coded permission sets).

use std::collections::BTreeSet;

/// A named candidate set scored by how many of its elements appear in the
/// set being fit. `score` is `nonzero / len(values)`, i.e. the fraction of
/// this set's own elements that were actually requested.
#[derive(Debug, Clone)]
pub struct RichSet {
    pub name: String,
    pub values: BTreeSet<String>,
    nonzero: usize,
    pub score: f64,
}

impl RichSet {
    fn new(name: String, values: BTreeSet<String>) -> Self {
        RichSet {
            name,
            values,
            nonzero: 0,
            score: 0.0,
        }
    }

    fn incr(&mut self, elem: &str) {
        if self.values.contains(elem) {
            // First match against this element bumps the running score;
            // repeats of the same element are tallied but do not move it.
            self.nonzero += 1;
            self.score = self.nonzero as f64 / self.values.len() as f64;
        }
    }
}

/// Fits a target permission set against a catalog of named candidate sets
/// (e.g. macro-defined permission sets).
pub struct SetFitter {
    catalog: Vec<(String, BTreeSet<String>)>,
}

/// Result of a fit: the winning combination of full-coverage sets (the
/// smallest one leaving the fewest leftover elements), and the partially
/// matching sets left over for the caller to report separately.
pub struct FitResult {
    pub winner: Vec<RichSet>,
    pub partial: Vec<RichSet>,
}

impl SetFitter {
    pub fn new(catalog: Vec<(String, BTreeSet<String>)>) -> Self {
        SetFitter { catalog }
    }

    /// Fits `target` against the catalog. Candidate sets with nonzero
    /// overlap are scored; a perfect match (`score == 1.0`) is eligible for
    /// the winning combination, every non-empty subset of which is
    /// evaluated for how many elements of `target` it still leaves
    /// uncovered. The winner is the globally smallest leftover count,
    /// ties broken by fewest sets used.
    pub fn fit(&self, target: &BTreeSet<String>) -> FitResult {
        let mut rich_sets: Vec<RichSet> = self
            .catalog
            .iter()
            .map(|(name, values)| RichSet::new(name.clone(), values.clone()))
            .collect();
        for elem in target {
            for rs in rich_sets.iter_mut() {
                rs.incr(elem);
            }
        }

        let mut ones = Vec::new();
        let mut part = Vec::new();
        for rs in rich_sets {
            if (rs.score - 1.0).abs() < f64::EPSILON {
                ones.push(rs);
            } else if rs.nonzero > 0 {
                part.push(rs);
            }
        }

        let mut best: Option<(usize, usize, Vec<usize>)> = None; // (extra, combo len, indices)
        for mask in 1u64..(1u64 << ones.len()) {
            if ones.len() > 63 {
                break;
            }
            let mut covered: BTreeSet<String> = BTreeSet::new();
            let mut indices = Vec::new();
            for (i, rs) in ones.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    covered.extend(rs.values.iter().cloned());
                    indices.push(i);
                }
            }
            let extra = target.difference(&covered).count();
            let candidate = (extra, indices.len(), indices);
            best = Some(match best {
                None => candidate,
                Some(cur) => {
                    if candidate.0 < cur.0 || (candidate.0 == cur.0 && candidate.1 < cur.1) {
                        candidate
                    } else {
                        cur
                    }
                }
            });
        }

        let winner = match best {
            Some((_, _, indices)) => indices.into_iter().map(|i| ones[i].clone()).collect(),
            None => Vec::new(),
        };

        FitResult { winner, partial: part }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn picks_exact_single_match() {
        let fitter = SetFitter::new(vec![
            ("r_file_perms".to_string(), set(&["read", "open", "getattr"])),
            ("w_file_perms".to_string(), set(&["write", "append"])),
        ]);
        let result = fitter.fit(&set(&["read", "open", "getattr"]));
        assert_eq!(result.winner.len(), 1);
        assert_eq!(result.winner[0].name, "r_file_perms");
    }

    #[test]
    fn combines_two_full_matches_to_minimize_extra() {
        let fitter = SetFitter::new(vec![
            ("r_file_perms".to_string(), set(&["read", "open", "getattr"])),
            ("w_file_perms".to_string(), set(&["write", "append"])),
        ]);
        let result = fitter.fit(&set(&["read", "open", "getattr", "write", "append"]));
        let names: BTreeSet<_> = result.winner.iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, set(&["r_file_perms", "w_file_perms"]));
    }

    #[test]
    fn prefers_fewer_sets_when_extra_count_ties() {
        let fitter = SetFitter::new(vec![
            ("a".to_string(), set(&["x", "y"])),
            ("b".to_string(), set(&["x", "y", "z"])),
        ]);
        // "a" matches x,y exactly (score 1.0); "b" only reaches 2/3 and is
        // reported as a partial match, not a winning combination.
        let result = fitter.fit(&set(&["x", "y"]));
        assert_eq!(result.winner.len(), 1);
    }

    #[test]
    fn partial_matches_are_reported_separately() {
        let fitter = SetFitter::new(vec![("r_file_perms".to_string(), set(&["read", "open", "getattr"]))]);
        let result = fitter.fit(&set(&["read"]));
        assert!(result.winner.is_empty());
        assert_eq!(result.partial.len(), 1);
    }
}
