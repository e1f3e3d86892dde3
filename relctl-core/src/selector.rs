//! Supported release window.
//!
//! Given every bundle version and the version production currently runs,
//! select the versions still supported under a `(max majors, max minors)`
//! policy. Versions newer than production are never part of the window.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::SelectError;
use crate::graph::CsvSet;
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportPolicy {
    pub max_majors: usize,
    pub max_minors: usize,
}

impl Default for SupportPolicy {
    fn default() -> Self {
        SupportPolicy {
            max_majors: 1,
            max_minors: 3,
        }
    }
}

/// Every version inside the window, ascending.
pub fn supported_versions(
    versions: &[Version],
    production: &Version,
    policy: SupportPolicy,
) -> Result<Vec<Version>, SelectError> {
    let trimmed: Vec<&Version> = versions
        .iter()
        .filter(|v| {
            v.major() < production.major()
                || (v.major() == production.major() && v.minor() <= production.minor())
        })
        .collect();
    if trimmed.is_empty() {
        return Err(SelectError::AllNewerThanProduction {
            production: production.to_string(),
        });
    }

    let majors: BTreeSet<u64> = trimmed.iter().map(|v| v.major()).collect();
    let kept_majors: Vec<u64> = majors
        .iter()
        .rev()
        .take(policy.max_majors)
        .copied()
        .collect();
    if kept_majors.is_empty() {
        return Err(SelectError::NoMajors {
            max_majors: policy.max_majors,
        });
    }

    let mut window: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
    for major in kept_majors {
        let minors: BTreeSet<u64> = trimmed
            .iter()
            .filter(|v| v.major() == major)
            .map(|v| v.minor())
            .collect();
        let mut kept: Vec<u64> = minors.iter().rev().take(policy.max_minors).copied().collect();
        kept.sort_unstable();
        window.insert(major, kept);
    }
    debug!(?window, "[SELECT] Supported major/minor window");

    let mut selected: Vec<Version> = trimmed
        .into_iter()
        .filter(|v| {
            window
                .get(&v.major())
                .is_some_and(|minors| minors.contains(&v.minor()))
        })
        .cloned()
        .collect();
    selected.sort();
    selected.dedup();
    Ok(selected)
}

/// [`supported_versions`] over the versions of a CSV set.
pub fn supported_from_set(
    set: &CsvSet,
    production: &Version,
    policy: SupportPolicy,
) -> Result<Vec<Version>, SelectError> {
    supported_versions(&set.versions(), production, policy)
}

/// Comma-separated rendering used on stdout.
pub fn render(versions: &[Version]) -> String {
    versions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Csv;

    fn versions(list: &[&str]) -> Vec<Version> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn selects_window_under_policy() {
        struct TestCase {
            name: &'static str,
            bundles: Vec<&'static str>,
            production: &'static str,
            policy: SupportPolicy,
            expected: Vec<&'static str>,
        }
        let cases = vec![
            TestCase {
                name: "three minors of one major",
                bundles: vec!["1.4.0", "1.5.0", "1.6.0", "1.6.1", "1.7.0", "1.7.1", "1.7.2"],
                production: "1.6.1",
                policy: SupportPolicy {
                    max_majors: 1,
                    max_minors: 3,
                },
                expected: vec!["1.4.0", "1.5.0", "1.6.0", "1.6.1"],
            },
            TestCase {
                name: "two majors one minor each",
                bundles: vec!["0.0.0", "1.0.0", "2.0.0", "3.0.0"],
                production: "3.0.0",
                policy: SupportPolicy {
                    max_majors: 2,
                    max_minors: 1,
                },
                expected: vec!["2.0.0", "3.0.0"],
            },
            TestCase {
                name: "pre-releases inside the window are kept",
                bundles: vec!["1.1.0", "1.2.0-rc1", "1.2.0", "1.3.0-rc1"],
                production: "1.2.0",
                policy: SupportPolicy {
                    max_majors: 1,
                    max_minors: 1,
                },
                expected: vec!["1.2.0-rc1", "1.2.0"],
            },
        ];

        for case in cases {
            let result = supported_versions(
                &versions(&case.bundles),
                &case.production.parse().unwrap(),
                case.policy,
            )
            .unwrap_or_else(|e| panic!("{}: {e}", case.name));
            let rendered: Vec<String> = result.iter().map(ToString::to_string).collect();
            assert_eq!(rendered, case.expected, "{}", case.name);
        }
    }

    #[test]
    fn all_newer_than_production_fails() {
        let err = supported_versions(
            &versions(&["2.0.0", "2.1.0"]),
            &"1.9.0".parse().unwrap(),
            SupportPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SelectError::AllNewerThanProduction {
                production: "1.9.0".into()
            }
        );
    }

    #[test]
    fn zero_majors_fails() {
        let err = supported_versions(
            &versions(&["1.0.0"]),
            &"1.0.0".parse().unwrap(),
            SupportPolicy {
                max_majors: 0,
                max_minors: 3,
            },
        )
        .unwrap_err();
        assert_eq!(err, SelectError::NoMajors { max_majors: 0 });
    }

    #[test]
    fn window_grows_with_policy() {
        let bundles = versions(&["1.0.0", "1.1.0", "2.0.0", "2.1.0", "2.2.0"]);
        let production: Version = "2.2.0".parse().unwrap();
        let mut previous = 0;
        for (majors, minors) in [(1, 1), (1, 2), (2, 2), (2, 3)] {
            let selected = supported_versions(
                &bundles,
                &production,
                SupportPolicy {
                    max_majors: majors,
                    max_minors: minors,
                },
            )
            .unwrap();
            assert!(selected.len() >= previous);
            previous = selected.len();
        }
        assert_eq!(previous, 5);
    }

    #[test]
    fn works_over_a_csv_set() {
        let set = CsvSet::new(
            "pkg",
            vec![
                Csv::new("op.v1.0.0", None, "1.0.0".parse().unwrap(), "1.0.0"),
                Csv::new("op.v1.1.0", Some("op.v1.0.0"), "1.1.0".parse().unwrap(), "1.1.0"),
            ],
        )
        .unwrap();
        let selected =
            supported_from_set(&set, &"1.1.0".parse().unwrap(), SupportPolicy::default()).unwrap();
        assert_eq!(render(&selected), "1.0.0,1.1.0");
    }
}
