//! Product versions: parsing, ordering and the names derived from them.
//!
//! A version is `MAJOR.MINOR.PATCH` with an optional `-BUILD` suffix. A version
//! with a build suffix is a pre-release and sorts below the same base without
//! one. Branch and tag names depend on the product family ([`OlmType`]) the
//! version belongs to; ordering and equality do not.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VersionError;

/// Product family. Controls release branch and tag naming, and where the
/// family's bundles live inside managed-tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OlmType {
    #[default]
    #[serde(rename = "integreatly-operator")]
    IntegreatlyOperator,
    #[serde(rename = "managed-api-service")]
    ManagedApiService,
}

impl OlmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OlmType::IntegreatlyOperator => "integreatly-operator",
            OlmType::ManagedApiService => "managed-api-service",
        }
    }

    fn name_prefix(&self) -> &'static str {
        match self {
            OlmType::IntegreatlyOperator => "",
            OlmType::ManagedApiService => "rhoam-",
        }
    }

    /// Bundle folder, relative to the managed-tenants root.
    pub fn bundle_folder(&self) -> &'static str {
        match self {
            OlmType::IntegreatlyOperator => "addons/integreatly-operator/bundles",
            OlmType::ManagedApiService => "addons/managed-api-service/bundles",
        }
    }

    /// Production addon descriptor, relative to the managed-tenants root.
    pub fn production_addon_file(&self) -> &'static str {
        match self {
            OlmType::IntegreatlyOperator => {
                "addons/integreatly-operator/metadata/production/addon.yaml"
            }
            OlmType::ManagedApiService => "addons/rhoams/metadata/production/addon.yaml",
        }
    }

    /// Whether promotion strips `USE_CLUSTER_STORAGE` from the operator container.
    pub fn removes_cluster_storage(&self) -> bool {
        matches!(self, OlmType::ManagedApiService)
    }
}

impl fmt::Display for OlmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OlmType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "integreatly-operator" | "rhmi" => Ok(OlmType::IntegreatlyOperator),
            "managed-api-service" | "rhoam" => Ok(OlmType::ManagedApiService),
            other => Err(format!(
                "unknown OLM type {other:?}, expected integreatly-operator or managed-api-service"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    build: Option<String>,
    olm_type: OlmType,
}

impl Version {
    pub fn parse(input: &str, olm_type: OlmType) -> Result<Self, VersionError> {
        if input.is_empty() {
            return Err(VersionError::Empty);
        }
        if input.chars().any(char::is_whitespace) {
            return Err(VersionError::Malformed(input.to_string()));
        }

        let (core, build) = match input.split_once('-') {
            None => (input, None),
            Some((_, rest)) if rest.contains('-') => {
                return Err(VersionError::TooManySeparators(input.to_string()))
            }
            Some((_, "")) => return Err(VersionError::EmptyBuild(input.to_string())),
            Some((core, rest)) => (core, Some(rest.to_string())),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::Malformed(input.to_string()));
        }
        let number = |part: &str| -> Result<u64, VersionError> {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::NonNumeric {
                    input: input.to_string(),
                    part: part.to_string(),
                });
            }
            part.parse().map_err(|_| VersionError::NonNumeric {
                input: input.to_string(),
                part: part.to_string(),
            })
        };

        Ok(Version {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: number(parts[2])?,
            build,
            olm_type,
        })
    }

    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
            build: None,
            olm_type: OlmType::default(),
        }
    }

    pub fn with_olm_type(mut self, olm_type: OlmType) -> Self {
        self.olm_type = olm_type;
        self
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }

    pub fn olm_type(&self) -> OlmType {
        self.olm_type
    }

    pub fn is_pre_release(&self) -> bool {
        self.build.is_some()
    }

    pub fn is_patch_release(&self) -> bool {
        self.patch > 0
    }

    /// `M.m.p`, without any build suffix.
    pub fn base(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// Git tag for this version, e.g. `v1.2.0-rc1` or `rhoam-v1.2.0`.
    pub fn tag(&self) -> String {
        format!("{}v{}", self.olm_type.name_prefix(), self)
    }

    pub fn release_branch(&self) -> String {
        format!(
            "{}release-v{}",
            self.olm_type.name_prefix(),
            self.major_minor()
        )
    }

    /// Prefix shared by every release-candidate tag of this base version.
    pub fn rc_tag_ref(&self) -> String {
        format!("{}v{}-", self.olm_type.name_prefix(), self.base())
    }

    pub fn prepare_release_branch(&self) -> String {
        format!("prepare-for-release-{}", self.tag())
    }

    pub fn polarion_release_id(&self) -> String {
        format!("v{}_{}_{}", self.major, self.minor, self.patch)
    }

    pub fn polarion_milestone_id(&self) -> String {
        match &self.build {
            Some(build) => format!("{}_{}", self.polarion_release_id(), build),
            None => self.polarion_release_id(),
        }
    }

    /// The same base version without a build suffix.
    pub fn without_build(&self) -> Version {
        Version {
            build: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(build) = &self.build {
            write!(f, "-{build}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s, OlmType::default())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.major, self.minor, self.patch, &self.build).hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.build, &other.build) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_back() {
        for input in ["0.0.0", "1.2.3", "10.20.30", "2.0.0-rc1", "1.1.0-er3"] {
            let v: Version = input.parse().expect("valid version");
            assert_eq!(v.to_string(), input);
        }
    }

    #[test]
    fn rejects_malformed_input() {
        struct TestCase {
            input: &'static str,
            expected: VersionError,
        }
        let cases = vec![
            TestCase {
                input: "",
                expected: VersionError::Empty,
            },
            TestCase {
                input: "2.0.0-",
                expected: VersionError::EmptyBuild("2.0.0-".into()),
            },
            TestCase {
                input: "2.0.0-a-b",
                expected: VersionError::TooManySeparators("2.0.0-a-b".into()),
            },
            TestCase {
                input: "x.y.z",
                expected: VersionError::NonNumeric {
                    input: "x.y.z".into(),
                    part: "x".into(),
                },
            },
            TestCase {
                input: "1.2",
                expected: VersionError::Malformed("1.2".into()),
            },
            TestCase {
                input: " 1.2.3 ",
                expected: VersionError::Malformed(" 1.2.3 ".into()),
            },
            TestCase {
                input: "1.2.3-rc1\n",
                expected: VersionError::Malformed("1.2.3-rc1\n".into()),
            },
            TestCase {
                input: "1.+2.3",
                expected: VersionError::NonNumeric {
                    input: "1.+2.3".into(),
                    part: "+2".into(),
                },
            },
        ];
        for case in cases {
            assert_eq!(
                case.input.parse::<Version>().unwrap_err(),
                case.expected,
                "input {:?}",
                case.input
            );
        }
    }

    #[test]
    fn pre_release_sorts_below_its_base() {
        let rc: Version = "1.6.0-rc2".parse().unwrap();
        let fin: Version = "1.6.0".parse().unwrap();
        assert!(rc.is_pre_release());
        assert!(!fin.is_pre_release());
        assert_eq!(rc.cmp(&rc.without_build()), Ordering::Less);
        assert!(rc < fin);
        assert!(fin < "1.6.1-rc1".parse::<Version>().unwrap());
    }

    #[test]
    fn ordering_is_total_over_a_mixed_set() {
        let mut versions: Vec<Version> = ["1.10.0", "1.2.0", "1.2.0-rc1", "0.9.9", "1.2.0-rc2"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        versions.sort();
        let sorted: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(
            sorted,
            vec!["0.9.9", "1.2.0-rc1", "1.2.0-rc2", "1.2.0", "1.10.0"]
        );
    }

    #[test]
    fn derives_names_per_family() {
        let a = Version::parse("1.2.3-rc1", OlmType::IntegreatlyOperator).unwrap();
        assert_eq!(a.tag(), "v1.2.3-rc1");
        assert_eq!(a.release_branch(), "release-v1.2");
        assert_eq!(a.rc_tag_ref(), "v1.2.3-");
        assert_eq!(a.prepare_release_branch(), "prepare-for-release-v1.2.3-rc1");
        assert_eq!(a.polarion_release_id(), "v1_2_3");
        assert_eq!(a.polarion_milestone_id(), "v1_2_3_rc1");
        assert_eq!(a.major_minor(), "1.2");
        assert!(a.is_patch_release());

        let b = Version::parse("1.2.0", OlmType::ManagedApiService).unwrap();
        assert_eq!(b.tag(), "rhoam-v1.2.0");
        assert_eq!(b.release_branch(), "rhoam-release-v1.2");
        assert_eq!(b.rc_tag_ref(), "rhoam-v1.2.0-");
        assert_eq!(b.polarion_milestone_id(), "v1_2_0");
        assert!(!b.is_patch_release());
    }

    #[test]
    fn equality_ignores_family() {
        let a = Version::parse("1.2.3", OlmType::IntegreatlyOperator).unwrap();
        let b = Version::parse("1.2.3", OlmType::ManagedApiService).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn olm_type_parses_aliases() {
        assert_eq!(
            "rhoam".parse::<OlmType>().unwrap(),
            OlmType::ManagedApiService
        );
        assert_eq!(
            "integreatly-operator".parse::<OlmType>().unwrap(),
            OlmType::IntegreatlyOperator
        );
        assert!("bogus".parse::<OlmType>().is_err());
    }
}
