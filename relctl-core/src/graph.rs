//! OLM upgrade graph over the bundles of one package directory.
//!
//! A package directory holds one sub-directory per bundle, each containing a
//! CSV. The CSVs form a graph through their `spec.replaces` edges. The set is
//! kept in a total order: by version, then by bundle directory name.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::GraphError;
use crate::manifest::{version_from_csv_name, CsvDocument};
use crate::version::{OlmType, Version};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Csv {
    pub name: String,
    pub replaces: Option<String>,
    pub version: Version,
    /// Name of the bundle directory the CSV was loaded from.
    pub bundle: String,
    pub path: PathBuf,
}

impl Csv {
    pub fn new(name: &str, replaces: Option<&str>, version: Version, bundle: &str) -> Self {
        Csv {
            name: name.to_string(),
            replaces: replaces.filter(|r| !r.is_empty()).map(str::to_string),
            version,
            bundle: bundle.to_string(),
            path: PathBuf::from(bundle),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CsvSet {
    dir: PathBuf,
    csvs: Vec<Csv>,
    index: HashMap<String, usize>,
}

impl CsvSet {
    pub fn new(dir: impl Into<PathBuf>, mut csvs: Vec<Csv>) -> Result<Self, GraphError> {
        let dir = dir.into();
        csvs.sort_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.bundle.cmp(&b.bundle))
        });
        let mut index = HashMap::with_capacity(csvs.len());
        for (i, csv) in csvs.iter().enumerate() {
            if index.insert(csv.name.clone(), i).is_some() {
                return Err(GraphError::DuplicateName {
                    dir,
                    name: csv.name.clone(),
                });
            }
        }
        Ok(CsvSet { dir, csvs, index })
    }

    /// Parse every bundle sub-directory of `dir`.
    pub fn load(dir: &Path, olm_type: OlmType) -> Result<Self, GraphError> {
        let entries = fs::read_dir(dir).map_err(|source| GraphError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut csvs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| GraphError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let bundle = entry.file_name().to_string_lossy().into_owned();
            let doc = CsvDocument::load_from_bundle(&path)?;
            let csv = Csv {
                name: doc.name()?.to_string(),
                replaces: doc.replaces().map(str::to_string),
                version: doc.version(olm_type)?,
                bundle,
                path: doc.path().to_path_buf(),
            };
            debug!(csv = %csv.name, version = %csv.version, "[GRAPH] Loaded CSV");
            csvs.push(csv);
        }

        let set = Self::new(dir, csvs)?;
        info!(dir = %dir.display(), count = set.len(), "[GRAPH] CSV set loaded");
        Ok(set)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// CSVs in total order, lowest first.
    pub fn csvs(&self) -> &[Csv] {
        &self.csvs
    }

    pub fn len(&self) -> usize {
        self.csvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.csvs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Csv> {
        self.index.get(name).map(|&i| &self.csvs[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn versions(&self) -> Vec<Version> {
        self.csvs.iter().map(|c| c.version.clone()).collect()
    }

    /// The highest-ordered CSV.
    pub fn current(&self) -> Result<&Csv, GraphError> {
        self.csvs.last().ok_or_else(|| GraphError::Empty {
            dir: self.dir.clone(),
        })
    }

    /// The CSV immediately before `version` in total order, if any. CSVs that
    /// share the base of `version` are earlier builds of the same bundle and
    /// never count: the promoted bundle replaces them in place.
    pub fn predecessor_of(&self, version: &Version) -> Option<&Csv> {
        let base = version.without_build();
        self.csvs
            .iter()
            .rev()
            .find(|c| c.version.without_build() < base)
    }

    /// Whether `target` names a node of the graph. CSVs sharing one version
    /// count as a single node, so a reference to any name carrying that
    /// version resolves.
    fn resolves(&self, target: &str) -> bool {
        if self.contains(target) {
            return true;
        }
        let Some(version) = version_from_csv_name(target) else {
            return false;
        };
        self.csvs.iter().filter(|c| c.version == version).count() > 1
    }

    /// Every non-root CSV must carry a `replaces` that resolves inside the
    /// set. The lowest CSV is the graph root, together with any CSV sharing its
    /// version; CSVs named in `baselines`, or replacing one, are exempt.
    pub fn check_complete(&self, baselines: &[String]) -> Result<(), GraphError> {
        let Some(root) = self.csvs.first() else {
            return Ok(());
        };

        let listed = |name: &str| baselines.iter().any(|b| b == name);
        for csv in self.csvs.iter().skip(1).rev() {
            let Some(target) = csv.replaces.as_deref() else {
                if csv.version == root.version || listed(&csv.name) {
                    debug!(csv = %csv.name, "[GRAPH] Root without replaces accepted");
                    continue;
                }
                warn!(dir = %self.dir.display(), csv = %csv.name, "[GRAPH] CSV above the root has no replaces");
                return Err(GraphError::Incomplete {
                    dir: self.dir.clone(),
                    csv: csv.name.clone(),
                    missing: String::new(),
                });
            };
            if listed(&csv.name) || listed(target) {
                debug!(csv = %csv.name, target, "[GRAPH] Baseline allow-listed");
                continue;
            }
            if !self.resolves(target) {
                return Err(GraphError::Incomplete {
                    dir: self.dir.clone(),
                    csv: csv.name.clone(),
                    missing: target.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn check_acyclic(&self) -> Result<(), GraphError> {
        for start in &self.csvs {
            let mut visited: HashSet<&str> = HashSet::new();
            let mut current = Some(start);
            while let Some(csv) = current {
                if !visited.insert(csv.name.as_str()) {
                    return Err(GraphError::Cycle {
                        dir: self.dir.clone(),
                        csv: start.name.clone(),
                    });
                }
                current = csv.replaces.as_deref().and_then(|r| self.get(r));
            }
        }
        Ok(())
    }

    /// Acyclicity, then completeness.
    pub fn validate(&self, baselines: &[String]) -> Result<(), GraphError> {
        self.check_acyclic()?;
        self.check_complete(baselines)
    }
}

/// Versions named by the bundle sub-directories of `dir`. Entries whose name
/// is not a version are ignored.
pub fn bundle_versions(dir: &Path, olm_type: OlmType) -> Result<Vec<Version>, GraphError> {
    let entries = fs::read_dir(dir).map_err(|source| GraphError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut versions: Vec<Version> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            match Version::parse(&name, olm_type) {
                Ok(v) => Some(v),
                Err(err) => {
                    debug!(entry = %name, error = %err, "[GRAPH] Skipping non-version directory");
                    None
                }
            }
        })
        .collect();
    versions.sort();
    Ok(versions)
}
