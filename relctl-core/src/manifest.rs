//! Reading and editing OLM manifests inside a managed-tenants tree.
//!
//! Package manifests and CSV documents are both kept as [`serde_yaml::Value`]
//! trees and edited in place, so key order and anything the mutator does not
//! touch survive a rewrite.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::error::ManifestError;
use crate::version::{OlmType, Version};

/// File-name suffixes that identify a CSV inside a bundle directory.
pub const CSV_SUFFIXES: [&str; 2] = [".clusterserviceversion.yaml", ".csv.yaml"];

const PACKAGE_SUFFIX: &str = ".package.yaml";

/// `<operator>.v<base>`
pub fn csv_name(operator: &str, version: &Version) -> String {
    format!("{operator}.v{}", version.base())
}

/// Version embedded in a CSV name such as `rhmi-operator.v1.2.3`.
pub fn version_from_csv_name(name: &str) -> Option<Version> {
    let (_, version) = name.rsplit_once(".v")?;
    version.parse().ok()
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ManifestError> {
    let content = fs::read_to_string(path).map_err(|e| ManifestError::io(path, e))?;
    serde_yaml::from_str(&content).map_err(|source| ManifestError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), ManifestError> {
    let content = serde_yaml::to_string(value).map_err(|source| ManifestError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, content).map_err(|e| ManifestError::io(path, e))
}

/// A package manifest kept as a YAML tree so key order survives an edit.
#[derive(Debug, Clone)]
pub struct PackageManifest {
    doc: Value,
}

impl PackageManifest {
    /// Locate the single `*.package.yaml` file in `dir`.
    pub fn find(dir: &Path) -> Result<PathBuf, ManifestError> {
        let entries = fs::read_dir(dir).map_err(|e| ManifestError::io(dir, e))?;
        let mut found: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(PACKAGE_SUFFIX) || n == "package.yaml")
            })
            .collect();
        found.sort();
        found
            .into_iter()
            .next()
            .ok_or_else(|| ManifestError::shape(dir, "a *.package.yaml file"))
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let doc: Value = read_yaml(path)?;
        if !doc.is_mapping() {
            return Err(ManifestError::shape(path, "a package mapping"));
        }
        Ok(Self { doc })
    }

    pub fn write(&self, path: &Path) -> Result<(), ManifestError> {
        write_yaml(path, &self.doc)
    }

    pub fn package_name(&self) -> Option<&str> {
        self.doc.get("packageName").and_then(Value::as_str)
    }

    /// `currentCSV` of channel `index`.
    pub fn current_csv(&self, index: usize) -> Option<&str> {
        self.doc
            .get("channels")
            .and_then(|c| c.get(index))
            .and_then(|c| c.get("currentCSV"))
            .and_then(Value::as_str)
    }

    /// Point the first channel at `csv`.
    pub fn set_current_csv(&mut self, file: &Path, csv: &str) -> Result<(), ManifestError> {
        let channel = self
            .doc
            .get_mut("channels")
            .and_then(|c| c.get_mut(0))
            .and_then(Value::as_mapping_mut)
            .ok_or_else(|| ManifestError::shape(file, "channels[0]"))?;
        let key = Value::from("currentCSV");
        match channel.get_mut(&key) {
            Some(current) => {
                debug!(from = ?current.as_str(), to = csv, "[MANIFEST] Updating currentCSV");
                *current = Value::from(csv);
            }
            None => {
                channel.insert(key, Value::from(csv));
            }
        }
        Ok(())
    }
}

/// A ClusterServiceVersion document kept as a generic YAML tree.
#[derive(Debug, Clone)]
pub struct CsvDocument {
    path: PathBuf,
    doc: Value,
}

impl CsvDocument {
    /// Find the CSV file of a bundle, looking in `dir` and then `dir/manifests`.
    pub fn find_in_bundle(dir: &Path) -> Result<PathBuf, ManifestError> {
        for candidate in [dir.to_path_buf(), dir.join("manifests")] {
            let Ok(entries) = fs::read_dir(&candidate) else {
                continue;
            };
            let mut found: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| CSV_SUFFIXES.iter().any(|s| n.ends_with(s)))
                })
                .collect();
            found.sort();
            if let Some(path) = found.into_iter().next() {
                return Ok(path);
            }
        }
        Err(ManifestError::shape(dir, "a ClusterServiceVersion file"))
    }

    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        Ok(CsvDocument {
            path: path.to_path_buf(),
            doc: read_yaml(path)?,
        })
    }

    pub fn load_from_bundle(dir: &Path) -> Result<Self, ManifestError> {
        Self::read(&Self::find_in_bundle(dir)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Value {
        &self.doc
    }

    pub fn write(&self) -> Result<(), ManifestError> {
        write_yaml(&self.path, &self.doc)?;
        info!(file = %self.path.display(), "[MANIFEST] CSV written");
        Ok(())
    }

    pub fn name(&self) -> Result<&str, ManifestError> {
        self.doc
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| ManifestError::shape(&self.path, "metadata.name"))
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), ManifestError> {
        let metadata = self
            .doc
            .get_mut("metadata")
            .and_then(Value::as_mapping_mut)
            .ok_or_else(|| ManifestError::shape(&self.path, "metadata"))?;
        metadata.insert(Value::from("name"), Value::from(name));
        Ok(())
    }

    /// `spec.replaces`; an empty string counts as absent.
    pub fn replaces(&self) -> Option<&str> {
        self.doc
            .get("spec")
            .and_then(|s| s.get("replaces"))
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
    }

    pub fn set_replaces(&mut self, replaces: Option<&str>) -> Result<(), ManifestError> {
        let spec = self.spec_mut()?;
        match replaces {
            Some(r) => {
                spec.insert(Value::from("replaces"), Value::from(r));
            }
            None => {
                spec.remove("replaces");
            }
        }
        Ok(())
    }

    /// `spec.version`, falling back to the version embedded in the name.
    pub fn version(&self, olm_type: OlmType) -> Result<Version, ManifestError> {
        let raw = match self
            .doc
            .get("spec")
            .and_then(|s| s.get("version"))
            .and_then(Value::as_str)
        {
            Some(v) => v.to_string(),
            None => self
                .name()?
                .rsplit_once(".v")
                .map(|(_, v)| v.to_string())
                .ok_or_else(|| ManifestError::shape(&self.path, "spec.version"))?,
        };
        Version::parse(&raw, olm_type).map_err(|source| ManifestError::Version {
            path: self.path.clone(),
            source,
        })
    }

    fn spec_mut(&mut self) -> Result<&mut Mapping, ManifestError> {
        self.doc
            .get_mut("spec")
            .and_then(Value::as_mapping_mut)
            .ok_or_else(|| ManifestError::shape(&self.path, "spec"))
    }

    /// The container named `container`, optionally restricted to one deployment.
    pub fn container_mut(
        &mut self,
        deployment: Option<&str>,
        container: &str,
    ) -> Result<&mut Mapping, ManifestError> {
        let file = self.path.clone();
        let deployments = self
            .doc
            .get_mut("spec")
            .and_then(|v| v.get_mut("install"))
            .and_then(|v| v.get_mut("spec"))
            .and_then(|v| v.get_mut("deployments"))
            .and_then(Value::as_sequence_mut)
            .ok_or_else(|| ManifestError::shape(&file, "spec.install.spec.deployments"))?;

        let mut deployment_seen = false;
        for d in deployments.iter_mut() {
            if let Some(wanted) = deployment {
                if d.get("name").and_then(Value::as_str) != Some(wanted) {
                    continue;
                }
            }
            deployment_seen = true;
            let Some(containers) = d
                .get_mut("spec")
                .and_then(|v| v.get_mut("template"))
                .and_then(|v| v.get_mut("spec"))
                .and_then(|v| v.get_mut("containers"))
                .and_then(Value::as_sequence_mut)
            else {
                continue;
            };
            if let Some(found) = containers
                .iter_mut()
                .find(|c| c.get("name").and_then(Value::as_str) == Some(container))
            {
                return found
                    .as_mapping_mut()
                    .ok_or_else(|| ManifestError::shape(&file, format!("container {container}")));
            }
        }

        let what = match (deployment, deployment_seen) {
            (Some(d), false) => format!("deployment {d}"),
            _ => format!("container {container}"),
        };
        Err(ManifestError::shape(&file, what))
    }

    /// Add `name=value` to the container's env, replacing an existing entry.
    pub fn upsert_env(
        &mut self,
        container: &str,
        name: &str,
        value: &str,
    ) -> Result<(), ManifestError> {
        let file = self.path.clone();
        let target = self.container_mut(None, container)?;
        let env = target
            .entry(Value::from("env"))
            .or_insert_with(|| Value::Sequence(Vec::new()));
        if env.is_null() {
            *env = Value::Sequence(Vec::new());
        }
        let entries = env
            .as_sequence_mut()
            .ok_or_else(|| ManifestError::shape(&file, format!("container {container} env list")))?;

        match entries
            .iter_mut()
            .filter_map(Value::as_mapping_mut)
            .find(|e| e.get("name").and_then(Value::as_str) == Some(name))
        {
            Some(existing) => {
                existing.remove("valueFrom");
                existing.insert(Value::from("value"), Value::from(value));
            }
            None => {
                let mut entry = Mapping::new();
                entry.insert(Value::from("name"), Value::from(name));
                entry.insert(Value::from("value"), Value::from(value));
                entries.push(Value::Mapping(entry));
            }
        }
        Ok(())
    }

    /// Remove `name` from the container's env. Returns whether it was present.
    pub fn remove_env(&mut self, container: &str, name: &str) -> Result<bool, ManifestError> {
        let target = self.container_mut(None, container)?;
        let Some(entries) = target.get_mut("env").and_then(Value::as_sequence_mut) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|e| e.get("name").and_then(Value::as_str) != Some(name));
        Ok(entries.len() != before)
    }

    /// Drop the whole env list of one container in one deployment.
    pub fn clear_env(&mut self, deployment: &str, container: &str) -> Result<(), ManifestError> {
        let target = self.container_mut(Some(deployment), container)?;
        target.remove("env");
        Ok(())
    }

    pub fn env_value(&self, container: &str, name: &str) -> Option<String> {
        let deployments = self
            .doc
            .get("spec")?
            .get("install")?
            .get("spec")?
            .get("deployments")?
            .as_sequence()?;
        deployments
            .iter()
            .filter_map(|d| {
                d.get("spec")?
                    .get("template")?
                    .get("spec")?
                    .get("containers")?
                    .as_sequence()
            })
            .flatten()
            .filter(|c| c.get("name").and_then(Value::as_str) == Some(container))
            .filter_map(|c| c.get("env")?.as_sequence())
            .flatten()
            .find(|e| e.get("name").and_then(Value::as_str) == Some(name))
            .and_then(|e| e.get("value"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn set_install_mode(&mut self, mode: &str, supported: bool) -> Result<(), ManifestError> {
        let file = self.path.clone();
        let entry = self
            .doc
            .get_mut("spec")
            .and_then(|s| s.get_mut("installModes"))
            .and_then(Value::as_sequence_mut)
            .and_then(|modes| {
                modes
                    .iter_mut()
                    .filter_map(Value::as_mapping_mut)
                    .find(|m| m.get("type").and_then(Value::as_str) == Some(mode))
            })
            .ok_or_else(|| ManifestError::shape(&file, format!("installMode {mode}")))?;
        entry.insert(Value::from("supported"), Value::Bool(supported));
        Ok(())
    }

    pub fn install_mode_supported(&self, mode: &str) -> Option<bool> {
        self.doc
            .get("spec")?
            .get("installModes")?
            .as_sequence()?
            .iter()
            .find(|m| m.get("type").and_then(Value::as_str) == Some(mode))?
            .get("supported")?
            .as_bool()
    }
}

/// Production-current version from an addon descriptor:
/// `channels[0].currentCSV`, right of the last `.v`.
pub fn read_production_version(path: &Path, olm_type: OlmType) -> Result<Version, ManifestError> {
    let doc: Value = read_yaml(path)?;
    let current = doc
        .get("channels")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("currentCSV"))
        .and_then(Value::as_str)
        .ok_or_else(|| ManifestError::shape(path, "channels[0].currentCSV"))?;
    let (_, raw) = current
        .rsplit_once(".v")
        .ok_or_else(|| ManifestError::shape(path, format!("a versioned CSV name, got {current}")))?;
    Version::parse(raw, olm_type).map_err(|source| ManifestError::Version {
        path: path.to_path_buf(),
        source,
    })
}

/// The newest addon image-set file in `dir`: highest embedded version, then
/// latest modification time.
pub fn latest_image_set(dir: &Path) -> Result<PathBuf, ManifestError> {
    let entries = fs::read_dir(dir).map_err(|e| ManifestError::io(dir, e))?;
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "yaml" || e == "yml")
        })
        .map(|p| {
            let version = p
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(version_from_csv_name);
            let modified = fs::metadata(&p).and_then(|m| m.modified()).ok();
            ((version, modified), p)
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, p)| p)
        .ok_or_else(|| ManifestError::shape(dir, "an addon image-set file"))
}

/// Copy the newest image set from `stage_dir` into `dest_dir` as
/// `<channel_dir>.v<base>.yaml`, returning the new file.
pub fn copy_image_set_forward(
    stage_dir: &Path,
    dest_dir: &Path,
    channel_dir: &str,
    version: &Version,
) -> Result<PathBuf, ManifestError> {
    let source = latest_image_set(stage_dir)?;
    fs::create_dir_all(dest_dir).map_err(|e| ManifestError::io(dest_dir, e))?;
    let dest = dest_dir.join(format!("{channel_dir}.v{}.yaml", version.base()));
    fs::copy(&source, &dest).map_err(|e| ManifestError::io(&dest, e))?;
    info!(
        from = %source.display(),
        to = %dest.display(),
        "[MANIFEST] Addon image set copied forward"
    );
    Ok(dest)
}
