//! Offline comparison of the tariff caches kept in two run bundles.

use crate::utils::error::{LcrError, Result};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

/// The `*.yaml` files of one run, from a directory or a run archive.
#[derive(Debug, Clone)]
pub struct CacheSet {
    label: String,
    files: BTreeMap<String, String>,
}

impl CacheSet {
    /// Loads every `*.yaml` file below `path`, at any depth.
    ///
    /// Files are keyed by their path below the deepest directory they all share, so a run
    /// directory, its `cache/` subdirectory and the run's archive produce the same keys.
    /// A path holding no YAML at all is an error, never an empty set.
    pub fn load(path: &Path) -> Result<Self> {
        let mut files = Vec::new();
        if path.is_file() {
            read_archive(path, &mut files)?;
        } else {
            read_directory(path, path, &mut files)?;
        }
        if files.is_empty() {
            return Err(LcrError::cache(format!(
                "no *.yaml files found in {}",
                path.display()
            )));
        }

        Ok(Self {
            label: path.display().to_string(),
            files: strip_shared_prefix(files),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    fn parse(&self, name: &str) -> Option<Result<Value>> {
        self.files
            .get(name)
            .map(|content| serde_yaml::from_str(content).map_err(Into::into))
    }
}

/// Relative path split into components, with the file content.
type CacheFile = (Vec<String>, String);

fn is_yaml(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "yaml")
}

fn components(path: &Path) -> Vec<String> {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect()
}

fn read_directory(root: &Path, dir: &Path, out: &mut Vec<CacheFile>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            read_directory(root, &path, out)?;
        } else if is_yaml(&path) {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            out.push((components(relative), fs::read_to_string(&path)?));
        }
    }
    Ok(())
}

fn read_archive(path: &Path, out: &mut Vec<CacheFile>) -> Result<()> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        // entries escaping the archive root are ignored
        let Some(name) = entry.enclosed_name() else {
            continue;
        };
        if !is_yaml(&name) {
            continue;
        }
        let mut content = String::new();
        entry.read_to_string(&mut content)?;
        out.push((components(&name), content));
    }
    Ok(())
}

fn strip_shared_prefix(mut files: Vec<CacheFile>) -> BTreeMap<String, String> {
    loop {
        let shared = match files.first() {
            Some((parts, _)) if parts.len() > 1 => parts[0].clone(),
            _ => break,
        };
        if !files
            .iter()
            .all(|(parts, _)| parts.len() > 1 && parts[0] == shared)
        {
            break;
        }
        for (parts, _) in &mut files {
            parts.remove(0);
        }
    }

    files
        .into_iter()
        .map(|(parts, content)| (parts.join("/"), content))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDifference {
    MissingFile {
        file: String,
        present_in: String,
        missing_from: String,
    },
    ListLength {
        file: String,
        path: String,
        left: usize,
        right: usize,
    },
    Value {
        file: String,
        path: String,
        left: String,
        right: String,
    },
}

impl fmt::Display for CacheDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheDifference::MissingFile {
                file,
                present_in,
                missing_from,
            } => write!(f, "{}: exists in '{}' but not in '{}'", file, present_in, missing_from),
            CacheDifference::ListLength {
                file,
                path,
                left,
                right,
            } => write!(f, "{}: {}: list length {} vs {}", file, path, left, right),
            CacheDifference::Value {
                file,
                path,
                left,
                right,
            } => write!(f, "{}: {}: {} vs {}", file, path, left, right),
        }
    }
}

/// Walks every YAML file present in `left` and reports where `right` deviates. Files only
/// present in `right` are skipped.
pub fn compare_caches(left: &CacheSet, right: &CacheSet) -> Result<Vec<CacheDifference>> {
    let mut differences = Vec::new();
    let names: BTreeSet<&str> = left.file_names().chain(right.file_names()).collect();

    for name in names {
        let (a, b) = match (left.parse(name), right.parse(name)) {
            (Some(a), Some(b)) => (a?, b?),
            (Some(_), None) => {
                differences.push(CacheDifference::MissingFile {
                    file: name.to_string(),
                    present_in: left.label().to_string(),
                    missing_from: right.label().to_string(),
                });
                continue;
            }
            _ => {
                tracing::debug!("Skipping {}: only in {}", name, right.label());
                continue;
            }
        };
        tracing::debug!("Comparing file: {}", name);
        compare_values(name, "", &a, &b, &mut differences);
    }

    Ok(differences)
}

fn compare_values(file: &str, path: &str, a: &Value, b: &Value, out: &mut Vec<CacheDifference>) {
    match (a, b) {
        (Value::Mapping(a), Value::Mapping(b)) => compare_mappings(file, path, a, b, out),
        (Value::Sequence(a), Value::Sequence(b)) => {
            if a.len() != b.len() {
                out.push(CacheDifference::ListLength {
                    file: file.to_string(),
                    path: display_path(path),
                    left: a.len(),
                    right: b.len(),
                });
                return;
            }
            for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
                compare_values(file, &format!("{}[{}]", path, i), x, y, out);
            }
        }
        (a, b) if a != b => out.push(CacheDifference::Value {
            file: file.to_string(),
            path: display_path(path),
            left: render(Some(a)),
            right: render(Some(b)),
        }),
        _ => {}
    }
}

fn compare_mappings(file: &str, path: &str, a: &Mapping, b: &Mapping, out: &mut Vec<CacheDifference>) {
    let mut keys: Vec<&Value> = a.keys().collect();
    for key in b.keys() {
        if lookup(a, key).is_none() {
            keys.push(key);
        }
    }
    keys.sort_by_key(|key| render(Some(*key)));

    for key in keys {
        let child = format!("{}/{}", path, render(Some(key)));
        match (lookup(a, key), lookup(b, key)) {
            (Some(x), Some(y)) => compare_values(file, &child, x, y, out),
            (x, y) => out.push(CacheDifference::Value {
                file: file.to_string(),
                path: child,
                left: render(x),
                right: render(y),
            }),
        }
    }
}

fn lookup<'a>(mapping: &'a Mapping, key: &Value) -> Option<&'a Value> {
    mapping.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        None => "<absent>".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => serde_yaml::to_string(other)
            .map(|s| s.trim().replace('\n', " "))
            .unwrap_or_else(|_| format!("{:?}", other)),
    }
}

/// Time-slot keys of the `providers` map in every file of `set`.
pub fn provider_slots(set: &CacheSet) -> Result<BTreeMap<String, Vec<String>>> {
    let mut slots = BTreeMap::new();
    for name in set.file_names() {
        let Some(parsed) = set.parse(name) else {
            continue;
        };
        let keys = match parsed?.get("providers") {
            Some(Value::Mapping(providers)) => providers.keys().map(|k| render(Some(k))).collect(),
            _ => {
                tracing::warn!("⚠️ {} has no providers map", name);
                Vec::new()
            }
        };
        slots.insert(name.to_string(), keys);
    }
    Ok(slots)
}
