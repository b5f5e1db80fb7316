use crate::domain::xml::{self, XmlNode};
use crate::utils::error::{LcrError, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A complete Soft-LCR 4.0 table set, as exchanged with the PBX.
///
/// The raw text is kept exactly as received so snapshots and uploads are byte-faithful;
/// the parsed tree only backs inspection and comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcrDocument {
    raw: String,
    root: XmlNode,
}

impl LcrDocument {
    pub const ROOT_ELEMENT: &'static str = "Slcr4TablesDB";
    pub const ROUTING_ENTRY_TABLE: &'static str = "SlcrRoutingEntry_table";

    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let root = xml::parse_tree(&raw)?;
        if root.name != Self::ROOT_ELEMENT {
            return Err(LcrError::xml(format!(
                "root element is <{}>, expected <{}>",
                root.name,
                Self::ROOT_ELEMENT
            )));
        }
        Ok(Self { raw, root })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let raw = String::from_utf8(bytes)
            .map_err(|e| LcrError::xml(format!("document is not UTF-8: {}", e)))?;
        Self::parse(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }

    pub fn root(&self) -> &XmlNode {
        &self.root
    }

    /// Indented rendering for humans; parses back to the same tree.
    pub fn pretty(&self) -> Result<String> {
        xml::pretty_print(&self.raw)
    }

    /// Number of rows in each `*_table` section, keyed by section name.
    pub fn table_counts(&self) -> BTreeMap<String, usize> {
        self.root
            .children
            .iter()
            .filter(|table| table.name.ends_with("_table"))
            .map(|table| (table.name.clone(), table.children.len()))
            .collect()
    }

    pub fn routing_entry_count(&self) -> usize {
        self.root
            .child(Self::ROUTING_ENTRY_TABLE)
            .map(|table| table.children.len())
            .unwrap_or(0)
    }
}

/// Identifier shared by every artifact of one update run, e.g. `2026-10-16_031500`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub const FORMAT: &'static str = "%Y-%m-%d_%H%M%S";

    pub fn now() -> Self {
        Self::from_time(Local::now())
    }

    pub fn from_time(time: DateTime<Local>) -> Self {
        Self(time.format(Self::FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document together with the file it was captured to inside the run bundle.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub path: PathBuf,
    pub document: LcrDocument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Tables were equivalent; nothing was uploaded and the working area is gone.
    NoChange { run_id: RunId },
    /// The candidate was uploaded and the run archived.
    Updated {
        run_id: RunId,
        differences: usize,
        archive: PathBuf,
    },
}
