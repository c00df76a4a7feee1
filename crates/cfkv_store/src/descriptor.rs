//! Table and column-family schema descriptors.
//!
//! A [`TableDescriptor`] is read and written as a whole. Besides the family
//! list it carries an opaque key/value map that higher layers use to persist
//! their own metadata (for example secondary-index registrations).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::types::TableName;

/// On-disk block encoding for a family. Pass-through for the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataBlockEncoding {
    #[default]
    None,
    Prefix,
    Diff,
    FastDiff,
    PrefixTree,
}

/// File compression for a family. Pass-through for the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    None,
    Gz,
    Snappy,
    Lz4,
}

const DEFAULT_MAX_VERSIONS: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFamilyDescriptor {
    pub name: String,
    #[serde(default)]
    pub data_block_encoding: DataBlockEncoding,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default = "default_max_versions")]
    pub max_versions: u32,
    /// Values at or above `mob_threshold` bytes are stored out of line.
    #[serde(default)]
    pub mob_enabled: bool,
    #[serde(default)]
    pub mob_threshold: u64,
}

fn default_max_versions() -> u32 {
    DEFAULT_MAX_VERSIONS
}

impl ColumnFamilyDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_block_encoding: DataBlockEncoding::None,
            compression: Compression::None,
            max_versions: DEFAULT_MAX_VERSIONS,
            mob_enabled: false,
            mob_threshold: 0,
        }
    }

    pub fn with_encoding(mut self, encoding: DataBlockEncoding) -> Self {
        self.data_block_encoding = encoding;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_mob(mut self, threshold: u64) -> Self {
        self.mob_enabled = true;
        self.mob_threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: TableName,
    pub families: Vec<ColumnFamilyDescriptor>,
    #[serde(default)]
    pub values: BTreeMap<String, Vec<u8>>,
    /// Bumped by the store on every successful schema write.
    #[serde(default)]
    pub version: u64,
}

impl TableDescriptor {
    pub fn new(name: impl Into<TableName>) -> Self {
        Self {
            name: name.into(),
            families: Vec::new(),
            values: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn with_family(mut self, family: ColumnFamilyDescriptor) -> Self {
        self.add_family(family);
        self
    }

    /// Adds `family` unless one with the same name exists. Returns whether
    /// the descriptor changed.
    pub fn add_family(&mut self, family: ColumnFamilyDescriptor) -> bool {
        if self.has_family(&family.name) {
            return false;
        }
        self.families.push(family);
        true
    }

    pub fn has_family(&self, name: &str) -> bool {
        self.family(name).is_some()
    }

    pub fn family(&self, name: &str) -> Option<&ColumnFamilyDescriptor> {
        self.families.iter().find(|family| family.name == name)
    }

    pub fn value(&self, key: &str) -> Option<&[u8]> {
        self.values.get(key).map(Vec::as_slice)
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.values.insert(key.into(), value);
    }

    pub fn remove_value(&mut self, key: &str) -> Option<Vec<u8>> {
        self.values.remove(key)
    }

    /// Validates structural fields before the descriptor is persisted.
    pub fn validate(&self) -> StoreResult<()> {
        if self.name.as_str().trim().is_empty() {
            return Err(StoreError::InvalidDescriptor(
                "table descriptor has empty name".to_string(),
            ));
        }
        if self.families.is_empty() {
            return Err(StoreError::InvalidDescriptor(format!(
                "table '{}' has no column families",
                self.name
            )));
        }
        let mut seen = BTreeSet::new();
        for family in &self.families {
            if family.name.trim().is_empty() {
                return Err(StoreError::InvalidDescriptor(format!(
                    "table '{}' has a column family with an empty name",
                    self.name
                )));
            }
            if !seen.insert(family.name.as_str()) {
                return Err(StoreError::InvalidDescriptor(format!(
                    "table '{}' declares column family '{}' twice",
                    self.name, family.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_family_is_noop_for_existing_name() {
        let mut descriptor =
            TableDescriptor::new("t").with_family(ColumnFamilyDescriptor::new("info"));
        assert!(!descriptor.add_family(ColumnFamilyDescriptor::new("info")));
        assert!(descriptor.add_family(ColumnFamilyDescriptor::new("education")));
        assert_eq!(descriptor.families.len(), 2);
    }

    #[test]
    fn validate_rejects_duplicate_and_missing_families() {
        let empty = TableDescriptor::new("t");
        assert!(matches!(
            empty.validate(),
            Err(StoreError::InvalidDescriptor(_))
        ));

        let mut dup = TableDescriptor::new("t").with_family(ColumnFamilyDescriptor::new("a"));
        dup.families.push(ColumnFamilyDescriptor::new("a"));
        assert!(dup.validate().is_err());
    }

    #[test]
    fn family_attributes_default_when_absent_from_json() {
        let family: ColumnFamilyDescriptor =
            serde_json::from_str(r#"{"name":"info"}"#).expect("decode family");
        assert_eq!(family.max_versions, 1);
        assert_eq!(family.compression, Compression::None);
        assert!(!family.mob_enabled);
    }
}
