use std::time::{SystemTime, UNIX_EPOCH};

use cfkv_store::{Column, TableDescriptor, TableName, ValueType};
use serde::{Deserialize, Serialize};

use crate::context::ClientContext;
use crate::error::{IndexError, IndexResult};

/// Descriptor key under which a table's index specifications are stored.
pub const INDEX_SPECS_DESCRIPTOR_KEY: &str = "cfkv.index_specs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// Maintained on writes, not yet used by scans.
    #[default]
    WriteOnly,
    /// Maintained and eligible for indexed scans.
    Public,
}

/// Named secondary index over one column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub table: TableName,
    pub column: Column,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub state: IndexState,
    #[serde(default)]
    pub created_at_unix_ms: u64,
    #[serde(default)]
    pub updated_at_unix_ms: u64,
}

impl IndexSpec {
    pub fn new(
        table: impl Into<TableName>,
        name: impl Into<String>,
        family: impl Into<String>,
        qualifier: impl Into<String>,
        value_type: ValueType,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            column: Column::new(family, qualifier),
            value_type,
            state: IndexState::WriteOnly,
            created_at_unix_ms: 0,
            updated_at_unix_ms: 0,
        }
    }

    pub fn covers(&self, column: &Column) -> bool {
        self.column == *column
    }

    pub fn is_public(&self) -> bool {
        self.state == IndexState::Public
    }

    pub fn validate(&self) -> IndexResult<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(IndexError::InvalidRequest(format!(
                "index on table '{}' has empty name",
                self.table
            )));
        }
        // The name becomes part of the index table name.
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(IndexError::InvalidRequest(format!(
                "index name '{}' may only contain ASCII letters, digits, '_', '-' and '.'",
                self.name
            )));
        }
        if self.table.as_str().trim().is_empty() {
            return Err(IndexError::InvalidRequest(format!(
                "index '{}' has empty table name",
                self.name
            )));
        }
        if self.column.family.trim().is_empty() || self.column.qualifier.trim().is_empty() {
            return Err(IndexError::InvalidRequest(format!(
                "index '{}' has empty column '{}'",
                self.name, self.column
            )));
        }
        Ok(())
    }

    /// Checks the spec against the descriptor of the table it targets.
    pub fn validate_against(&self, descriptor: &TableDescriptor) -> IndexResult<()> {
        self.validate()?;
        if descriptor.name != self.table {
            return Err(IndexError::InvalidRequest(format!(
                "index '{}' targets table '{}' but descriptor is for '{}'",
                self.name, self.table, descriptor.name
            )));
        }
        if !descriptor.has_family(&self.column.family) {
            return Err(IndexError::InvalidRequest(format!(
                "index '{}' references unknown column family '{}' on table '{}'",
                self.name, self.column.family, self.table
            )));
        }
        Ok(())
    }
}

fn normalize_index_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Decodes the index specifications stored in `descriptor`, sorted by name.
pub fn read_index_specs(descriptor: &TableDescriptor) -> IndexResult<Vec<IndexSpec>> {
    let Some(raw) = descriptor.value(INDEX_SPECS_DESCRIPTOR_KEY) else {
        return Ok(Vec::new());
    };
    let mut specs: Vec<IndexSpec> = serde_json::from_slice(raw).map_err(|err| {
        IndexError::InvalidRequest(format!(
            "corrupt index metadata on table '{}': {err}",
            descriptor.name
        ))
    })?;
    specs.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(specs)
}

fn write_index_specs(descriptor: &mut TableDescriptor, specs: &[IndexSpec]) -> IndexResult<()> {
    if specs.is_empty() {
        descriptor.remove_value(INDEX_SPECS_DESCRIPTOR_KEY);
        return Ok(());
    }
    let raw = serde_json::to_vec(specs).map_err(|err| {
        IndexError::InvalidRequest(format!(
            "failed to encode index metadata for table '{}': {err}",
            descriptor.name
        ))
    })?;
    descriptor.set_value(INDEX_SPECS_DESCRIPTOR_KEY, raw);
    Ok(())
}

/// Registers `spec` in `descriptor` in the `WriteOnly` state.
///
/// Runs inside a schema transition. Names compare case-insensitively and are
/// stored lower-cased.
pub fn add_index(descriptor: &mut TableDescriptor, spec: IndexSpec) -> IndexResult<IndexSpec> {
    let mut spec = spec;
    spec.name = normalize_index_name(&spec.name);
    spec.validate_against(descriptor)?;
    let mut specs = read_index_specs(descriptor)?;
    if specs.iter().any(|existing| existing.name == spec.name) {
        return Err(IndexError::DuplicateIndex {
            table: descriptor.name.clone(),
            index: spec.name,
        });
    }
    let now = now_unix_epoch_millis();
    spec.state = IndexState::WriteOnly;
    spec.created_at_unix_ms = now;
    spec.updated_at_unix_ms = now;
    specs.push(spec.clone());
    write_index_specs(descriptor, &specs)?;
    Ok(spec)
}

/// Removes index `name` from `descriptor` and returns its specification.
pub fn drop_index(descriptor: &mut TableDescriptor, name: &str) -> IndexResult<IndexSpec> {
    let name = normalize_index_name(name);
    let mut specs = read_index_specs(descriptor)?;
    let Some(position) = specs.iter().position(|spec| spec.name == name) else {
        return Err(IndexError::IndexNotFound {
            table: descriptor.name.clone(),
            index: name,
        });
    };
    let removed = specs.remove(position);
    write_index_specs(descriptor, &specs)?;
    Ok(removed)
}

pub fn set_index_state(
    descriptor: &mut TableDescriptor,
    name: &str,
    state: IndexState,
) -> IndexResult<IndexSpec> {
    let name = normalize_index_name(name);
    let mut specs = read_index_specs(descriptor)?;
    let Some(spec) = specs.iter_mut().find(|spec| spec.name == name) else {
        return Err(IndexError::IndexNotFound {
            table: descriptor.name.clone(),
            index: name,
        });
    };
    spec.state = state;
    spec.updated_at_unix_ms = now_unix_epoch_millis();
    let updated = spec.clone();
    write_index_specs(descriptor, &specs)?;
    Ok(updated)
}

/// Index specifications registered on `table`.
pub async fn list_indexes(ctx: &ClientContext, table: &TableName) -> IndexResult<Vec<IndexSpec>> {
    let descriptor = ctx.store().get_schema(table).await?;
    read_index_specs(&descriptor)
}

pub async fn find_index(
    ctx: &ClientContext,
    table: &TableName,
    name: &str,
) -> IndexResult<IndexSpec> {
    let wanted = normalize_index_name(name);
    list_indexes(ctx, table)
        .await?
        .into_iter()
        .find(|spec| spec.name == wanted)
        .ok_or_else(|| IndexError::IndexNotFound {
            table: table.clone(),
            index: wanted,
        })
}

/// Index covering `family:qualifier` on `table`, preferring a `Public` one.
pub async fn lookup_index_for(
    ctx: &ClientContext,
    table: &TableName,
    family: &str,
    qualifier: &str,
) -> IndexResult<Option<IndexSpec>> {
    let column = Column::new(family, qualifier);
    let specs = list_indexes(ctx, table).await?;
    Ok(select_index_for(&specs, &column).cloned())
}

pub(crate) fn select_index_for<'a>(specs: &'a [IndexSpec], column: &Column) -> Option<&'a IndexSpec> {
    specs
        .iter()
        .find(|spec| spec.covers(column) && spec.is_public())
        .or_else(|| specs.iter().find(|spec| spec.covers(column)))
}

fn now_unix_epoch_millis() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(u64::MAX as u128) as u64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use cfkv_store::ColumnFamilyDescriptor;

    use super::*;

    fn descriptor() -> TableDescriptor {
        TableDescriptor::new("people").with_family(ColumnFamilyDescriptor::new("info"))
    }

    fn name_index() -> IndexSpec {
        IndexSpec::new("people", "Index_Name", "info", "name", ValueType::String)
    }

    #[test]
    fn add_then_duplicate_then_drop() {
        let mut descriptor = descriptor();
        let added = add_index(&mut descriptor, name_index()).expect("add");
        assert_eq!(added.name, "index_name");
        assert_eq!(added.state, IndexState::WriteOnly);
        assert!(added.created_at_unix_ms > 0);

        let err = add_index(&mut descriptor, name_index()).expect_err("duplicate");
        assert_eq!(
            err,
            IndexError::DuplicateIndex {
                table: TableName::new("people"),
                index: "index_name".to_string()
            }
        );

        let removed = drop_index(&mut descriptor, "INDEX_NAME").expect("drop");
        assert_eq!(removed.column, Column::new("info", "name"));
        assert!(descriptor.value(INDEX_SPECS_DESCRIPTOR_KEY).is_none());

        let err = drop_index(&mut descriptor, "index_name").expect_err("second drop");
        assert!(matches!(err, IndexError::IndexNotFound { .. }));
    }

    #[test]
    fn add_rejects_unknown_family_and_bad_names() {
        let mut descriptor = descriptor();
        let spec = IndexSpec::new("people", "by_grade", "education", "grade", ValueType::Int);
        assert!(matches!(
            add_index(&mut descriptor, spec),
            Err(IndexError::InvalidRequest(_))
        ));
        let spec = IndexSpec::new("people", "has space", "info", "name", ValueType::String);
        assert!(matches!(
            add_index(&mut descriptor, spec),
            Err(IndexError::InvalidRequest(_))
        ));
        let spec = IndexSpec::new("other", "by_name", "info", "name", ValueType::String);
        assert!(matches!(
            add_index(&mut descriptor, spec),
            Err(IndexError::InvalidRequest(_))
        ));
        assert!(read_index_specs(&descriptor).expect("read").is_empty());
    }

    #[test]
    fn state_update_and_public_preference() {
        let mut descriptor = descriptor();
        add_index(&mut descriptor, name_index()).expect("add");
        add_index(
            &mut descriptor,
            IndexSpec::new("people", "a_name_rebuild", "info", "name", ValueType::String),
        )
        .expect("add second");
        set_index_state(&mut descriptor, "index_name", IndexState::Public).expect("publish");

        let specs = read_index_specs(&descriptor).expect("read");
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "a_name_rebuild");
        let chosen = select_index_for(&specs, &Column::new("info", "name")).expect("index");
        assert_eq!(chosen.name, "index_name");
        assert!(select_index_for(&specs, &Column::new("info", "age")).is_none());
    }

    #[test]
    fn corrupt_metadata_is_reported() {
        let mut descriptor = descriptor();
        descriptor.set_value(INDEX_SPECS_DESCRIPTOR_KEY, b"{not json".to_vec());
        assert!(matches!(
            read_index_specs(&descriptor),
            Err(IndexError::InvalidRequest(_))
        ));
    }
}
