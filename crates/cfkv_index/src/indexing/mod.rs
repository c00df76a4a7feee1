//! Secondary-index subsystem.
//!
//! Owns index metadata stored in table descriptors, index-key encoding,
//! write-path maintenance and the index lifecycle (create, rebuild, drop).

mod ddl;
mod keys;
mod maintainer;
mod metadata;

pub use ddl::{create_index, drop_index, rebuild_index, RebuildReport};
pub(crate) use ddl::delete_store_table;
pub use keys::{
    decode_index_entry_row_key, encode_index_entry_key, encode_index_value, index_lookup_range,
    INDEX_FAMILY, INDEX_MARKER_QUALIFIER,
};
pub use maintainer::{
    apply_index_mutations, on_mutation, plan_index_mutations, CellChange, IndexMutation,
    IndexMutationKind,
};
pub use metadata::{
    add_index, find_index, list_indexes, lookup_index_for, read_index_specs, set_index_state,
    IndexSpec, IndexState, INDEX_SPECS_DESCRIPTOR_KEY,
};
pub(crate) use metadata::select_index_for;
