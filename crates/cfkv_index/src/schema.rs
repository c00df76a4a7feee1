//! Schema transitions and per-table availability.
//!
//! Every structural change to a table (column family added, index
//! registered, published or dropped) goes through [`apply_schema_change`]:
//!
//! ```text
//! ENABLED -> DISABLING -> DISABLED -> MODIFYING -> DISABLED -> ENABLING -> ENABLED
//! ```
//!
//! Row operations hold a shared [`TableHandle`] while they run. A transition
//! first flips the table out of `Enabled` so new row operations fail fast,
//! then waits (bounded) for outstanding handles to drain before disabling
//! the table in the store.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cfkv_store::{TableDescriptor, TableName};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, info, info_span, warn, Instrument};

use crate::context::ClientContext;
use crate::error::{IndexError, IndexResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableState {
    Enabled,
    Disabling,
    Disabled,
    Modifying,
    Enabling,
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enabled => "ENABLED",
            Self::Disabling => "DISABLING",
            Self::Disabled => "DISABLED",
            Self::Modifying => "MODIFYING",
            Self::Enabling => "ENABLING",
        };
        f.write_str(name)
    }
}

pub(crate) struct TableGate {
    state: Mutex<TableState>,
    inflight: Arc<RwLock<()>>,
}

impl TableGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(TableState::Enabled),
            inflight: Arc::new(RwLock::new(())),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> TableState {
        *self.lock_state()
    }

    fn set_state(&self, state: TableState) {
        *self.lock_state() = state;
    }

    /// Moves to `to` when the current state is one of `from`; returns the
    /// previous state, or the offending state on refusal.
    fn transition(&self, from: &[TableState], to: TableState) -> Result<TableState, TableState> {
        let mut current = self.lock_state();
        if from.contains(&current) {
            let previous = *current;
            *current = to;
            Ok(previous)
        } else {
            Err(*current)
        }
    }
}

/// Availability registry keyed by table name.
#[derive(Default)]
pub(crate) struct TableGates {
    gates: Mutex<HashMap<TableName, Arc<TableGate>>>,
}

impl TableGates {
    fn gate(&self, table: &TableName) -> Arc<TableGate> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates
            .entry(table.clone())
            .or_insert_with(|| Arc::new(TableGate::new()))
            .clone()
    }

    pub(crate) fn state(&self, table: &TableName) -> TableState {
        self.gate(table).state()
    }

    pub(crate) fn forget(&self, table: &TableName) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates.remove(table);
    }

    /// Claims a shared handle, failing fast unless the table is `Enabled`.
    pub(crate) fn open(&self, table: &TableName) -> IndexResult<TableHandle> {
        let gate = self.gate(table);
        let unavailable = |state| IndexError::TableUnavailable {
            table: table.clone(),
            state,
        };
        let state = gate.state();
        if state != TableState::Enabled {
            return Err(unavailable(state));
        }
        let permit = gate
            .inflight
            .clone()
            .try_read_owned()
            .map_err(|_| unavailable(gate.state()))?;
        // A transition may have started between the state check and the claim.
        let state = gate.state();
        if state != TableState::Enabled {
            return Err(unavailable(state));
        }
        Ok(TableHandle {
            table: table.clone(),
            _permit: permit,
        })
    }
}

/// Shared claim on a table for the duration of one row operation or scan.
/// Dropping the handle releases it.
#[derive(Debug)]
pub struct TableHandle {
    table: TableName,
    _permit: OwnedRwLockReadGuard<()>,
}

impl TableHandle {
    pub fn table(&self) -> &TableName {
        &self.table
    }
}

/// Waits for outstanding handles on `table` to drain.
async fn drain(
    ctx: &ClientContext,
    gate: &TableGate,
    table: &TableName,
) -> IndexResult<OwnedRwLockWriteGuard<()>> {
    let wait = ctx.config().schema_drain_timeout;
    match tokio::time::timeout(wait, gate.inflight.clone().write_owned()).await {
        Ok(guard) => Ok(guard),
        Err(_) => {
            warn!(
                table = %table,
                timeout_ms = wait.as_millis() as u64,
                "in-flight operations did not drain before schema change"
            );
            Err(IndexError::TableUnavailable {
                table: table.clone(),
                state: TableState::Disabling,
            })
        }
    }
}

/// Applies `mutate` to the descriptor of `table` under the
/// disable/modify/enable discipline and returns what `mutate` produced.
///
/// - The disable step failing (drain timeout, store error) aborts before any
///   mutation; the table returns to its previous state.
/// - `mutate` or the descriptor write failing yields
///   [`IndexError::SchemaMutation`]; the stored descriptor is unchanged and
///   the table stays `Disabled`.
/// - A table already `Disabled` (operator repair) skips the disable step.
pub async fn apply_schema_change<T, F>(
    ctx: &ClientContext,
    table: &TableName,
    mutate: F,
) -> IndexResult<T>
where
    F: FnOnce(&mut TableDescriptor) -> IndexResult<T>,
{
    let span = info_span!("schema_change", table = %table);
    run_schema_change(ctx, table, mutate).instrument(span).await
}

async fn run_schema_change<T, F>(ctx: &ClientContext, table: &TableName, mutate: F) -> IndexResult<T>
where
    F: FnOnce(&mut TableDescriptor) -> IndexResult<T>,
{
    let gate = ctx.gates().gate(table);
    let previous = gate
        .transition(
            &[TableState::Enabled, TableState::Disabled],
            TableState::Disabling,
        )
        .map_err(|state| IndexError::TableUnavailable {
            table: table.clone(),
            state,
        })?;

    let _exclusive = match drain(ctx, &gate, table).await {
        Ok(guard) => guard,
        Err(err) => {
            gate.set_state(previous);
            return Err(err);
        }
    };
    if previous == TableState::Enabled {
        if let Err(err) = ctx.store().disable_table(table).await {
            gate.set_state(TableState::Enabled);
            warn!(error = %err, "disable step failed; schema change aborted");
            return Err(err.into());
        }
    }

    gate.set_state(TableState::Modifying);
    let outcome = modify_descriptor(ctx, table, mutate).await;
    gate.set_state(TableState::Disabled);
    let value = match outcome {
        Ok(value) => value,
        Err(cause) => {
            ctx.metrics().record_schema_failure();
            error!(error = %cause, "schema modify step failed; table left disabled");
            return Err(IndexError::SchemaMutation {
                table: table.clone(),
                cause: Box::new(cause),
            });
        }
    };

    gate.set_state(TableState::Enabling);
    if let Err(err) = ctx.store().enable_table(table).await {
        gate.set_state(TableState::Disabled);
        warn!(error = %err, "enable step failed; table left disabled with new schema");
        return Err(err.into());
    }
    gate.set_state(TableState::Enabled);
    ctx.metrics().record_schema_transition();
    info!("schema change applied");
    Ok(value)
}

async fn modify_descriptor<T, F>(ctx: &ClientContext, table: &TableName, mutate: F) -> IndexResult<T>
where
    F: FnOnce(&mut TableDescriptor) -> IndexResult<T>,
{
    let current = ctx.store().get_schema(table).await?;
    let mut next = current.clone();
    let value = mutate(&mut next)?;
    if next.name != current.name {
        return Err(IndexError::InvalidRequest(format!(
            "schema change on '{}' may not rename it to '{}'",
            current.name, next.name
        )));
    }
    if next != current {
        ctx.store().modify_schema(table, next).await?;
    }
    Ok(value)
}

/// Disables `table` after in-flight operations drain. No-op when already
/// disabled in this context.
pub async fn disable_table(ctx: &ClientContext, table: &TableName) -> IndexResult<()> {
    let gate = ctx.gates().gate(table);
    let previous = gate
        .transition(
            &[TableState::Enabled, TableState::Disabled],
            TableState::Disabling,
        )
        .map_err(|state| IndexError::TableUnavailable {
            table: table.clone(),
            state,
        })?;
    let _exclusive = match drain(ctx, &gate, table).await {
        Ok(guard) => guard,
        Err(err) => {
            gate.set_state(previous);
            return Err(err);
        }
    };
    if let Err(err) = ctx.store().disable_table(table).await {
        gate.set_state(previous);
        return Err(err.into());
    }
    gate.set_state(TableState::Disabled);
    info!(table = %table, "table disabled");
    Ok(())
}

pub async fn enable_table(ctx: &ClientContext, table: &TableName) -> IndexResult<()> {
    let gate = ctx.gates().gate(table);
    let previous = gate
        .transition(
            &[TableState::Enabled, TableState::Disabled],
            TableState::Enabling,
        )
        .map_err(|state| IndexError::TableUnavailable {
            table: table.clone(),
            state,
        })?;
    if let Err(err) = ctx.store().enable_table(table).await {
        gate.set_state(previous);
        return Err(err.into());
    }
    gate.set_state(TableState::Enabled);
    info!(table = %table, "table enabled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_refuses_unexpected_state() {
        let gate = TableGate::new();
        assert_eq!(
            gate.transition(&[TableState::Enabled], TableState::Disabling),
            Ok(TableState::Enabled)
        );
        assert_eq!(
            gate.transition(&[TableState::Enabled], TableState::Disabling),
            Err(TableState::Disabling)
        );
    }

    #[tokio::test]
    async fn open_fails_fast_outside_enabled() {
        let gates = TableGates::default();
        let table = TableName::new("t");
        let handle = gates.open(&table).expect("enabled by default");
        assert_eq!(handle.table(), &table);
        drop(handle);

        gates.gate(&table).set_state(TableState::Modifying);
        let err = gates.open(&table).expect_err("modifying");
        assert_eq!(
            err,
            IndexError::TableUnavailable {
                table,
                state: TableState::Modifying
            }
        );
    }

    #[tokio::test]
    async fn open_fails_while_writer_holds_gate() {
        let gates = TableGates::default();
        let table = TableName::new("t");
        let gate = gates.gate(&table);
        let _writer = gate.inflight.clone().write_owned().await;
        assert!(gates.open(&table).is_err());
    }
}
