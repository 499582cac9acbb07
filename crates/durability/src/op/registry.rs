//! Opcode to constructor registry
//!
//! An [`OpRegistry`] is built explicitly and passed to whatever decodes
//! records; there is no global instance. It holds a base table, fixed at
//! construction, plus any number of module tables that can be attached and
//! detached while the registry is shared (for optional feature modules such
//! as calendaring).

use super::{Opcode, RedoOp};
use crate::format::CodecError;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

/// Constructor producing a default-initialized variant
pub type OpFactory = fn() -> Box<dyn RedoOp>;

/// Registered variant
#[derive(Clone, Copy)]
pub struct OpEntry {
    /// Variant name used in diagnostics
    pub name: &'static str,
    /// Constructor
    pub factory: OpFactory,
}

impl std::fmt::Debug for OpEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpEntry").field("name", &self.name).finish()
    }
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Opcode already registered
    #[error("Opcode {opcode} already registered as {existing} (table {table})")]
    DuplicateOpcode {
        /// Conflicting opcode
        opcode: Opcode,
        /// Name of the variant already holding it
        existing: &'static str,
        /// Table that holds it
        table: String,
    },

    /// A module table with this name is already attached
    #[error("Table already attached: {0}")]
    DuplicateTable(String),

    /// No variant registered for the opcode
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(Opcode),
}

impl From<RegistryError> for CodecError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownOpcode(op) => CodecError::UnknownOpcode(op.0),
            other => CodecError::corrupt(other.to_string()),
        }
    }
}

/// Named set of opcode registrations.
#[derive(Debug, Clone)]
pub struct OpTable {
    name: String,
    entries: FxHashMap<Opcode, OpEntry>,
}

impl OpTable {
    /// Create an empty table
    pub fn new(name: impl Into<String>) -> Self {
        OpTable {
            name: name.into(),
            entries: FxHashMap::default(),
        }
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a variant constructor.
    pub fn register(
        &mut self,
        opcode: Opcode,
        name: &'static str,
        factory: OpFactory,
    ) -> Result<(), RegistryError> {
        if let Some(existing) = self.entries.get(&opcode) {
            return Err(RegistryError::DuplicateOpcode {
                opcode,
                existing: existing.name,
                table: self.name.clone(),
            });
        }
        self.entries.insert(opcode, OpEntry { name, factory });
        Ok(())
    }

    /// Look up an opcode
    pub fn get(&self, opcode: Opcode) -> Option<&OpEntry> {
        self.entries.get(&opcode)
    }

    /// Registered opcodes in ascending order
    pub fn opcodes(&self) -> Vec<Opcode> {
        let mut ops: Vec<Opcode> = self.entries.keys().copied().collect();
        ops.sort();
        ops
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Table holding the control records.
    pub fn control() -> Self {
        let mut table = OpTable::new("control");
        let entries: [(Opcode, &'static str, OpFactory); 4] = [
            (Opcode::CHECKPOINT, "Checkpoint", || -> Box<dyn RedoOp> {
                Box::new(super::Checkpoint::default())
            }),
            (Opcode::COMMIT_TXN, "CommitTxn", || -> Box<dyn RedoOp> {
                Box::new(super::CommitTxn::default())
            }),
            (Opcode::ABORT_TXN, "AbortTxn", || -> Box<dyn RedoOp> {
                Box::new(super::AbortTxn::default())
            }),
            (Opcode::ROLLOVER, "Rollover", || -> Box<dyn RedoOp> {
                Box::new(super::Rollover::default())
            }),
        ];
        for (opcode, name, factory) in entries {
            table.entries.insert(opcode, OpEntry { name, factory });
        }
        table
    }
}

/// Opcode registry with attachable module tables.
#[derive(Debug)]
pub struct OpRegistry {
    base: OpTable,
    modules: RwLock<Vec<Arc<OpTable>>>,
}

impl Default for OpRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OpRegistry {
    /// Registry holding only the control records.
    pub fn new() -> Self {
        OpRegistry {
            base: OpTable::control(),
            modules: RwLock::new(Vec::new()),
        }
    }

    /// Merge `table` into the base registrations.
    pub fn with_table(mut self, table: OpTable) -> Result<Self, RegistryError> {
        for (opcode, entry) in table.entries {
            if let Some(existing) = self.base.get(opcode) {
                return Err(RegistryError::DuplicateOpcode {
                    opcode,
                    existing: existing.name,
                    table: self.base.name.clone(),
                });
            }
            self.base.entries.insert(opcode, entry);
        }
        Ok(self)
    }

    /// Attach a module table at runtime.
    ///
    /// Fails without attaching anything if any opcode is already known.
    pub fn attach(&self, table: OpTable) -> Result<(), RegistryError> {
        let mut modules = self.modules.write();
        if modules.iter().any(|m| m.name == table.name) {
            return Err(RegistryError::DuplicateTable(table.name));
        }
        for opcode in table.entries.keys() {
            let holder = std::iter::once(&self.base)
                .chain(modules.iter().map(|m| m.as_ref()))
                .find_map(|t| t.get(*opcode).map(|e| (t, e)));
            if let Some((t, e)) = holder {
                return Err(RegistryError::DuplicateOpcode {
                    opcode: *opcode,
                    existing: e.name,
                    table: t.name.clone(),
                });
            }
        }
        tracing::debug!(table = %table.name, ops = table.len(), "Attached redo op table");
        modules.push(Arc::new(table));
        Ok(())
    }

    /// Detach a module table by name. Returns false if it was not attached.
    pub fn detach(&self, name: &str) -> bool {
        let mut modules = self.modules.write();
        let before = modules.len();
        modules.retain(|m| m.name != name);
        let removed = modules.len() != before;
        if removed {
            tracing::debug!(table = name, "Detached redo op table");
        }
        removed
    }

    /// Names of attached module tables
    pub fn attached(&self) -> Vec<String> {
        self.modules.read().iter().map(|m| m.name.clone()).collect()
    }

    /// Detach every module table.
    pub fn shutdown(&self) {
        self.modules.write().clear();
    }

    fn lookup(&self, opcode: Opcode) -> Option<OpEntry> {
        if let Some(entry) = self.base.get(opcode) {
            return Some(*entry);
        }
        self.modules
            .read()
            .iter()
            .find_map(|m| m.get(opcode).copied())
    }

    /// Produce a fresh, default-constructed variant for `opcode`.
    pub fn create(&self, opcode: Opcode) -> Result<Box<dyn RedoOp>, RegistryError> {
        self.lookup(opcode)
            .map(|entry| (entry.factory)())
            .ok_or(RegistryError::UnknownOpcode(opcode))
    }

    /// Variant name for an opcode
    pub fn name_of(&self, opcode: Opcode) -> Option<&'static str> {
        self.lookup(opcode).map(|e| e.name)
    }

    /// True if the opcode is registered
    pub fn contains(&self, opcode: Opcode) -> bool {
        self.lookup(opcode).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{CommitTxn, RedoOp};

    fn extra_table(name: &str, opcode: i32) -> OpTable {
        let mut t = OpTable::new(name);
        t.register(Opcode(opcode), "Extra", || -> Box<dyn RedoOp> { Box::new(CommitTxn::default()) })
            .unwrap();
        t
    }

    #[test]
    fn test_control_ops_registered() {
        let reg = OpRegistry::new();
        for op in [
            Opcode::CHECKPOINT,
            Opcode::COMMIT_TXN,
            Opcode::ABORT_TXN,
            Opcode::ROLLOVER,
        ] {
            let created = reg.create(op).unwrap();
            assert_eq!(created.opcode(), op);
        }
        assert_eq!(reg.name_of(Opcode::COMMIT_TXN), Some("CommitTxn"));
    }

    #[test]
    fn test_unknown_opcode() {
        let reg = OpRegistry::new();
        let err = reg.create(Opcode(999)).unwrap_err();
        assert_eq!(err, RegistryError::UnknownOpcode(Opcode(999)));
        assert_eq!(CodecError::from(err), CodecError::UnknownOpcode(999));
    }

    #[test]
    fn test_duplicate_in_table() {
        let mut t = extra_table("a", 50);
        let err = t
            .register(Opcode(50), "Again", || -> Box<dyn RedoOp> { Box::new(CommitTxn::default()) })
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateOpcode { .. }));
    }

    #[test]
    fn test_attach_detach() {
        let reg = OpRegistry::new();
        assert!(!reg.contains(Opcode(50)));
        reg.attach(extra_table("calendar", 50)).unwrap();
        assert!(reg.contains(Opcode(50)));
        assert_eq!(reg.attached(), vec!["calendar".to_string()]);

        assert!(matches!(
            reg.attach(extra_table("calendar", 51)),
            Err(RegistryError::DuplicateTable(_))
        ));
        assert!(matches!(
            reg.attach(extra_table("other", 50)),
            Err(RegistryError::DuplicateOpcode { .. })
        ));

        assert!(reg.detach("calendar"));
        assert!(!reg.detach("calendar"));
        assert!(!reg.contains(Opcode(50)));
    }

    #[test]
    fn test_attach_cannot_shadow_base() {
        let reg = OpRegistry::new();
        let err = reg.attach(extra_table("bad", 2)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateOpcode { .. }));
    }

    #[test]
    fn test_isolated_registries() {
        let a = OpRegistry::new().with_table(extra_table("a", 60)).unwrap();
        let b = OpRegistry::new();
        assert!(a.contains(Opcode(60)));
        assert!(!b.contains(Opcode(60)));
    }

    #[test]
    fn test_shutdown_detaches_modules() {
        let reg = OpRegistry::new();
        reg.attach(extra_table("x", 70)).unwrap();
        reg.shutdown();
        assert!(reg.attached().is_empty());
        assert!(reg.contains(Opcode::COMMIT_TXN));
    }
}
