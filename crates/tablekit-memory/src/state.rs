//! Table registry.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tablekit_model::ServiceError;

use crate::storage::{TableDefinition, TableStorage};

/// All tables of one store, keyed by name.
#[derive(Debug, Default)]
pub struct StoreState {
    tables: DashMap<String, Arc<TableStorage>>,
}

impl StoreState {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<Arc<TableStorage>> {
        self.tables.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Get a table or return `ResourceNotFoundException`.
    pub fn require_table(&self, name: &str) -> Result<Arc<TableStorage>, ServiceError> {
        self.get_table(name).ok_or_else(|| {
            ServiceError::resource_not_found(format!(
                "Requested resource not found: Table: {name} not found"
            ))
        })
    }

    /// Create a table. Fails with `ResourceInUseException` if the name is taken.
    pub fn create_table(&self, definition: TableDefinition) -> Result<Arc<TableStorage>, ServiceError> {
        match self.tables.entry(definition.name.clone()) {
            Entry::Occupied(e) => Err(ServiceError::with_message(
                tablekit_model::ServiceErrorCode::ResourceInUseException,
                format!("Table already exists: {}", e.key()),
            )),
            Entry::Vacant(e) => {
                let table = Arc::new(TableStorage::new(definition));
                e.insert(Arc::clone(&table));
                Ok(table)
            }
        }
    }

    /// Drop a table and its items.
    pub fn delete_table(&self, name: &str) -> Result<Arc<TableStorage>, ServiceError> {
        self.tables.remove(name).map(|(_, t)| t).ok_or_else(|| {
            ServiceError::resource_not_found(format!(
                "Requested resource not found: Table: {name} not found"
            ))
        })
    }

    /// Table names, sorted.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}
