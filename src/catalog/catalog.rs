use crate::catalog::TupleDescRef;
use crate::error::{VellumError, VellumResult};
use crate::storage::page::TableId;
use crate::storage::DbFile;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory registry mapping table ids to their backing files. Nothing is
/// persisted beyond the files themselves; the catalog is rebuilt on startup by
/// whoever opens the tables.
pub struct Catalog {
    tables: RwLock<HashMap<TableId, TableInfo>>,
    names: RwLock<HashMap<String, TableId>>,
}

#[derive(Clone)]
struct TableInfo {
    name: String,
    file: Arc<dyn DbFile>,
}

impl Catalog {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
        }
    }

    /// Register a file under `name`. Re-registering a name replaces the old
    /// table.
    pub fn add_table(&self, name: &str, file: Arc<dyn DbFile>) -> TableId {
        let table_id = file.table_id();
        debug!("register table \"{}\" as {}", name, table_id);
        let mut tables = self.tables.write();
        let mut names = self.names.write();
        if let Some(old_id) = names.insert(name.to_string(), table_id) {
            if old_id != table_id {
                tables.remove(&old_id);
            }
        }
        tables.insert(
            table_id,
            TableInfo {
                name: name.to_string(),
                file,
            },
        );
        table_id
    }

    pub fn get_file(&self, table_id: TableId) -> VellumResult<Arc<dyn DbFile>> {
        self.tables
            .read()
            .get(&table_id)
            .map(|info| info.file.clone())
            .ok_or_else(|| VellumError::NotFound(format!("no table with id {}", table_id)))
    }

    pub fn get_tuple_desc(&self, table_id: TableId) -> VellumResult<TupleDescRef> {
        Ok(self.get_file(table_id)?.tuple_desc())
    }

    pub fn table_id(&self, name: &str) -> VellumResult<TableId> {
        self.names
            .read()
            .get(name)
            .copied()
            .ok_or_else(|| VellumError::NotFound(format!("no table named \"{}\"", name)))
    }

    pub fn table_name(&self, table_id: TableId) -> VellumResult<String> {
        self.tables
            .read()
            .get(&table_id)
            .map(|info| info.name.clone())
            .ok_or_else(|| VellumError::NotFound(format!("no table with id {}", table_id)))
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.read().keys().copied().collect()
    }
}
