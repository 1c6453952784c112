use std::sync::Arc;

use mcp_registry_core::service::ToolTestService;

use crate::store::{PgToolStore, Stores, TestRecordStore};

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub tools: PgToolStore,
    pub records: TestRecordStore,
    pub tool_tests: Arc<ToolTestService<PgToolStore>>,
}

impl AppState {
    pub fn new(stores: Stores, tool_tests: ToolTestService<PgToolStore>) -> Self {
        Self {
            tools: PgToolStore::new(stores.clone()),
            records: TestRecordStore::new(stores.clone()),
            tool_tests: Arc::new(tool_tests),
            stores,
        }
    }
}
