//! Postgres-backed stores. Queries run on the pool selected by the routing
//! context: `mcp_tool` reads go to the reader, test records to the writer.

use chrono::{DateTime, Utc};
use mcp_registry_core::routing::{
    DataStoreKey, RoutedUnit, RoutingContext, StoreRequirement, routed,
};
use mcp_registry_core::tools::{StoreError, ToolDescriptor, ToolStore, Validity};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;

const TOOL_COLUMNS: &str = "id, tool_num, tool_version, tool_name, valid";

/// Reader and writer connection pools.
#[derive(Clone, Debug)]
pub struct Stores {
    reader: PgPool,
    writer: PgPool,
}

impl Stores {
    pub fn new(reader: PgPool, writer: PgPool) -> Self {
        Self { reader, writer }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        tracing::info!("connecting reader data store");
        let reader = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.reader_url)
            .await?;

        tracing::info!("connecting writer data store");
        let writer = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.writer_url)
            .await?;

        Ok(Self::new(reader, writer))
    }

    pub fn pool(&self, key: DataStoreKey) -> &PgPool {
        match key {
            DataStoreKey::Reader => &self.reader,
            DataStoreKey::Writer => &self.writer,
        }
    }

    /// Apply the schema to both stores. The reader and the writer may be
    /// separate databases, and each needs `mcp_tool` to resolve tools.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        for key in [DataStoreKey::Reader, DataStoreKey::Writer] {
            tracing::info!(data_store = %key, "running migrations");
            sqlx::migrate!("../migrations").run(self.pool(key)).await?;
        }
        Ok(())
    }

    /// Pool of the store active for the current unit of work.
    pub fn current(&self) -> &PgPool {
        let key = RoutingContext::get();
        tracing::debug!(data_store = %key, "using data store");
        self.pool(key)
    }
}

#[derive(sqlx::FromRow)]
struct ToolRow {
    id: i64,
    tool_num: i64,
    tool_version: i64,
    tool_name: Option<String>,
    valid: String,
}

impl From<ToolRow> for ToolDescriptor {
    fn from(row: ToolRow) -> Self {
        Self {
            id: row.id,
            tool_num: row.tool_num,
            tool_version: row.tool_version,
            tool_name: row.tool_name.unwrap_or_default(),
            valid: row.valid,
        }
    }
}

/// `mcp_tool` queries.
#[derive(Clone, Debug)]
pub struct PgToolStore {
    stores: Stores,
}

impl RoutedUnit for PgToolStore {
    const STORE: Option<DataStoreKey> = Some(DataStoreKey::Reader);
}

impl PgToolStore {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    fn requirement() -> StoreRequirement {
        StoreRequirement::for_unit::<Self>()
    }
}

fn to_descriptors(rows: Vec<ToolRow>) -> Vec<ToolDescriptor> {
    rows.into_iter().map(ToolDescriptor::from).collect()
}

impl ToolStore for PgToolStore {
    async fn find_by_tool_num(
        &self,
        tool_num: i64,
        validity: Validity,
    ) -> Result<Vec<ToolDescriptor>, StoreError> {
        let query = format!(
            "SELECT {TOOL_COLUMNS} FROM mcp_tool WHERE tool_num = $1 AND valid = $2 ORDER BY id"
        );
        routed(Self::requirement(), async {
            sqlx::query_as::<_, ToolRow>(&query)
                .bind(tool_num)
                .bind(validity.as_flag())
                .fetch_all(self.stores.current())
                .await
        })
        .await
        .map(to_descriptors)
        .map_err(StoreError::new)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ToolDescriptor>, StoreError> {
        let query = format!("SELECT {TOOL_COLUMNS} FROM mcp_tool WHERE id = $1");
        routed(Self::requirement(), async {
            sqlx::query_as::<_, ToolRow>(&query)
                .bind(id)
                .fetch_optional(self.stores.current())
                .await
        })
        .await
        .map(|row| row.map(ToolDescriptor::from))
        .map_err(StoreError::new)
    }

    async fn list_all(&self) -> Result<Vec<ToolDescriptor>, StoreError> {
        let query = format!("SELECT {TOOL_COLUMNS} FROM mcp_tool ORDER BY id");
        routed(Self::requirement(), async {
            sqlx::query_as::<_, ToolRow>(&query)
                .fetch_all(self.stores.current())
                .await
        })
        .await
        .map(to_descriptors)
        .map_err(StoreError::new)
    }
}

/// A confirmed-successful tool test, ready to persist.
#[derive(Debug, Clone)]
pub struct NewTestRecord {
    pub tool: ToolDescriptor,
    pub test_parameters: serde_json::Value,
    pub test_result: serde_json::Value,
    pub summary: String,
    pub operator: String,
}

/// `mcp_test_success_records` writes.
#[derive(Clone, Debug)]
pub struct TestRecordStore {
    stores: Stores,
}

impl RoutedUnit for TestRecordStore {
    const STORE: Option<DataStoreKey> = Some(DataStoreKey::Writer);
}

impl TestRecordStore {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub async fn insert(&self, record: &NewTestRecord) -> Result<i64, sqlx::Error> {
        let now: DateTime<Utc> = Utc::now();
        let snapshot = serde_json::to_value(&record.tool).unwrap_or_default();

        routed(StoreRequirement::for_unit::<Self>(), async {
            sqlx::query_scalar::<_, i64>(
                "INSERT INTO mcp_test_success_records \
                 (tool_id, tool_num, tool_name, tool_version, tool_snapshot, test_parameters, \
                  test_result, test_result_summary, test_timestamp, operator_username, \
                  create_time, create_by) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $9, $10) \
                 RETURNING id",
            )
            .bind(record.tool.id)
            .bind(record.tool.tool_num.to_string())
            .bind(&record.tool.tool_name)
            .bind(record.tool.tool_version.to_string())
            .bind(&snapshot)
            .bind(&record.test_parameters)
            .bind(&record.test_result)
            .bind(&record.summary)
            .bind(now)
            .bind(&record.operator)
            .fetch_one(self.stores.current())
            .await
        })
        .await
    }
}
