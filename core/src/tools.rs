use std::future::Future;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ToolTestError;
use crate::routing::{DataStoreKey, RoutedUnit, StoreRequirement, routed};

/// Externally supplied tool identifier.
///
/// Callers send a single number that may be either the business tool number
/// or the storage primary key; [`ToolResolver`] decides which.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ToolReference(i64);

impl ToolReference {
    pub fn new(value: i64) -> Result<Self, ToolTestError> {
        if value <= 0 {
            return Err(ToolTestError::validation(format!(
                "工具编号必须为正整数: {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn parse(raw: &str) -> Result<Self, ToolTestError> {
        let trimmed = raw.trim();
        let value = trimmed.parse::<i64>().map_err(|_| {
            ToolTestError::validation(format!("无效的工具编号: '{trimmed}'"))
        })?;
        Self::new(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ToolReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validity flag as stored in `mcp_tool.valid` ("1" valid, "0" invalid).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid,
}

impl Validity {
    pub fn from_required(require_valid: bool) -> Self {
        if require_valid { Self::Valid } else { Self::Invalid }
    }

    pub fn as_flag(self) -> &'static str {
        match self {
            Self::Valid => "1",
            Self::Invalid => "0",
        }
    }

    pub fn matches(self, flag: &str) -> bool {
        flag.trim() == self.as_flag()
    }
}

/// Snapshot of a registered tool, immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub id: i64,
    pub tool_num: i64,
    pub tool_version: i64,
    pub tool_name: String,
    pub valid: String,
}

impl ToolDescriptor {
    pub fn summary(&self) -> String {
        format!(
            "ID:{}, ToolNum:{}, Name:{}",
            self.id, self.tool_num, self.tool_name
        )
    }
}

/// Opaque storage failure. The resolver treats it as "this stage failed".
#[derive(Debug, thiserror::Error)]
#[error("tool store query failed: {source}")]
pub struct StoreError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl StoreError {
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// The storage queries the tool test pipeline relies on.
pub trait ToolStore: Send + Sync {
    /// Tools with the given business number and validity flag.
    fn find_by_tool_num(
        &self,
        tool_num: i64,
        validity: Validity,
    ) -> impl Future<Output = Result<Vec<ToolDescriptor>, StoreError>> + Send;

    /// Tool by storage primary key.
    fn find_by_id(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<ToolDescriptor>, StoreError>> + Send;

    /// Every registered tool, regardless of validity.
    fn list_all(&self) -> impl Future<Output = Result<Vec<ToolDescriptor>, StoreError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    ToolNum,
    PrimaryId,
    FullScan,
}

impl Strategy {
    const ORDER: [Strategy; 3] = [Strategy::ToolNum, Strategy::PrimaryId, Strategy::FullScan];

    fn name(self) -> &'static str {
        match self {
            Self::ToolNum => "tool_num",
            Self::PrimaryId => "primary_id",
            Self::FullScan => "full_scan",
        }
    }
}

/// Resolves an ambiguous [`ToolReference`] against a [`ToolStore`].
///
/// Strategies, first hit wins:
/// 1. reference as tool number (validity must match)
/// 2. reference as primary id (validity must match)
/// 3. scan of all tools matching either id or tool number (validity must match)
///
/// Every lookup is a read and runs against the reader store.
#[derive(Debug, Clone)]
pub struct ToolResolver<S> {
    store: S,
}

impl<S> RoutedUnit for ToolResolver<S> {
    const STORE: Option<DataStoreKey> = Some(DataStoreKey::Reader);
}

impl<S: ToolStore> ToolResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn resolve(
        &self,
        reference: ToolReference,
        require_valid: bool,
    ) -> Result<ToolDescriptor, ToolTestError> {
        let validity = Validity::from_required(require_valid);
        routed(StoreRequirement::for_unit::<Self>(), async {
            for strategy in Strategy::ORDER {
                match self.attempt(strategy, reference.value(), validity).await {
                    Ok(Some(tool)) => {
                        tracing::info!(
                            strategy = strategy.name(),
                            reference = reference.value(),
                            tool_id = tool.id,
                            tool_num = tool.tool_num,
                            tool_name = %tool.tool_name,
                            "resolved tool"
                        );
                        return Ok(tool);
                    }
                    Ok(None) => {
                        tracing::debug!(
                            strategy = strategy.name(),
                            reference = reference.value(),
                            "no tool matched"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            strategy = strategy.name(),
                            reference = reference.value(),
                            error = %e,
                            "tool lookup failed"
                        );
                    }
                }
            }

            tracing::warn!(reference = reference.value(), "tool not found by any strategy");
            Err(ToolTestError::NotFound {
                reference: reference.value(),
            })
        })
        .await
    }

    async fn attempt(
        &self,
        strategy: Strategy,
        reference: i64,
        validity: Validity,
    ) -> Result<Option<ToolDescriptor>, StoreError> {
        let found = match strategy {
            Strategy::ToolNum => self
                .store
                .find_by_tool_num(reference, validity)
                .await?
                .into_iter()
                .next(),
            Strategy::PrimaryId => self.store.find_by_id(reference).await?,
            Strategy::FullScan => {
                let all = self.store.list_all().await?;
                tracing::debug!(
                    tools = ?all.iter().map(ToolDescriptor::summary).collect::<Vec<_>>(),
                    "scanning registered tools"
                );
                all.into_iter().find(|tool| {
                    validity.matches(&tool.valid)
                        && (tool.id == reference || tool.tool_num == reference)
                })
            }
        };

        Ok(found.filter(|tool| validity.matches(&tool.valid)))
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::{MemoryToolStore, tool};
    use super::*;
    use crate::routing::RoutingContext;

    fn reference(value: i64) -> ToolReference {
        ToolReference::new(value).unwrap()
    }

    #[test]
    fn parses_references() {
        assert_eq!(ToolReference::parse(" 100 ").unwrap().value(), 100);
        assert!(matches!(
            ToolReference::parse("abc"),
            Err(ToolTestError::Validation { .. })
        ));
        assert!(matches!(
            ToolReference::parse("0"),
            Err(ToolTestError::Validation { .. })
        ));
        assert!(matches!(
            ToolReference::new(-5),
            Err(ToolTestError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn resolves_by_tool_number_first() {
        let store = MemoryToolStore::with_tools(vec![
            tool(100, 7, "by_id", "1"),
            tool(1, 100, "by_num", "1"),
        ]);
        let resolver = ToolResolver::new(store);

        let found = resolver.resolve(reference(100), true).await.unwrap();
        assert_eq!(found.tool_name, "by_num");
        assert_eq!(resolver.store().seen_keys.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_primary_id() {
        let resolver = ToolResolver::new(MemoryToolStore::with_tools(vec![tool(
            42, 9001, "weather", "1",
        )]));

        let found = resolver.resolve(reference(42), true).await.unwrap();
        assert_eq!(found.id, 42);
    }

    #[tokio::test]
    async fn failing_stages_fall_through_to_scan() {
        let store = MemoryToolStore::with_tools(vec![tool(5, 100, "clock", "1")]);
        store.fail_tool_num.store(true, Ordering::SeqCst);
        store.fail_id.store(true, Ordering::SeqCst);
        let resolver = ToolResolver::new(store);

        let found = resolver.resolve(reference(100), true).await.unwrap();
        assert_eq!(found.tool_name, "clock");
        assert_eq!(resolver.store().seen_keys.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn id_match_with_wrong_validity_is_skipped() {
        let resolver = ToolResolver::new(MemoryToolStore::with_tools(vec![
            tool(100, 3, "retired", "0"),
        ]));

        let err = resolver.resolve(reference(100), true).await.unwrap_err();
        assert_eq!(err, ToolTestError::NotFound { reference: 100 });

        let found = resolver.resolve(reference(100), false).await.unwrap();
        assert_eq!(found.valid, "0");
    }

    #[tokio::test]
    async fn not_found_when_every_strategy_misses() {
        let resolver = ToolResolver::new(MemoryToolStore::with_tools(vec![tool(
            1, 2, "other", "1",
        )]));

        let err = resolver.resolve(reference(100), true).await.unwrap_err();
        assert!(matches!(err, ToolTestError::NotFound { reference: 100 }));
    }

    #[tokio::test]
    async fn lookups_run_against_reader_and_restore_selection() {
        RoutingContext::scope(async {
            RoutingContext::set(DataStoreKey::Writer);
            let resolver = ToolResolver::new(MemoryToolStore::with_tools(vec![]));

            let _ = resolver.resolve(reference(3), true).await;

            let seen = resolver.store().seen_keys.lock().unwrap().clone();
            assert_eq!(seen, vec![DataStoreKey::Reader; 3]);
            assert_eq!(RoutingContext::get(), DataStoreKey::Writer);
        })
        .await;
    }
}
