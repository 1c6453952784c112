//! Per-unit-of-work selection of the backing store (reader vs. writer).
//!
//! Inside a tokio task the selection lives in a task-local slot opened by
//! [`RoutingContext::scope`]; outside of one (plain threads, blocking code) it
//! lives in a thread-local slot. Nothing is process-wide, so two requests never
//! observe each other's selection.
//!
//! Operations declare the store they need with a [`StoreRequirement`] and are
//! wrapped with [`routed`] / [`routed_blocking`], which switch the key for the
//! duration of the operation and restore whatever was active before on every
//! exit path.

use std::cell::Cell;
use std::future::Future;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

tokio::task_local! {
    static TASK_ROUTE: Cell<Option<DataStoreKey>>;
}

thread_local! {
    static THREAD_ROUTE: Cell<Option<DataStoreKey>> = const { Cell::new(None) };
}

/// Backing store selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DataStoreKey {
    #[default]
    Reader,
    Writer,
}

impl DataStoreKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reader => "ds_reader",
            Self::Writer => "ds_writer",
        }
    }
}

impl std::fmt::Display for DataStoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Task,
    Thread,
}

impl Slot {
    fn current() -> Self {
        if TASK_ROUTE.try_with(|_| ()).is_ok() {
            Self::Task
        } else {
            Self::Thread
        }
    }

    fn load(self) -> Option<DataStoreKey> {
        match self {
            Self::Task => TASK_ROUTE.try_with(Cell::get).ok().flatten(),
            Self::Thread => THREAD_ROUTE.with(Cell::get),
        }
    }

    fn store(self, key: Option<DataStoreKey>) {
        match self {
            // Outside the scope (e.g. dropped after the task finished) there is
            // nothing left to restore.
            Self::Task => {
                let _ = TASK_ROUTE.try_with(|cell| cell.set(key));
            }
            Self::Thread => THREAD_ROUTE.with(|cell| cell.set(key)),
        }
    }
}

/// Accessors for the active store of the current unit of work.
pub struct RoutingContext;

impl RoutingContext {
    /// Active key; `Reader` when nothing was selected.
    pub fn get() -> DataStoreKey {
        Self::selected().unwrap_or_default()
    }

    /// Explicitly selected key, if any.
    pub fn selected() -> Option<DataStoreKey> {
        Slot::current().load()
    }

    pub fn set(key: DataStoreKey) {
        tracing::debug!(data_store = %key, "switching data store");
        Slot::current().store(Some(key));
    }

    pub fn clear() {
        tracing::debug!(data_store = ?Self::selected(), "clearing data store");
        Slot::current().store(None);
    }

    /// True when running inside a task-scoped unit of work.
    pub fn in_task_scope() -> bool {
        Slot::current() == Slot::Task
    }

    /// Run `fut` as a fresh unit of work with no store selected.
    pub async fn scope<F: Future>(fut: F) -> F::Output {
        TASK_ROUTE.scope(Cell::new(None), fut).await
    }
}

/// Restores the previously active key when dropped.
///
/// Restoration targets what was active when the guard was created, so nested
/// guards unwind correctly at any depth.
#[must_use = "the previous store is restored as soon as the guard is dropped"]
pub struct RouteGuard {
    slot: Slot,
    previous: Option<DataStoreKey>,
}

impl RouteGuard {
    pub fn enter(key: DataStoreKey) -> Self {
        let slot = Slot::current();
        let previous = slot.load();
        tracing::debug!(
            from = %previous.unwrap_or_default(),
            to = %key,
            "entering routed operation"
        );
        slot.store(Some(key));
        Self { slot, previous }
    }
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        tracing::debug!(restored = ?self.previous, "restoring data store");
        self.slot.store(self.previous);
    }
}

/// Store declared for a unit (a store type, a service) as a whole.
pub trait RoutedUnit {
    const STORE: Option<DataStoreKey> = None;
}

/// Store declaration of an operation, with fallback to its enclosing unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreRequirement {
    operation: Option<DataStoreKey>,
    unit: Option<DataStoreKey>,
}

impl StoreRequirement {
    /// No declaration at all: routing does not intervene.
    pub const NONE: Self = Self {
        operation: None,
        unit: None,
    };

    /// Start from the declaration on `U`.
    pub fn for_unit<U: RoutedUnit + ?Sized>() -> Self {
        Self {
            operation: None,
            unit: U::STORE,
        }
    }

    /// Operation-level declaration; wins over the unit declaration.
    pub fn operation(self, key: DataStoreKey) -> Self {
        Self {
            operation: Some(key),
            ..self
        }
    }

    pub fn resolve(&self) -> Option<DataStoreKey> {
        self.operation.or(self.unit)
    }
}

impl From<DataStoreKey> for StoreRequirement {
    fn from(key: DataStoreKey) -> Self {
        Self::NONE.operation(key)
    }
}

/// Run `fut` with the declared store active, restoring the previous selection
/// afterwards (also when `fut` errors, panics or is cancelled).
///
/// Outside a task-scoped unit of work a new scope is opened, seeded with the
/// current thread's selection, so the switch never leaks into other tasks
/// sharing the worker thread.
pub async fn routed<F>(requirement: impl Into<StoreRequirement>, fut: F) -> F::Output
where
    F: Future,
{
    let Some(key) = requirement.into().resolve() else {
        return fut.await;
    };

    if RoutingContext::in_task_scope() {
        let _guard = RouteGuard::enter(key);
        fut.await
    } else {
        let seed = Slot::Thread.load();
        TASK_ROUTE
            .scope(Cell::new(seed), async move {
                let _guard = RouteGuard::enter(key);
                fut.await
            })
            .await
    }
}

/// Synchronous counterpart of [`routed`].
pub fn routed_blocking<R>(requirement: impl Into<StoreRequirement>, f: impl FnOnce() -> R) -> R {
    match requirement.into().resolve() {
        Some(key) => {
            let _guard = RouteGuard::enter(key);
            f()
        }
        None => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WriterUnit;

    impl RoutedUnit for WriterUnit {
        const STORE: Option<DataStoreKey> = Some(DataStoreKey::Writer);
    }

    struct UndeclaredUnit;

    impl RoutedUnit for UndeclaredUnit {}

    #[test]
    fn defaults_to_reader() {
        std::thread::spawn(|| {
            assert_eq!(RoutingContext::get(), DataStoreKey::Reader);
            assert_eq!(RoutingContext::selected(), None);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn set_and_clear_round_trip() {
        std::thread::spawn(|| {
            RoutingContext::set(DataStoreKey::Writer);
            assert_eq!(RoutingContext::get(), DataStoreKey::Writer);
            RoutingContext::clear();
            assert_eq!(RoutingContext::selected(), None);
            assert_eq!(RoutingContext::get(), DataStoreKey::Reader);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn threads_do_not_observe_each_other() {
        let (set_tx, set_rx) = std::sync::mpsc::channel();
        let (read_tx, read_rx) = std::sync::mpsc::channel();

        let writer = std::thread::spawn(move || {
            RoutingContext::set(DataStoreKey::Writer);
            set_tx.send(()).unwrap();
            read_rx.recv().unwrap();
            RoutingContext::get()
        });

        let reader = std::thread::spawn(move || {
            set_rx.recv().unwrap();
            let observed = RoutingContext::get();
            read_tx.send(()).unwrap();
            observed
        });

        assert_eq!(reader.join().unwrap(), DataStoreKey::Reader);
        assert_eq!(writer.join().unwrap(), DataStoreKey::Writer);
    }

    #[test]
    fn operation_declaration_wins_over_unit() {
        let requirement = StoreRequirement::for_unit::<WriterUnit>().operation(DataStoreKey::Reader);
        assert_eq!(requirement.resolve(), Some(DataStoreKey::Reader));
        assert_eq!(
            StoreRequirement::for_unit::<WriterUnit>().resolve(),
            Some(DataStoreKey::Writer)
        );
        assert_eq!(StoreRequirement::for_unit::<UndeclaredUnit>().resolve(), None);
    }

    #[test]
    fn undeclared_operation_is_left_alone() {
        std::thread::spawn(|| {
            RoutingContext::set(DataStoreKey::Writer);
            let inside = routed_blocking(StoreRequirement::NONE, RoutingContext::get);
            assert_eq!(inside, DataStoreKey::Writer);
            assert_eq!(RoutingContext::selected(), Some(DataStoreKey::Writer));
        })
        .join()
        .unwrap();
    }

    fn nest(depth: usize, keys: &[DataStoreKey], trail: &mut Vec<Option<DataStoreKey>>) {
        if depth == keys.len() {
            return;
        }
        let before = RoutingContext::selected();
        routed_blocking(keys[depth], || {
            assert_eq!(RoutingContext::get(), keys[depth]);
            nest(depth + 1, keys, trail);
            assert_eq!(RoutingContext::get(), keys[depth]);
        });
        assert_eq!(RoutingContext::selected(), before);
        trail.push(before);
    }

    #[test]
    fn nested_blocking_operations_restore_exact_previous_value() {
        std::thread::spawn(|| {
            let keys = [
                DataStoreKey::Writer,
                DataStoreKey::Reader,
                DataStoreKey::Writer,
                DataStoreKey::Writer,
                DataStoreKey::Reader,
            ];
            let mut trail = Vec::new();
            nest(0, &keys, &mut trail);
            assert_eq!(trail.len(), keys.len());
            assert_eq!(RoutingContext::selected(), None);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn panicking_operation_still_restores() {
        std::thread::spawn(|| {
            RoutingContext::set(DataStoreKey::Reader);
            let result = std::panic::catch_unwind(|| {
                routed_blocking(DataStoreKey::Writer, || -> () {
                    panic!("operation failed");
                })
            });
            assert!(result.is_err());
            assert_eq!(RoutingContext::selected(), Some(DataStoreKey::Reader));
        })
        .join()
        .unwrap();
    }

    #[tokio::test]
    async fn nested_async_operations_restore_on_error() {
        RoutingContext::scope(async {
            assert_eq!(RoutingContext::selected(), None);

            let outer: Result<(), &str> = routed(DataStoreKey::Writer, async {
                assert_eq!(RoutingContext::get(), DataStoreKey::Writer);

                let inner: Result<(), &str> = routed(DataStoreKey::Reader, async {
                    assert_eq!(RoutingContext::get(), DataStoreKey::Reader);
                    tokio::task::yield_now().await;
                    Err("inner failed")
                })
                .await;
                assert!(inner.is_err());
                assert_eq!(RoutingContext::get(), DataStoreKey::Writer);
                Ok(())
            })
            .await;

            assert!(outer.is_ok());
            assert_eq!(RoutingContext::selected(), None);
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_tasks_keep_separate_selections() {
        let writer = tokio::spawn(RoutingContext::scope(async {
            routed(DataStoreKey::Writer, async {
                for _ in 0..20 {
                    tokio::task::yield_now().await;
                    assert_eq!(RoutingContext::get(), DataStoreKey::Writer);
                }
            })
            .await;
        }));
        let reader = tokio::spawn(RoutingContext::scope(async {
            for _ in 0..20 {
                tokio::task::yield_now().await;
                assert_eq!(RoutingContext::get(), DataStoreKey::Reader);
            }
        }));

        writer.await.unwrap();
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn routed_outside_scope_does_not_leak_into_thread_slot() {
        let inside = routed(DataStoreKey::Writer, async { RoutingContext::get() }).await;
        assert_eq!(inside, DataStoreKey::Writer);
        assert!(!RoutingContext::in_task_scope());
        assert_eq!(RoutingContext::selected(), None);
    }

    #[tokio::test]
    async fn cancelled_operation_restores_previous_value() {
        RoutingContext::scope(async {
            let pending = routed(DataStoreKey::Writer, std::future::pending::<()>());
            let timed_out = tokio::time::timeout(std::time::Duration::from_millis(10), pending).await;
            assert!(timed_out.is_err());
            assert_eq!(RoutingContext::selected(), None);
        })
        .await;
    }
}
