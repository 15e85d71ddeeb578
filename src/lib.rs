//! # CRUD Context Library
//!
//! Generic list/CRUD context managers: a paginated list, an optional detail
//! item and create/update/delete operations over a pluggable data source,
//! kept in sync with a navigable key/value store (typically a query string).
//! Every operation runs through an executor that tracks loading state and
//! emits user notifications.

pub mod config;
pub mod context;
pub mod data_source;
pub mod error;
pub mod executor;
pub mod memory_source;
pub mod notify;
pub mod pagination;
pub mod params;
pub mod query_state;
pub mod registry;
pub mod telemetry;

pub use config::{AppConfig, ConfigLoader, ContextConfig};
pub use context::{ContextState, CrudContext, ListContext, Phase};
pub use data_source::{DataSource, ItemKey};
pub use error::{CrudError, OperationKind};
pub use executor::{AsyncOperation, OperationMessages};
pub use notify::{Notifier, Severity};
pub use pagination::{ListResponse, Page, PaginatedEnvelope, PaginationView};
pub use params::{ParamValue, ParamsBag};
pub use query_state::{MemoryStore, NavigableStore, QuerySync, WriteMode};
pub use registry::{InvalidationRegistry, Refetch};
