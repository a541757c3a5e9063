//! Core of the opdash admin dashboard: permission-aware tables over mobility data.

pub mod config;
pub mod error_display;
pub mod export;
pub mod filter;
pub mod loader;
pub mod logging;
pub mod overview;
pub mod permissions;
pub mod reconcile;
pub mod record;
pub mod retry;
pub mod session;
pub mod state;
pub mod store;
pub mod table;
pub mod tabs;
pub mod timing;

pub use config::{AppConfig, ConfigManager};
pub use opdash_cli::{Args, CompressionFormat, TabArg};
pub use permissions::{CapabilityResolver, ColumnSet, EntityType, NamedColumn, Permissions};
pub use record::Record;
pub use session::DashboardSession;
pub use store::{DateRange, RecordStore, RetryingStore, SnapshotStore, TrajectoryQuery};
pub use table::{RenderableTable, SortDirection};
pub use tabs::{Filters, Rendered, Stores, Tab, TabContent, TabContentResolver};

/// Application name used for the config directory
pub const APP_NAME: &str = "opdash";
