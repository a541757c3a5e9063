//! Shared CLI definitions for opdash.
//!
//! Used by the main binary and by the build script (manpage).

use clap::{Parser, ValueEnum};
use std::path::Path;

/// Compression format for exported CSV files
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum CompressionFormat {
    /// Gzip compression (.gz) - Most common, good balance of speed and compression
    Gzip,
    /// Zstandard compression (.zst) - Modern, fast compression with good ratios
    Zstd,
    /// Bzip2 compression (.bz2) - Good compression ratio, slower than gzip
    Bzip2,
    /// XZ compression (.xz) - Excellent compression ratio, slower than bzip2
    Xz,
}

impl CompressionFormat {
    /// Detect compression format from file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str())?.to_lowercase().as_str() {
            "gz" => Some(Self::Gzip),
            "zst" | "zstd" => Some(Self::Zstd),
            "bz2" | "bz" => Some(Self::Bzip2),
            "xz" => Some(Self::Xz),
            _ => None,
        }
    }
}

/// Dashboard tab to render
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum TabArg {
    /// Per-user statistics, loaded incrementally
    #[default]
    Uuids,
    /// Confirmed trips
    Trips,
    /// Demographic survey responses
    Demographics,
    /// Raw location trajectories (requires --start-date, --end-date and --key)
    Trajectories,
}

/// Command-line arguments for opdash
#[derive(Clone, Parser, Debug)]
#[command(
    name = "opdash",
    version,
    about = "Admin analytics dashboard for mobility-tracking data",
    long_about = "Renders the admin dashboard tables (UUIDs, trips, demographics, trajectories) \
                  and overview cards from a JSON snapshot of the mobility data store, applying \
                  the configured column permissions."
)]
pub struct Args {
    /// Path to the JSON snapshot of the data store (not required with --generate-config)
    #[arg(required_unless_present = "generate_config", value_name = "SNAPSHOT")]
    pub snapshot: Option<std::path::PathBuf>,

    /// Tab to render
    #[arg(long = "tab", value_enum, default_value_t = TabArg::Uuids)]
    pub tab: TabArg,

    /// Survey to show when the demographics tab has one sub-tab per survey
    #[arg(long = "survey", value_name = "KEY")]
    pub survey: Option<String>,

    /// Zero-based page to show
    #[arg(long = "page", default_value_t = 0)]
    pub page: usize,

    /// Sort the table by this column
    #[arg(long = "sort", value_name = "COLUMN")]
    pub sort: Option<String>,

    /// Sort descending instead of ascending (requires --sort)
    #[arg(long = "descending", requires = "sort", action)]
    pub descending: bool,

    /// Filter rows, e.g. "{user_id} contains ab" or "total_trips > 3". Repeatable; all must match.
    #[arg(long = "filter", value_name = "EXPR")]
    pub filter: Vec<String>,

    /// First day of the date range (YYYY-MM-DD or RFC 3339; time of day is ignored)
    #[arg(long = "start-date", value_name = "DATE")]
    pub start_date: Option<String>,

    /// Last day of the date range, inclusive (YYYY-MM-DD or RFC 3339)
    #[arg(long = "end-date", value_name = "DATE")]
    pub end_date: Option<String>,

    /// Timezone for the date range: "UTC" or a fixed offset such as "-07:00"
    #[arg(long = "timezone", default_value = "UTC")]
    pub timezone: String,

    /// Time-series key to include in trajectories (e.g. analysis/recreated_location). Repeatable.
    #[arg(long = "key", value_name = "KEY")]
    pub keys: Vec<String>,

    /// Exclude this user from trips and trajectories. Repeatable.
    #[arg(long = "exclude-user", value_name = "UUID")]
    pub exclude_users: Vec<String>,

    /// Export the current page as CSV to this path
    #[arg(long = "export", value_name = "PATH")]
    pub export: Option<std::path::PathBuf>,

    /// Compress the exported CSV (gzip, zstd, bzip2, xz).
    /// If not specified, compression is auto-detected from the export file extension.
    #[arg(long = "compression", value_enum, requires = "export")]
    pub compression: Option<CompressionFormat>,

    /// Print the overview cards and trends before the table
    #[arg(long = "overview", action)]
    pub overview: bool,

    /// Read configuration from this file instead of ~/.config/opdash/config.toml
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<std::path::PathBuf>,

    /// Rows per page (overrides config [display] page_size)
    #[arg(long = "page-size")]
    pub page_size: Option<usize>,

    /// Enable debug logging and stage timings
    #[arg(long = "debug", action)]
    pub debug: bool,

    /// Generate default configuration file at ~/.config/opdash/config.toml
    #[arg(long = "generate-config", action)]
    pub generate_config: bool,

    /// Force overwrite existing config file when using --generate-config
    #[arg(long = "force", requires = "generate_config", action)]
    pub force: bool,
}
