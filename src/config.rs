use crate::loader::DEFAULT_CHUNK_SIZE;
use crate::permissions::{ColumnPolicy, PermissionConfig};
use crate::retry::RetryConfig;
use crate::table::DEFAULT_PAGE_SIZE;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Manages config directory and config file operations
#[derive(Clone)]
pub struct ConfigManager {
    pub(crate) config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a ConfigManager with a custom config directory (primarily for testing)
    pub fn with_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// Create a new ConfigManager for the given app name
    pub fn new(app_name: &str) -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| eyre!("Could not determine config directory"))?
            .join(app_name);

        Ok(Self { config_dir })
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get path to a specific config file
    pub fn config_path(&self, path: &str) -> PathBuf {
        self.config_dir.join(path)
    }

    /// Ensure the config directory exists
    pub fn ensure_config_dir(&self) -> Result<()> {
        if !self.config_dir.exists() {
            std::fs::create_dir_all(&self.config_dir)?;
        }
        Ok(())
    }

    /// Generate default configuration template as a string with comments.
    /// Every line is commented out so defaults apply until the user uncomments it.
    pub fn generate_default_config(&self) -> String {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config)
            .unwrap_or_else(|e| panic!("Failed to serialize default config: {}", e));

        Self::comment_all_fields(toml_str, Self::collect_all_comments())
    }

    /// Collect all field comments from the per-section constants, keyed by dotted path
    fn collect_all_comments() -> HashMap<String, String> {
        let sections: &[(&str, &[(&str, &str)])] = &[
            ("", APP_COMMENTS),
            ("display", DISPLAY_COMMENTS),
            ("loader", LOADER_COMMENTS),
            ("retry", RETRY_COMMENTS),
            ("overview", OVERVIEW_COMMENTS),
            ("debug", DEBUG_COMMENTS),
        ];
        let mut comments = HashMap::new();
        for (section, fields) in sections {
            for (field, comment) in fields.iter() {
                let path = if section.is_empty() {
                    field.to_string()
                } else {
                    format!("{}.{}", section, field)
                };
                comments.insert(path, comment.to_string());
            }
        }
        for entity in ["uuids", "trips", "demographics", "trajectories"] {
            for (field, comment) in COLUMN_POLICY_COMMENTS {
                comments.insert(
                    format!("permissions.{}.{}", entity, field),
                    comment.to_string(),
                );
            }
        }
        comments
    }

    /// Comment out every non-empty line and add field and section comments
    fn comment_all_fields(toml: String, comments: HashMap<String, String>) -> String {
        let mut result = String::new();
        result.push_str("# opdash configuration file\n");
        result
            .push_str("# This file uses TOML format. See https://toml.io/ for syntax reference.\n");
        result.push('\n');

        let mut current_section = String::new();
        for line in toml.lines() {
            if let Some(section) = Self::extract_section_name(line) {
                if let Some((_, header)) = SECTION_HEADERS.iter().find(|(s, _)| *s == section) {
                    result.push_str(header);
                    result.push('\n');
                }
                current_section = section;
            } else if let Some(field_path) = Self::extract_field_path(line, &current_section) {
                if let Some(comment) = comments.get(&field_path) {
                    for comment_line in comment.lines() {
                        result.push_str("# ");
                        result.push_str(comment_line);
                        result.push('\n');
                    }
                }
            }

            // Multi-line array continuations are commented along with their field.
            if !line.trim().is_empty() {
                result.push_str("# ");
            }
            result.push_str(line);
            result.push('\n');
        }

        result
    }

    /// Extract section name from a TOML header like "[display]" or "[[permissions.trips.named]]"
    fn extract_section_name(line: &str) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            Some(trimmed.trim_matches(|c| c == '[' || c == ']').to_string())
        } else {
            None
        }
    }

    fn extract_field_path(line: &str, current_section: &str) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('"') {
            return None;
        }
        let eq_pos = trimmed.find('=')?;
        let field_name = trimmed[..eq_pos].trim();
        if current_section.is_empty() {
            Some(field_name.to_string())
        } else {
            Some(format!("{}.{}", current_section, field_name))
        }
    }

    /// Write default configuration to config file
    pub fn write_default_config(&self, force: bool) -> Result<PathBuf> {
        let config_path = self.config_path("config.toml");

        if config_path.exists() && !force {
            return Err(eyre!(
                "Config file already exists at {}. Use --force to overwrite.",
                config_path.display()
            ));
        }

        self.ensure_config_dir()?;
        std::fs::write(&config_path, self.generate_default_config())?;

        Ok(config_path)
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration format version (for future compatibility)
    pub version: String,
    pub display: DisplayConfig,
    pub loader: LoaderConfig,
    pub retry: RetryConfig,
    pub overview: OverviewConfig,
    pub debug: DebugConfig,
    pub permissions: PermissionConfig,
}

const APP_COMMENTS: &[(&str, &str)] = &[(
    "version",
    "Configuration format version (for future compatibility)",
)];

const SECTION_HEADERS: &[(&str, &str)] = &[
    (
        "display",
        "# ============================================================================\n# Display Settings\n# ============================================================================",
    ),
    (
        "loader",
        "# ============================================================================\n# Incremental UUID Statistics Loading\n# ============================================================================",
    ),
    (
        "retry",
        "# ============================================================================\n# Data Store Retries\n# ============================================================================\n# Failed store queries are retried with exponential backoff.",
    ),
    (
        "overview",
        "# ============================================================================\n# Overview Cards and Trends\n# ============================================================================",
    ),
    (
        "debug",
        "# ============================================================================\n# Debug Settings\n# ============================================================================",
    ),
    (
        "permissions",
        "# ============================================================================\n# Permissions\n# ============================================================================",
    ),
    (
        "permissions.capabilities",
        "# Capabilities granted to the viewer. Names not listed here are denied.\n# Known: data_uuids, data_trips, data_demographics, data_trajectories,\n#        overview_users, overview_active_users, overview_trips,\n#        overview_signup_trends, overview_trips_trend",
    ),
    (
        "permissions.demographics",
        "# Demographic survey columns are discovered from the responses when `valid` is empty.",
    ),
    (
        "permissions.trips.named",
        "# Computed trip columns: rows carry them under `label`",
    ),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub page_size: usize,
}

const DISPLAY_COMMENTS: &[(&str, &str)] = &[(
    "page_size",
    "Rows per table page (UUIDs, trips, demographics, trajectories)",
)];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub chunk_size: usize,
}

const LOADER_COMMENTS: &[(&str, &str)] = &[(
    "chunk_size",
    "Number of users whose statistics are fetched per round trip\nThe UUIDs table updates after every chunk",
)];

const RETRY_COMMENTS: &[(&str, &str)] = &[
    ("max_retries", "Retries after the first failed attempt (0 = fail immediately)"),
    ("base_delay_ms", "Delay before the first retry; doubles on every further retry"),
    ("max_delay_ms", "Upper bound for the delay between retries"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverviewConfig {
    /// Users whose last usercache pull is at most this old count as active.
    pub active_user_threshold_secs: u64,
    /// Trip field holding the start time used for the trips trend.
    pub trips_date_column: String,
    /// User field holding the sign-up time used for the sign-up trend.
    pub signup_date_column: String,
}

const OVERVIEW_COMMENTS: &[(&str, &str)] = &[
    (
        "active_user_threshold_secs",
        "A user is active when their phone pulled from the server within this many seconds",
    ),
    ("trips_date_column", "Trip field used to bucket trips per day"),
    ("signup_date_column", "User field used to bucket sign-ups per day"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    pub show_performance: bool,
}

const DEBUG_COMMENTS: &[(&str, &str)] = &[
    ("enabled", "Enable debug logging by default"),
    (
        "show_performance",
        "Record and print stage timings when debug is enabled",
    ),
];

const COLUMN_POLICY_COMMENTS: &[(&str, &str)] = &[
    ("valid", "Stored fields that may be shown"),
    ("exclude", "Fields that are never shown"),
];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "0.1".to_string(),
            display: DisplayConfig::default(),
            loader: LoaderConfig::default(),
            retry: RetryConfig::default(),
            overview: OverviewConfig::default(),
            debug: DebugConfig::default(),
            permissions: PermissionConfig::default(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for OverviewConfig {
    fn default() -> Self {
        Self {
            active_user_threshold_secs: 100 * 24 * 60 * 60,
            trips_date_column: "trip_start_time_str".to_string(),
            signup_date_column: "update_ts".to_string(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            show_performance: true,
        }
    }
}

// Configuration loading and merging
impl AppConfig {
    /// Load configuration from all layers (default → user)
    pub fn load(app_name: &str) -> Result<Self> {
        let config_path = ConfigManager::new(app_name)?.config_path("config.toml");
        if !config_path.exists() {
            return Ok(AppConfig::default());
        }
        Self::load_from_path(&config_path)
    }

    /// Load defaults overlaid with the file at `path`, then validate.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre!("Failed to read config file at {}: {}", path.display(), e))?;
        let user_config: AppConfig = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file at {}: {}", path.display(), e))?;

        let mut config = AppConfig::default();
        config.merge(user_config);
        config
            .validate()
            .map_err(|e| eyre!("Invalid configuration in {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: AppConfig) {
        if other.version != AppConfig::default().version {
            self.version = other.version;
        }

        self.display.merge(other.display);
        self.loader.merge(other.loader);
        self.retry.merge(other.retry);
        self.overview.merge(other.overview);
        self.debug.merge(other.debug);
        merge_permissions(&mut self.permissions, other.permissions);
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.version.starts_with("0.1") {
            return Err(eyre!(
                "Unsupported config version: {}. Expected 0.1.x",
                self.version
            ));
        }

        if self.display.page_size == 0 {
            return Err(eyre!("display.page_size must be greater than 0"));
        }

        if self.loader.chunk_size == 0 {
            return Err(eyre!("loader.chunk_size must be greater than 0"));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(eyre!(
                "retry.max_delay_ms ({}) must not be smaller than retry.base_delay_ms ({})",
                self.retry.max_delay_ms,
                self.retry.base_delay_ms
            ));
        }

        for named in &self.permissions.trips.named {
            if named.key.trim().is_empty() || named.label.trim().is_empty() {
                return Err(eyre!(
                    "permissions.trips.named entries need a non-empty key and label"
                ));
            }
        }

        for unknown in self.permissions.unknown_capabilities() {
            tracing::warn!(capability = unknown, "unknown capability in configuration");
        }

        Ok(())
    }
}

fn merge_permissions(base: &mut PermissionConfig, other: PermissionConfig) {
    if other.capabilities != PermissionConfig::default().capabilities {
        base.capabilities.extend(other.capabilities);
    }
    // A policy section given in the file only carries the fields it names; the rest
    // deserialize empty and keep the base values.
    let merge_policy = |base: &mut ColumnPolicy, other: ColumnPolicy| {
        if !other.valid.is_empty() {
            base.valid = other.valid;
        }
        if !other.exclude.is_empty() {
            base.exclude = other.exclude;
        }
        if !other.named.is_empty() {
            base.named = other.named;
        }
    };
    merge_policy(&mut base.uuids, other.uuids);
    merge_policy(&mut base.trips, other.trips);
    merge_policy(&mut base.demographics, other.demographics);
    merge_policy(&mut base.trajectories, other.trajectories);
}

impl DisplayConfig {
    pub fn merge(&mut self, other: Self) {
        if other.page_size != DisplayConfig::default().page_size {
            self.page_size = other.page_size;
        }
    }
}

impl LoaderConfig {
    pub fn merge(&mut self, other: Self) {
        if other.chunk_size != LoaderConfig::default().chunk_size {
            self.chunk_size = other.chunk_size;
        }
    }
}

impl OverviewConfig {
    pub fn merge(&mut self, other: Self) {
        let default = OverviewConfig::default();
        if other.active_user_threshold_secs != default.active_user_threshold_secs {
            self.active_user_threshold_secs = other.active_user_threshold_secs;
        }
        if other.trips_date_column != default.trips_date_column {
            self.trips_date_column = other.trips_date_column;
        }
        if other.signup_date_column != default.signup_date_column {
            self.signup_date_column = other.signup_date_column;
        }
    }
}

impl DebugConfig {
    pub fn merge(&mut self, other: Self) {
        let default = DebugConfig::default();
        if other.enabled != default.enabled {
            self.enabled = other.enabled;
        }
        if other.show_performance != default.show_performance {
            self.show_performance = other.show_performance;
        }
    }
}
