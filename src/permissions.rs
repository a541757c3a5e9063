//! Capability checks and per-entity column allow-lists.
//!
//! Everything here is a pure function of the `[permissions]` configuration loaded at
//! startup. Components receive a [`CapabilityResolver`] explicitly; there is no
//! process-wide singleton.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Capability names understood by the dashboard. Anything else resolves to denied.
pub const KNOWN_CAPABILITIES: &[&str] = &[
    "data_uuids",
    "data_trips",
    "data_demographics",
    "data_trajectories",
    "overview_users",
    "overview_active_users",
    "overview_trips",
    "overview_signup_trends",
    "overview_trips_trend",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Uuids,
    Trips,
    Demographics,
    Trajectories,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uuids => "uuids",
            Self::Trips => "trips",
            Self::Demographics => "demographics",
            Self::Trajectories => "trajectories",
        }
    }

    /// Capability gating the data table for this entity type.
    pub fn data_capability(self) -> &'static str {
        match self {
            Self::Uuids => "data_uuids",
            Self::Trips => "data_trips",
            Self::Demographics => "data_demographics",
            Self::Trajectories => "data_trajectories",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A computed column: `key` is the internal name, `label` the column name rows carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedColumn {
    pub key: String,
    pub label: String,
}

impl NamedColumn {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// Ordered set of column names. Insertion order is kept; duplicates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSet {
    names: Vec<String>,
}

impl ColumnSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the name was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.names.push(name);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Union, keeping `self`'s order first.
    pub fn union(mut self, other: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for name in other {
            self.insert(name);
        }
        self
    }

    pub fn is_subset_of(&self, other: &ColumnSet) -> bool {
        self.iter().all(|n| other.contains(n))
    }
}

impl<S: Into<String>> FromIterator<S> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        ColumnSet::new().union(iter)
    }
}

/// Decides what the current viewer may see.
pub trait CapabilityResolver: Send + Sync {
    /// Unknown capability names resolve to false.
    fn has_permission(&self, capability: &str) -> bool;

    /// Raw stored fields allowed for `entity`. Empty when the fields are discovered from data.
    fn allowed_columns(&self, entity: EntityType) -> ColumnSet;

    /// Computed columns allowed for `entity`.
    fn allowed_named_columns(&self, entity: EntityType) -> Vec<NamedColumn>;

    /// Columns that must never be shown for `entity`.
    fn excluded_columns(&self, entity: EntityType) -> ColumnSet;

    /// Column set for an entity whose fields were discovered from the data.
    ///
    /// When the configuration lists valid columns those win; otherwise the discovered
    /// columns minus the exclusions are allowed.
    fn columns_for_discovered(&self, entity: EntityType, discovered: &[String]) -> ColumnSet {
        let allowed = self.allowed_columns(entity);
        if !allowed.is_empty() {
            return allowed;
        }
        let excluded = self.excluded_columns(entity);
        discovered
            .iter()
            .filter(|c| !excluded.contains(c))
            .cloned()
            .collect()
    }
}

/// Column policy for one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnPolicy {
    /// Stored fields that may be shown. Empty = discover from the data.
    pub valid: Vec<String>,
    /// Fields removed from `valid` (or from the discovered set).
    pub exclude: Vec<String>,
    /// Computed columns shown under their label.
    pub named: Vec<NamedColumn>,
}

impl ColumnPolicy {
    fn with_valid(valid: &[&str]) -> Self {
        Self {
            valid: valid.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    pub capabilities: BTreeMap<String, bool>,
    pub uuids: ColumnPolicy,
    pub trips: ColumnPolicy,
    pub demographics: ColumnPolicy,
    pub trajectories: ColumnPolicy,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        let capabilities = KNOWN_CAPABILITIES
            .iter()
            .map(|c| (c.to_string(), true))
            .collect();
        let mut trips = ColumnPolicy::with_valid(&[
            "user_id",
            "trip_start_time_str",
            "trip_end_time_str",
            "timezone",
            "start_coordinates",
            "end_coordinates",
            "travel_modes",
            "data.duration",
            "data.distance",
        ]);
        trips.named = vec![
            NamedColumn::new("mode_confirm", "Mode Confirm"),
            NamedColumn::new("purpose_confirm", "Trip Purpose"),
            NamedColumn::new("replaced_mode", "Replaced Mode"),
        ];
        Self {
            capabilities,
            uuids: ColumnPolicy::with_valid(&[
                "user_token",
                "user_id",
                "update_ts",
                "total_trips",
                "labeled_trips",
                "first_trip",
                "last_trip",
                "last_call",
                "platform",
                "manufacturer",
                "app_version",
                "os_version",
                "phone_lang",
            ]),
            trips,
            demographics: ColumnPolicy {
                exclude: vec!["_id".to_string()],
                ..ColumnPolicy::default()
            },
            trajectories: ColumnPolicy::with_valid(&[
                "user_id",
                "metadata.key",
                "data.ts",
                "data.fmt_time",
                "data.latitude",
                "data.longitude",
                "data.speed",
                "data.heading",
                "data.mode",
            ]),
        }
    }
}

impl PermissionConfig {
    pub fn policy(&self, entity: EntityType) -> &ColumnPolicy {
        match entity {
            EntityType::Uuids => &self.uuids,
            EntityType::Trips => &self.trips,
            EntityType::Demographics => &self.demographics,
            EntityType::Trajectories => &self.trajectories,
        }
    }

    /// Capability names in the configuration that the dashboard does not know about.
    pub fn unknown_capabilities(&self) -> Vec<&str> {
        self.capabilities
            .keys()
            .map(String::as_str)
            .filter(|c| !KNOWN_CAPABILITIES.contains(c))
            .collect()
    }
}

/// Configuration-backed [`CapabilityResolver`].
#[derive(Debug, Clone)]
pub struct Permissions {
    config: PermissionConfig,
}

impl Permissions {
    pub fn new(config: PermissionConfig) -> Self {
        Self { config }
    }

    /// Everything granted, default column lists.
    pub fn allow_all() -> Self {
        Self::new(PermissionConfig::default())
    }

    /// Same column lists as `self` with one capability switched.
    pub fn with_capability(mut self, capability: &str, granted: bool) -> Self {
        self.config
            .capabilities
            .insert(capability.to_string(), granted);
        self
    }

    pub fn config(&self) -> &PermissionConfig {
        &self.config
    }
}

impl CapabilityResolver for Permissions {
    fn has_permission(&self, capability: &str) -> bool {
        self.config
            .capabilities
            .get(capability)
            .copied()
            .unwrap_or(false)
    }

    fn allowed_columns(&self, entity: EntityType) -> ColumnSet {
        let policy = self.config.policy(entity);
        policy
            .valid
            .iter()
            .filter(|c| !policy.exclude.contains(c))
            .cloned()
            .collect()
    }

    fn allowed_named_columns(&self, entity: EntityType) -> Vec<NamedColumn> {
        let policy = self.config.policy(entity);
        policy
            .named
            .iter()
            .filter(|n| !policy.exclude.contains(&n.label) && !policy.exclude.contains(&n.key))
            .cloned()
            .collect()
    }

    fn excluded_columns(&self, entity: EntityType) -> ColumnSet {
        self.config.policy(entity).exclude.iter().cloned().collect()
    }
}
