//! Tab dispatch: picks the data, columns and pagination for each data tab.

use crate::loader::LoaderPhase;
use crate::permissions::{CapabilityResolver, ColumnSet, EntityType};
use crate::reconcile::{project, reconcile, Projection, Table};
use crate::record::{discover_columns, fingerprint, parse_records, Record};
use crate::state::DashboardState;
use crate::store::{DateRange, RecordStore, Snapshot, TrajectoryQuery};
use crate::table::RenderableTable;
use crate::timing::StageTimer;
use color_eyre::Result;
use opdash_cli::TabArg;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tab {
    #[default]
    Uuids,
    Trips,
    Demographics,
    Trajectories,
}

impl Tab {
    pub fn entity(self) -> EntityType {
        match self {
            Tab::Uuids => EntityType::Uuids,
            Tab::Trips => EntityType::Trips,
            Tab::Demographics => EntityType::Demographics,
            Tab::Trajectories => EntityType::Trajectories,
        }
    }

    /// Page-cursor key of the tab's main table.
    pub fn cursor_key(self) -> &'static str {
        self.entity().as_str()
    }

    pub fn label(self) -> &'static str {
        match self {
            Tab::Uuids => "UUIDs",
            Tab::Trips => "Trips",
            Tab::Demographics => "Demographics",
            Tab::Trajectories => "Trajectories",
        }
    }
}

impl From<TabArg> for Tab {
    fn from(arg: TabArg) -> Self {
        match arg {
            TabArg::Uuids => Tab::Uuids,
            TabArg::Trips => Tab::Trips,
            TabArg::Demographics => Tab::Demographics,
            TabArg::Trajectories => Tab::Trajectories,
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cursor key of one demographic survey sub-tab.
pub fn survey_cursor_key(survey: &str) -> String {
    format!("demographics/{}", survey)
}

/// Shared stores the tabs read from.
#[derive(Debug, Clone)]
pub struct Stores {
    /// Identifier source: one record per user, carrying at least `user_id`.
    pub uuids: Value,
    pub trips: Value,
    /// User-input columns present on trips, shown in addition to the allowed ones.
    pub user_input_columns: Vec<String>,
    /// Survey key -> responses.
    pub demographics: Value,
    pub excluded_uuids: BTreeSet<String>,
}

impl Default for Stores {
    fn default() -> Self {
        Self {
            uuids: Value::Array(Vec::new()),
            trips: Value::Array(Vec::new()),
            user_input_columns: Vec::new(),
            demographics: Value::Object(Default::default()),
            excluded_uuids: BTreeSet::new(),
        }
    }
}

impl Stores {
    /// Stores as the dashboard loads them: every user, the given trips, every survey.
    pub fn from_snapshot(snapshot: &Snapshot, trips: Vec<Record>, excluded: BTreeSet<String>) -> Self {
        Self {
            uuids: Value::Array(snapshot.uuids.iter().cloned().map(Value::Object).collect()),
            trips: Value::Array(trips.into_iter().map(Value::Object).collect()),
            user_input_columns: snapshot.user_input_columns.clone(),
            demographics: Value::Object(snapshot.demographics.clone()),
            excluded_uuids: excluded,
        }
    }

    /// User ids of the identifier source, in source order. Empty when malformed.
    pub fn identifiers(&self) -> Vec<String> {
        parse_records(&self.uuids)
            .unwrap_or_default()
            .iter()
            .filter_map(|r| r.get("user_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filters {
    pub date_range: Option<DateRange>,
    pub timezone: String,
    pub key_list: Vec<String>,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            date_range: None,
            timezone: "UTC".to_string(),
            key_list: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    PermissionDenied(String),
    Loading { loaded: usize, total: usize },
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::PermissionDenied(msg) => f.write_str(msg),
            Placeholder::Loading { loaded, total } => {
                write!(f, "Loading... ({}/{} users)", loaded, total)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubTab {
    pub label: String,
    pub table: RenderableTable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TabContent {
    Table(RenderableTable),
    /// One table per demographic survey.
    SubTabs(Vec<SubTab>),
    Placeholder(Placeholder),
}

/// Result of one render.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    /// `None` means there is nothing to show.
    Content(Option<TabContent>),
    /// The input was not tabular; keep showing the previous content.
    KeepPrevious,
}

pub struct TabContentResolver {
    resolver: Arc<dyn CapabilityResolver>,
    page_size: usize,
}

impl TabContentResolver {
    pub fn new(resolver: Arc<dyn CapabilityResolver>, page_size: usize) -> Self {
        Self {
            resolver,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Resolve what `tab` shows for the current stores and filters.
    ///
    /// Only adapter failures are errors; denied, loading, empty and malformed inputs are
    /// ordinary outcomes.
    pub fn render(
        &self,
        tab: Tab,
        stores: &Stores,
        filters: &Filters,
        state: &mut DashboardState,
        store: &dyn RecordStore,
        timer: &mut StageTimer,
    ) -> Result<Rendered> {
        let label = tab.cursor_key();
        timer.time("render", |timer| {
            timer.time(label, |timer| match tab {
                Tab::Uuids => Ok(self.render_uuids(stores, state, timer)),
                Tab::Trips => Ok(self.render_trips(stores, state, timer)),
                Tab::Demographics => Ok(self.render_demographics(stores, state, timer)),
                Tab::Trajectories => self.render_trajectories(stores, filters, state, store, timer),
            })
        })
    }

    fn paginate(&self, table: Table, key: &str, state: &mut DashboardState) -> RenderableTable {
        let page = state.page_for(key, fingerprint(&table.rows));
        let table = RenderableTable::new(table, self.page_size).with_page(page);
        if table.page_current() != page {
            state.set_page(key, table.page_current());
        }
        table
    }

    fn render_uuids(
        &self,
        stores: &Stores,
        state: &mut DashboardState,
        timer: &mut StageTimer,
    ) -> Rendered {
        if !self.resolver.has_permission(EntityType::Uuids.data_capability()) {
            return Rendered::Content(Some(TabContent::Placeholder(
                Placeholder::PermissionDenied(
                    "You do not have permission to view UUIDs.".to_string(),
                ),
            )));
        }
        if parse_records(&stores.uuids).is_none() {
            tracing::debug!("uuid store is not tabular, keeping previous content");
            return Rendered::KeepPrevious;
        }
        let identifiers = stores.identifiers().len();
        if identifiers == 0 {
            return Rendered::Content(None);
        }
        // A finished cycle shows whatever the store returned, even if short.
        let loaded = state.accumulator().len();
        let total = match state.loader_phase() {
            LoaderPhase::Complete | LoaderPhase::Failed => loaded,
            LoaderPhase::Loading => state.loader_total(),
            LoaderPhase::Idle | LoaderPhase::Cancelled => identifiers,
        };
        if loaded < total {
            return Rendered::Content(Some(TabContent::Placeholder(Placeholder::Loading {
                loaded,
                total,
            })));
        }
        let columns = self.resolver.allowed_columns(EntityType::Uuids);
        let table = timer.time("reconcile", |_| project(state.accumulator().records(), &columns));
        if table.is_blank() {
            return Rendered::Content(None);
        }
        let table = self.paginate(table, Tab::Uuids.cursor_key(), state);
        Rendered::Content(Some(TabContent::Table(table)))
    }

    /// Raw allowed columns, then named-column labels, then user-input columns.
    pub fn trip_columns(&self, user_input_columns: &[String]) -> ColumnSet {
        self.resolver
            .allowed_columns(EntityType::Trips)
            .union(
                self.resolver
                    .allowed_named_columns(EntityType::Trips)
                    .into_iter()
                    .map(|n| n.label),
            )
            .union(user_input_columns.iter().cloned())
    }

    fn render_trips(
        &self,
        stores: &Stores,
        state: &mut DashboardState,
        timer: &mut StageTimer,
    ) -> Rendered {
        if !self.resolver.has_permission(EntityType::Trips.data_capability()) {
            return Rendered::Content(None);
        }
        let columns = self.trip_columns(&stores.user_input_columns);
        match timer.time("reconcile", |_| reconcile(&stores.trips, &columns, None)) {
            Projection::Malformed => Rendered::KeepPrevious,
            Projection::Loading => Rendered::Content(None),
            Projection::Table(table) if table.is_blank() => Rendered::Content(None),
            Projection::Table(table) => {
                let table = self.paginate(table, Tab::Trips.cursor_key(), state);
                Rendered::Content(Some(TabContent::Table(table)))
            }
        }
    }

    fn render_demographics(
        &self,
        stores: &Stores,
        state: &mut DashboardState,
        timer: &mut StageTimer,
    ) -> Rendered {
        let Some(surveys) = stores.demographics.as_object() else {
            return Rendered::KeepPrevious;
        };
        if surveys.is_empty()
            || !self
                .resolver
                .has_permission(EntityType::Demographics.data_capability())
        {
            return Rendered::Content(None);
        }

        let mut tables: Vec<(String, Table)> = Vec::with_capacity(surveys.len());
        for (survey, responses) in surveys {
            let Some(records) = parse_records(responses) else {
                tracing::debug!(survey = %survey, "survey responses are not tabular, keeping previous content");
                return Rendered::KeepPrevious;
            };
            let table = timer.time(survey, |_| {
                let discovered = discover_columns(&records);
                let columns = self
                    .resolver
                    .columns_for_discovered(EntityType::Demographics, &discovered);
                project(&records, &columns)
            });
            tables.push((survey.clone(), table));
        }

        if tables.len() == 1 {
            let (_, table) = tables.remove(0);
            if table.is_blank() {
                return Rendered::Content(None);
            }
            let table = self.paginate(table, Tab::Demographics.cursor_key(), state);
            return Rendered::Content(Some(TabContent::Table(table)));
        }

        let sub_tabs = tables
            .into_iter()
            .map(|(label, table)| {
                let table = self.paginate(table, &survey_cursor_key(&label), state);
                SubTab { label, table }
            })
            .collect();
        Rendered::Content(Some(TabContent::SubTabs(sub_tabs)))
    }

    fn render_trajectories(
        &self,
        stores: &Stores,
        filters: &Filters,
        state: &mut DashboardState,
        store: &dyn RecordStore,
        timer: &mut StageTimer,
    ) -> Result<Rendered> {
        if !self
            .resolver
            .has_permission(EntityType::Trajectories.data_capability())
        {
            return Ok(Rendered::Content(None));
        }
        let Some(range) = filters.date_range else {
            return Ok(Rendered::Content(None));
        };
        if filters.key_list.is_empty() {
            return Ok(Rendered::Content(None));
        }
        let query = TrajectoryQuery {
            range,
            timezone: filters.timezone.clone(),
            excluded_uuids: stores.excluded_uuids.clone(),
            key_list: filters.key_list.clone(),
        };

        if state.cached_trajectories(&query).is_none() {
            let records = timer.time("query", |_| store.query_trajectories(&query))?;
            tracing::debug!(rows = records.len(), "trajectory query cached");
            state.cache_trajectories(query.clone(), records);
        }
        let columns = self.resolver.allowed_columns(EntityType::Trajectories);
        let records = state.cached_trajectories(&query).unwrap_or_default();
        let table = timer.time("reconcile", |_| project(records, &columns));
        if table.is_blank() {
            return Ok(Rendered::Content(None));
        }
        let table = self.paginate(table, Tab::Trajectories.cursor_key(), state);
        Ok(Rendered::Content(Some(TabContent::Table(table))))
    }
}
