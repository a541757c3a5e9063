//! One dashboard viewer: active tab, background loader and everything rendered so far.

use crate::config::{AppConfig, OverviewConfig};
use crate::error_display::user_message_from_report;
use crate::loader::{LoaderEvent, LoaderHandle, LoaderPhase, StatsLoader};
use crate::overview::{build_overview, Overview};
use crate::permissions::{CapabilityResolver, EntityType};
use crate::record::{fingerprint, parse_records};
use crate::state::DashboardState;
use crate::store::RecordStore;
use crate::tabs::{Filters, Placeholder, Rendered, Stores, Tab, TabContent, TabContentResolver};
use crate::timing::{StageTimer, StageTiming};
use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

const LOADER_POLL: Duration = Duration::from_millis(50);

pub struct DashboardSession {
    store: Arc<dyn RecordStore>,
    resolver: Arc<dyn CapabilityResolver>,
    tabs: TabContentResolver,
    loader: StatsLoader,
    overview_config: OverviewConfig,
    state: DashboardState,
    stores: Stores,
    filters: Filters,
    active: Option<Tab>,
    running: Option<LoaderHandle>,
    tx: Sender<LoaderEvent>,
    events: Receiver<LoaderEvent>,
    timer: StageTimer,
    last_error: Option<String>,
}

impl DashboardSession {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<dyn CapabilityResolver>,
        config: &AppConfig,
    ) -> Self {
        let (tx, events) = mpsc::channel();
        let timer = if config.debug.enabled && config.debug.show_performance {
            StageTimer::enabled()
        } else {
            StageTimer::disabled()
        };
        Self {
            tabs: TabContentResolver::new(Arc::clone(&resolver), config.display.page_size),
            loader: StatsLoader::new(Arc::clone(&store), config.loader.chunk_size),
            overview_config: config.overview.clone(),
            store,
            resolver,
            state: DashboardState::new(),
            stores: Stores::default(),
            filters: Filters::default(),
            active: None,
            running: None,
            tx,
            events,
            timer,
            last_error: None,
        }
    }

    pub fn with_timer(mut self, timer: StageTimer) -> Self {
        self.timer = timer;
        self
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn active_tab(&self) -> Option<Tab> {
        self.active
    }

    /// Message of the last render that failed, if the latest render failed.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn timings(&self) -> &[StageTiming] {
        self.timer.timings()
    }

    pub fn take_timings(&mut self) -> Vec<StageTiming> {
        self.timer.take()
    }

    /// Replace the shared stores. A changed identifier set restarts the loader.
    pub fn set_stores(&mut self, stores: Stores) {
        self.stores = stores;
        let ids = fingerprint(&parse_records(&self.stores.uuids).unwrap_or_default());
        if self.state.set_identifiers(ids) {
            self.stop_loader();
            if self.active == Some(Tab::Uuids) {
                self.start_loader();
            }
        }
    }

    pub fn set_filters(&mut self, filters: Filters) {
        self.filters = filters;
    }

    /// Switch tabs. Entering UUIDs starts a fresh loading cycle; leaving it cancels the
    /// running one.
    pub fn select_tab(&mut self, tab: Tab) {
        if self.active == Some(tab) {
            return;
        }
        tracing::debug!(from = ?self.active, to = %tab, "tab selected");
        self.stop_loader();
        self.active = Some(tab);
        if tab == Tab::Uuids {
            self.start_loader();
        }
    }

    pub fn navigate_away(&mut self) {
        self.stop_loader();
        self.active = None;
    }

    fn start_loader(&mut self) {
        if !self
            .resolver
            .has_permission(EntityType::Uuids.data_capability())
        {
            return;
        }
        let ids = self.stores.identifiers();
        let cycle = self.state.begin_cycle(ids.len());
        if !ids.is_empty() {
            self.running = Some(self.loader.spawn(cycle, ids, self.tx.clone()));
        }
    }

    fn stop_loader(&mut self) {
        if let Some(handle) = self.running.take() {
            handle.cancel();
        }
        self.state.cancel_cycle();
    }

    fn apply(&mut self, event: LoaderEvent) {
        if self.state.apply_loader_event(event) && self.state.loader_phase() != LoaderPhase::Loading
        {
            if let Some(handle) = self.running.take() {
                handle.join();
            }
        }
    }

    /// Apply every loader event received so far without blocking. Returns how many arrived.
    pub fn pump_events(&mut self) -> usize {
        let mut received = 0;
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
            received += 1;
        }
        received
    }

    /// Block until the current loading cycle is no longer running.
    pub fn wait_for_loader(&mut self) -> LoaderPhase {
        while self.state.loader_phase() == LoaderPhase::Loading {
            match self.events.recv_timeout(LOADER_POLL) {
                Ok(event) => self.apply(event),
                Err(RecvTimeoutError::Timeout) => {
                    if self.running.as_ref().map_or(true, |h| h.is_finished()) {
                        self.pump_events();
                        if self.state.loader_phase() == LoaderPhase::Loading {
                            tracing::warn!("stats loader exited without completing");
                            self.stop_loader();
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.state.loader_phase()
    }

    /// Point the cursor of the table under `key` at `page`.
    pub fn set_page(&mut self, key: &str, page: usize) {
        self.state.set_page(key, page);
    }

    /// Render the active tab against the current state.
    ///
    /// Failures and malformed input fall back to the last content rendered for the tab.
    pub fn render(&mut self) -> Option<TabContent> {
        let tab = self.active?;
        self.pump_events();

        if tab == Tab::Uuids && self.state.loader_phase() == LoaderPhase::Failed {
            self.last_error = self.state.loader_error().map(str::to_string);
            return self.previous(tab);
        }

        let result = self.tabs.render(
            tab,
            &self.stores,
            &self.filters,
            &mut self.state,
            self.store.as_ref(),
            &mut self.timer,
        );
        match result {
            Ok(Rendered::Content(content)) => {
                self.last_error = None;
                // A loading placeholder is transient and never a fallback.
                if !matches!(
                    content,
                    Some(TabContent::Placeholder(Placeholder::Loading { .. }))
                ) {
                    self.state.remember(tab, content.clone());
                }
                content
            }
            Ok(Rendered::KeepPrevious) => self.previous(tab),
            Err(e) => {
                let message = user_message_from_report(&e);
                tracing::error!(tab = %tab, error = %message, "render failed, keeping previous content");
                self.last_error = Some(message);
                self.previous(tab)
            }
        }
    }

    fn previous(&self, tab: Tab) -> Option<TabContent> {
        self.state.previous(tab).cloned().flatten()
    }

    /// Cards and trends for the current stores.
    pub fn overview(&mut self, now: DateTime<Utc>) -> Result<Overview> {
        let uuids = parse_records(&self.stores.uuids).unwrap_or_default();
        let trips = parse_records(&self.stores.trips).unwrap_or_default();
        build_overview(
            &uuids,
            &trips,
            self.resolver.as_ref(),
            self.store.as_ref(),
            &self.overview_config,
            now,
            &mut self.timer,
        )
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        self.stop_loader();
    }
}
