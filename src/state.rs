//! Presentation-layer state: accumulator, loader flags, page cursors, trajectory cache
//! and the last content shown per tab.

use crate::loader::{Accumulator, LoaderEvent, LoaderPhase};
use crate::record::Record;
use crate::store::TrajectoryQuery;
use crate::tabs::{Tab, TabContent};
use std::collections::HashMap;

/// Zero-based page index bound to the rows it was chosen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct PageCursor {
    page: usize,
    /// `None` until the cursor is first rendered against a record set.
    rows: Option<u64>,
}

#[derive(Debug, Default)]
pub struct DashboardState {
    accumulator: Accumulator,
    phase: LoaderPhase,
    cycle: u64,
    loader_total: usize,
    loader_error: Option<String>,
    identifiers: Option<u64>,
    cursors: HashMap<String, PageCursor>,
    trajectories: Option<(TrajectoryQuery, Vec<Record>)>,
    previous: HashMap<Tab, Option<TabContent>>,
}

impl DashboardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub fn loader_phase(&self) -> LoaderPhase {
        self.phase
    }

    /// The loader-completion flag.
    pub fn loader_complete(&self) -> bool {
        self.phase == LoaderPhase::Complete
    }

    pub fn loader_error(&self) -> Option<&str> {
        self.loader_error.as_deref()
    }

    /// Identifier count the current cycle was started with.
    pub fn loader_total(&self) -> usize {
        self.loader_total
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Start a new loading cycle: the accumulator is emptied and older events become stale.
    pub fn begin_cycle(&mut self, total: usize) -> u64 {
        self.cycle += 1;
        self.accumulator.reset();
        self.loader_total = total;
        self.loader_error = None;
        self.phase = if total == 0 {
            LoaderPhase::Complete
        } else {
            LoaderPhase::Loading
        };
        self.cycle
    }

    /// Mark the running cycle cancelled. Whole chunks already appended stay.
    pub fn cancel_cycle(&mut self) {
        if self.phase == LoaderPhase::Loading {
            self.phase = LoaderPhase::Cancelled;
        }
    }

    /// Record the identifier set; returns true (and resets the accumulator) when it changed.
    pub fn set_identifiers(&mut self, fingerprint: u64) -> bool {
        if self.identifiers == Some(fingerprint) {
            return false;
        }
        self.identifiers = Some(fingerprint);
        self.accumulator.reset();
        self.phase = LoaderPhase::Idle;
        self.loader_total = 0;
        true
    }

    /// Apply one loader event. Events of other cycles are ignored; returns whether it applied.
    pub fn apply_loader_event(&mut self, event: LoaderEvent) -> bool {
        if event.cycle() != self.cycle || self.phase != LoaderPhase::Loading {
            tracing::trace!(event_cycle = event.cycle(), cycle = self.cycle, "ignoring stale loader event");
            return false;
        }
        match event {
            LoaderEvent::Chunk { records, .. } => {
                let room = self.loader_total.saturating_sub(self.accumulator.len());
                let mut records = records;
                records.truncate(room);
                self.accumulator.append_chunk(records);
            }
            LoaderEvent::Complete { .. } => {
                self.phase = LoaderPhase::Complete;
            }
            LoaderEvent::Failed { message, .. } => {
                self.phase = LoaderPhase::Failed;
                self.loader_error = Some(message);
            }
        }
        true
    }

    /// Page for the table under `key`, reset to 0 when its rows changed since last render.
    pub fn page_for(&mut self, key: &str, rows: u64) -> usize {
        let cursor = self.cursors.entry(key.to_string()).or_default();
        match cursor.rows {
            Some(seen) if seen != rows => {
                cursor.page = 0;
                cursor.rows = Some(rows);
            }
            None => cursor.rows = Some(rows),
            Some(_) => {}
        }
        cursor.page
    }

    /// Move the cursor of `key`, keeping its binding to the current rows.
    pub fn set_page(&mut self, key: &str, page: usize) {
        self.cursors.entry(key.to_string()).or_default().page = page;
    }

    pub fn page(&self, key: &str) -> usize {
        self.cursors.get(key).map_or(0, |c| c.page)
    }

    pub fn cached_trajectories(&self, query: &TrajectoryQuery) -> Option<&[Record]> {
        match &self.trajectories {
            Some((cached, records)) if cached == query => Some(records),
            _ => None,
        }
    }

    pub fn cache_trajectories(&mut self, query: TrajectoryQuery, records: Vec<Record>) {
        self.trajectories = Some((query, records));
    }

    /// Last content successfully rendered for `tab`, if any render succeeded yet.
    pub fn previous(&self, tab: Tab) -> Option<&Option<TabContent>> {
        self.previous.get(&tab)
    }

    pub fn remember(&mut self, tab: Tab, content: Option<TabContent>) {
        self.previous.insert(tab, content);
    }
}
