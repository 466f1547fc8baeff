//! Narrative history: the single source of truth for every page in the
//! current session.
//!
//! Pages are keyed by index and merged in place. Each write from a
//! generation task carries the [`Epoch`] that was current when its page
//! was reserved; [`HistoryStore::clear`] advances the epoch, so work that
//! finishes after a reset is dropped instead of leaking into the fresh
//! session.

use crate::core::state::{Page, PageKind, PageUpdate};
use log::debug;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    Appended(Vec<usize>),
    Updated(usize),
    Cleared,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("page {0} is not in the history")]
    UnknownPage(usize),
    #[error("page {page} already resolved to \"{existing}\"")]
    AlreadyResolved { page: usize, existing: String },
    #[error("session was reset")]
    Stale,
}

#[derive(Debug, Default)]
struct Inner {
    epoch: u64,
    pages: BTreeMap<usize, Page>,
}

#[derive(Debug)]
pub struct HistoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<HistoryEvent>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HistoryStore {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: HistoryEvent) {
        // No subscribers is fine; the store itself is the record.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    pub fn epoch(&self) -> Epoch {
        Epoch(self.read().epoch)
    }

    /// Insert a page. Returns false when the index already exists or the
    /// epoch is stale.
    pub fn append(&self, epoch: Epoch, page: Page) -> bool {
        !self.append_all(epoch, vec![page]).is_empty()
    }

    /// Insert several pages under one lock, skipping indices that already
    /// exist. Returns the indices actually inserted.
    pub fn append_all(&self, epoch: Epoch, pages: Vec<Page>) -> Vec<usize> {
        let mut inserted = Vec::with_capacity(pages.len());
        {
            let mut inner = self.write();
            if inner.epoch != epoch.0 {
                debug!("Dropping append from stale epoch {:?}", epoch);
                return inserted;
            }
            for page in pages {
                if inner.pages.contains_key(&page.index) {
                    debug!("Page {} already in history, skipping append", page.index);
                    continue;
                }
                inserted.push(page.index);
                inner.pages.insert(page.index, page);
            }
        }
        if !inserted.is_empty() {
            self.emit(HistoryEvent::Appended(inserted.clone()));
        }
        inserted
    }

    /// Merge `update` into the page at `index`. Returns false when the page
    /// is gone or the epoch is stale.
    pub fn update(&self, epoch: Epoch, index: usize, update: PageUpdate) -> bool {
        {
            let mut inner = self.write();
            if inner.epoch != epoch.0 {
                debug!("Dropping update of page {} from stale epoch {:?}", index, epoch);
                return false;
            }
            match inner.pages.get_mut(&index) {
                Some(page) => update.apply(page),
                None => return false,
            }
        }
        self.emit(HistoryEvent::Updated(index));
        true
    }

    /// Record the consumer's choice on a page. A resolution is never overwritten.
    pub fn resolve_choice(&self, epoch: Epoch, index: usize, choice: &str) -> Result<(), ResolveError> {
        {
            let mut inner = self.write();
            if inner.epoch != epoch.0 {
                return Err(ResolveError::Stale);
            }
            let page = inner
                .pages
                .get_mut(&index)
                .ok_or(ResolveError::UnknownPage(index))?;
            if let Some(existing) = &page.resolved_choice {
                return Err(ResolveError::AlreadyResolved {
                    page: index,
                    existing: existing.clone(),
                });
            }
            page.resolved_choice = Some(choice.to_string());
        }
        self.emit(HistoryEvent::Updated(index));
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<Page> {
        self.read().pages.get(&index).cloned()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.read().pages.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.read().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().pages.is_empty()
    }

    pub fn max_index(&self) -> Option<usize> {
        self.read().pages.keys().next_back().copied()
    }

    /// Snapshot of every page, ordered by index.
    pub fn all_pages(&self) -> Vec<Page> {
        self.read().pages.values().cloned().collect()
    }

    /// Story pages with a beat and an index below `index`, ascending.
    pub fn pages_before(&self, index: usize) -> Vec<Page> {
        self.read()
            .pages
            .range(..index)
            .map(|(_, page)| page)
            .filter(|page| page.kind == PageKind::Story && page.beat.is_some())
            .cloned()
            .collect()
    }

    /// Drop every page and advance the epoch. Returns the new epoch.
    pub fn clear(&self) -> Epoch {
        let epoch = {
            let mut inner = self.write();
            inner.pages.clear();
            inner.epoch += 1;
            Epoch(inner.epoch)
        };
        self.emit(HistoryEvent::Cleared);
        epoch
    }
}
