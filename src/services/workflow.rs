use crate::core::config::Config;
use crate::core::history::{Epoch, HistoryStore, ResolveError};
use crate::core::layout::PageLayout;
use crate::core::random::FocusRng;
use crate::core::state::{Beat, Cast, Page, PageKind, PageUpdate, Persona};
use crate::services::beat::{BeatRequest, BeatSynthesizer};
use crate::services::illustration::IllustrationSynthesizer;
use crate::services::image::ImageClient;
use crate::services::llm::LlmClient;
use crate::services::session::SessionValidator;
use futures_util::future;
use log::{debug, error, info};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("session validation denied the launch")]
    SessionRejected,
    #[error("a hero persona must be set before launching")]
    MissingHero,
    #[error("a story is already running; reset first")]
    AlreadyLaunched,
    #[error("page {0} is not in the history")]
    UnknownPage(usize),
    #[error("page {0} is not a decision page")]
    NotDecisionPage(usize),
    #[error("page {page} already resolved to \"{existing}\"")]
    ChoiceAlreadyResolved { page: usize, existing: String },
    #[error("session was reset while the request was in progress")]
    StaleSession,
    #[error(transparent)]
    Validator(#[from] anyhow::Error),
}

impl From<ResolveError> for OrchestratorError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::UnknownPage(page) => OrchestratorError::UnknownPage(page),
            ResolveError::AlreadyResolved { page, existing } => {
                OrchestratorError::ChoiceAlreadyResolved { page, existing }
            }
            ResolveError::Stale => OrchestratorError::StaleSession,
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    in_flight: HashSet<usize>,
    cast: Cast,
    sheet: usize,
}

/// Page indices claimed by one batch, tied to the epoch they were claimed in.
struct Reservation {
    epoch: Epoch,
    indices: Vec<usize>,
    cast: Cast,
}

/// Background work started by [`PageOrchestrator::launch_story`].
pub struct StoryLaunch {
    cover: JoinHandle<()>,
    opening: JoinHandle<()>,
}

impl StoryLaunch {
    /// Wait for the cover and the opening batch to finish.
    pub async fn wait(self) {
        let (cover, opening) = future::join(self.cover, self.opening).await;
        for (name, result) in [("cover", cover), ("opening batch", opening)] {
            if let Err(e) = result {
                error!("{} task aborted: {}", name, e);
            }
        }
    }
}

struct Inner {
    layout: PageLayout,
    history: Arc<HistoryStore>,
    beats: BeatSynthesizer,
    illustrations: IllustrationSynthesizer,
    validator: Arc<dyn SessionValidator>,
    launch_delay: Duration,
    session: Mutex<Session>,
}

/// Decides which pages to generate and in what order, and keeps the
/// in-flight guard so no page index is ever generated twice at once.
///
/// Cloning is cheap; clones drive the same session.
#[derive(Clone)]
pub struct PageOrchestrator {
    inner: Arc<Inner>,
}

impl PageOrchestrator {
    pub fn new(
        layout: PageLayout,
        history: Arc<HistoryStore>,
        beats: BeatSynthesizer,
        illustrations: IllustrationSynthesizer,
        validator: Arc<dyn SessionValidator>,
        launch_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                layout,
                history,
                beats,
                illustrations,
                validator,
                launch_delay,
                session: Mutex::new(Session::default()),
            }),
        }
    }

    pub fn from_config(
        config: &Config,
        llm: Arc<dyn LlmClient>,
        images: Arc<dyn ImageClient>,
        validator: Arc<dyn SessionValidator>,
        rng: Arc<dyn FocusRng>,
    ) -> Self {
        let timeout = config.timing.synthesis_timeout();
        let beats = BeatSynthesizer::new(
            llm,
            config.story.clone(),
            config.layout.max_story_pages,
            rng,
            timeout,
        );
        let illustrations = IllustrationSynthesizer::new(
            images,
            &config.story.genre,
            &config.image.aspect_ratio,
            timeout,
        );
        Self::new(
            config.layout.clone(),
            Arc::new(HistoryStore::default()),
            beats,
            illustrations,
            validator,
            config.timing.launch_delay(),
        )
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn history(&self) -> Arc<HistoryStore> {
        self.inner.history.clone()
    }

    pub fn layout(&self) -> &PageLayout {
        &self.inner.layout
    }

    pub fn set_hero(&self, hero: Option<Persona>) {
        self.session().cast.hero = hero.map(Arc::new);
    }

    pub fn set_co_star(&self, co_star: Option<Persona>) {
        self.session().cast.co_star = co_star.map(Arc::new);
    }

    pub fn cast(&self) -> Cast {
        self.session().cast.clone()
    }

    /// Indices currently being generated, ascending.
    pub fn in_flight(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.session().in_flight.iter().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn is_idle(&self) -> bool {
        self.session().in_flight.is_empty()
    }

    pub fn sheet(&self) -> usize {
        self.session().sheet
    }

    pub fn open_book(&self) -> usize {
        let mut session = self.session();
        session.sheet = 1;
        session.sheet
    }

    /// Go back to any earlier sheet, or forward one sheet once the current
    /// page has its artwork.
    pub fn flip_to(&self, index: usize) -> usize {
        let mut session = self.session();
        if index < session.sheet {
            session.sheet = index;
        } else if index == session.sheet
            && self
                .inner
                .history
                .get(index)
                .is_some_and(|page| page.has_image())
        {
            session.sheet += 1;
        }
        session.sheet
    }

    /// Claim the not-yet-known indices of `[start, start + count)` and
    /// reserve their slots in the history. Returns `None` when nothing is
    /// left to generate or the session moved past `expected`.
    fn reserve(&self, start: usize, count: usize, expected: Option<Epoch>) -> Option<Reservation> {
        let mut session = self.session();
        let history = &self.inner.history;
        let epoch = history.epoch();
        if expected.is_some_and(|e| e != epoch) {
            debug!("Skipping batch at {}: session was reset", start);
            return None;
        }

        let indices: Vec<usize> = self
            .inner
            .layout
            .clip(start, count)
            .filter(|i| !session.in_flight.contains(i) && !history.contains(*i))
            .collect();
        if indices.is_empty() {
            debug!("Nothing to generate in [{}, {})", start, start + count);
            return None;
        }

        session.in_flight.extend(indices.iter().copied());
        let placeholders = indices
            .iter()
            .map(|&i| {
                let mut page = Page::placeholder(i, self.inner.layout.kind_for(i));
                page.is_decision = self.inner.layout.is_decision(i);
                page
            })
            .collect();
        history.append_all(epoch, placeholders);

        Some(Reservation {
            epoch,
            indices,
            cast: session.cast.clone(),
        })
    }

    /// Release `index` from the in-flight set, unless the session has been
    /// reset since it was claimed.
    fn finish(&self, epoch: Epoch, index: usize) {
        let mut session = self.session();
        if self.inner.history.epoch() == epoch {
            session.in_flight.remove(&index);
        } else {
            debug!("Dropping stale completion of page {}", index);
        }
    }

    async fn run_reservation(&self, reservation: Reservation) -> Vec<usize> {
        let Reservation { epoch, indices, cast } = reservation;
        info!("Generating pages {:?}", indices);
        for &index in &indices {
            let kind = self.inner.layout.kind_for(index);
            self.run_page(epoch, index, kind, &cast).await;
            self.finish(epoch, index);
        }
        info!("Finished pages {:?}", indices);
        indices
    }

    async fn run_page(&self, epoch: Epoch, index: usize, kind: PageKind, cast: &Cast) {
        let history = &self.inner.history;
        let is_decision = self.inner.layout.is_decision(index);

        let beat = match kind {
            PageKind::Story => {
                let context = history.pages_before(index);
                self.inner
                    .beats
                    .synthesize(&BeatRequest {
                        history: &context,
                        page: index,
                        is_decision,
                        is_final: self.inner.layout.is_final(index),
                        co_star_active: cast.co_star.is_some(),
                    })
                    .await
            }
            PageKind::BackCover => Beat::teaser(),
            PageKind::Cover => Beat::blank(),
        };

        // Text lands first so consumers can show it while the art renders.
        if !history.update(epoch, index, PageUpdate::beat(beat.clone(), is_decision)) {
            debug!("Page {} no longer belongs to this session, skipping artwork", index);
            return;
        }

        let image = self.inner.illustrations.render(&beat, kind, cast).await;
        history.update(epoch, index, PageUpdate::finished(image));
    }

    /// Generate a page whose slot is already in the history.
    pub async fn generate_single_page(&self, index: usize, kind: PageKind) {
        let epoch = self.inner.history.epoch();
        let cast = self.cast();
        self.run_page(epoch, index, kind, &cast).await;
    }

    /// Generate `[start, start + count)` one page after another, skipping
    /// indices that are already known or in flight. Returns the indices
    /// this call generated.
    pub async fn generate_batch(&self, start: usize, count: usize) -> Vec<usize> {
        match self.reserve(start, count, None) {
            Some(reservation) => self.run_reservation(reservation).await,
            None => Vec::new(),
        }
    }

    /// Continue the story past the last known page without a choice. Stops
    /// on the next decision page, and does nothing while a decision page
    /// is waiting for the reader.
    pub async fn read_ahead(&self) -> Vec<usize> {
        let history = &self.inner.history;
        let waiting = history
            .all_pages()
            .iter()
            .any(|p| p.is_decision && p.resolved_choice.is_none() && !p.choices().is_empty());
        if waiting {
            debug!("Not reading ahead: a decision is open");
            return Vec::new();
        }

        let next = history.max_index().map_or(0, |m| m + 1);
        if next > self.inner.layout.total_pages {
            return Vec::new();
        }
        let count = self.inner.layout.forward_count(next, self.inner.layout.batch_size);
        self.generate_batch(next, count).await
    }

    /// Start a story: the cover renders right away, the opening pages after
    /// the presentation delay.
    pub async fn launch_story(&self) -> Result<StoryLaunch, OrchestratorError> {
        if !self.inner.validator.validate().await? {
            return Err(OrchestratorError::SessionRejected);
        }

        let (epoch, cast) = {
            let mut session = self.session();
            if session.cast.hero.is_none() {
                return Err(OrchestratorError::MissingHero);
            }
            let history = &self.inner.history;
            if !history.is_empty() || !session.in_flight.is_empty() {
                return Err(OrchestratorError::AlreadyLaunched);
            }
            let epoch = history.epoch();
            session.in_flight.insert(0);
            history.append(epoch, Page::placeholder(0, PageKind::Cover));
            (epoch, session.cast.clone())
        };
        info!("Launching story");

        let this = self.clone();
        let cover = tokio::spawn(async move {
            this.run_page(epoch, 0, PageKind::Cover, &cast).await;
            this.finish(epoch, 0);
        });

        let this = self.clone();
        let opening = tokio::spawn(async move {
            tokio::time::sleep(this.inner.launch_delay).await;
            let initial = this.inner.layout.initial_pages;
            if let Some(reservation) = this.reserve(1, initial, Some(epoch)) {
                this.run_reservation(reservation).await;
            }
        });

        Ok(StoryLaunch { cover, opening })
    }

    /// Record the reader's pick on a decision page and extend the story by
    /// one batch past the last known page. Returns the handle of the batch
    /// it started, if any.
    pub fn handle_choice(
        &self,
        index: usize,
        choice: &str,
    ) -> Result<Option<JoinHandle<()>>, OrchestratorError> {
        if !self.inner.layout.is_decision(index) {
            return Err(OrchestratorError::NotDecisionPage(index));
        }
        let history = &self.inner.history;
        let epoch = history.epoch();
        history.resolve_choice(epoch, index, choice)?;
        info!("Page {} resolved: {}", index, choice);

        let next = history.max_index().unwrap_or(0) + 1;
        if next > self.inner.layout.total_pages {
            return Ok(None);
        }
        let Some(reservation) = self.reserve(next, self.inner.layout.batch_size, Some(epoch)) else {
            return Ok(None);
        };

        let this = self.clone();
        Ok(Some(tokio::spawn(async move {
            this.run_reservation(reservation).await;
        })))
    }

    /// Forget the whole session. In-flight work keeps running but its
    /// results are discarded.
    pub fn reset(&self) {
        let mut session = self.session();
        *session = Session::default();
        let epoch = self.inner.history.clear();
        info!("Session reset (epoch {:?})", epoch);
    }
}
