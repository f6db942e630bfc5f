use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ViewerConfig;
use crate::model::{self, Breadcrumb, DocumentModel, OutlineHighlight};
use crate::store::{BookId, StateStore};
use crate::{PageBackend, RenderImage, RenderRequest};

pub const ZOOM_MIN: f32 = 0.25;
pub const ZOOM_MAX: f32 = 5.0;

/// How long chrome stays visible after a tap while immersive.
pub const REVEAL_WINDOW: Duration = Duration::from_secs(3);

const RENDER_CACHE_CAPACITY: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Image capped to the viewport height, centered, no scrolling.
    #[default]
    Height,
    /// Image spans the viewport width, vertical scrolling enabled.
    Width,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImmersiveMode {
    #[default]
    Off,
    /// Platform fullscreen, granted by the surface capability.
    Native,
    /// Same-window clean presentation, used when the capability is
    /// unavailable or the request was rejected.
    Degraded,
}

/// The small key-value blob persisted between viewer sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedViewerState {
    pub page: usize,
    pub zoom: f32,
    pub fit_mode: FitMode,
    pub translate_x: f32,
    pub translate_y: f32,
}

impl Default for PersistedViewerState {
    fn default() -> Self {
        Self {
            page: 0,
            zoom: 1.0,
            fit_mode: FitMode::Height,
            translate_x: 0.0,
            translate_y: 0.0,
        }
    }
}

/// The full runtime navigation state. Mutated exclusively by the session's
/// transition methods; every transition is a complete, atomic update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerState {
    pub index: usize,
    pub zoom: f32,
    pub pan_x: f32,
    pub pan_y: f32,
    pub fit_mode: FitMode,
    pub outline_open: bool,
    pub immersive: ImmersiveMode,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self {
            index: 0,
            zoom: 1.0,
            pan_x: 0.0,
            pan_y: 0.0,
            fit_mode: FitMode::default(),
            outline_open: false,
            immersive: ImmersiveMode::Off,
        }
    }
}

/// The platform fullscreen capability, probed and selected once at startup.
/// `enter` returning an error means the capability is unavailable or the
/// request was rejected; the session falls back to the degraded mode.
pub trait ImmersiveSurface: Send {
    fn enter(&mut self) -> Result<()>;
    fn exit(&mut self);
}

/// Surface for environments with no fullscreen capability at all.
pub struct NoNativeSurface;

impl ImmersiveSurface for NoNativeSurface {
    fn enter(&mut self) -> Result<()> {
        anyhow::bail!("native fullscreen is not available on this surface")
    }

    fn exit(&mut self) {}
}

/// The closed set of navigation inputs. Platform event handlers are thin
/// adapters translating key/mouse/touch events into these.
#[derive(Debug, Clone)]
pub enum Command {
    Load { index: usize },
    NextPage { count: usize },
    PrevPage { count: usize },
    FirstPage,
    LastPage,
    SetFitMode { mode: FitMode },
    Zoom { delta: f32 },
    Pan { dx: f32, dy: f32 },
    ToggleOutline { show: Option<bool> },
    ToggleImmersive,
    ExitImmersive,
    DeepLink { token: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    RedrawNeeded,
    PositionChanged { index: usize },
    ImmersiveChanged { mode: ImmersiveMode },
    OutlineToggled { open: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanOutcome {
    Applied,
    /// Panning an unzoomed image does nothing; reported so callers can fall
    /// through to a page turn instead.
    NotApplied,
}

/// Extracts the 1-based page number from a deep-link fragment token such as
/// `page=12` (a leading `#` is tolerated).
pub fn deep_link_page(token: &str) -> Option<usize> {
    let token = token.trim().trim_start_matches('#');
    let page: usize = token.strip_prefix("page=")?.parse().ok()?;
    (page >= 1).then_some(page)
}

/// Merges the startup inputs into the initial state. Precedence, lowest to
/// highest: built-in defaults, config file, persisted state, deep link.
pub fn resolve_initial_state(
    config: &ViewerConfig,
    persisted: Option<PersistedViewerState>,
    deep_link: Option<usize>,
    page_count: usize,
) -> ViewerState {
    let mut state = ViewerState::default();
    if let Some(mode) = config.fit_mode {
        state.fit_mode = mode;
    }
    if let Some(open) = config.outline_open {
        state.outline_open = open;
    }

    if let Some(saved) = persisted {
        state.index = if saved.page < page_count { saved.page } else { 0 };
        state.zoom = saved.zoom.clamp(ZOOM_MIN, ZOOM_MAX);
        state.fit_mode = saved.fit_mode;
        state.pan_x = saved.translate_x;
        state.pan_y = saved.translate_y;
    }

    if let Some(page) = deep_link {
        if page >= 1 && page <= page_count {
            state.index = page - 1;
            state.zoom = 1.0;
            state.pan_x = 0.0;
            state.pan_y = 0.0;
        }
    }

    state
}

/// The single owner of the navigation state for one viewer session.
pub struct ViewerSession {
    model: Arc<DocumentModel>,
    backend: Arc<dyn PageBackend>,
    book: BookId,
    store: Arc<dyn StateStore>,
    surface: Box<dyn ImmersiveSurface>,
    pub state: ViewerState,
    reveal_until: Option<Instant>,
    render_cache: Mutex<HashMap<usize, RenderImage>>,
    events: Vec<SessionEvent>,
}

impl ViewerSession {
    pub fn new(
        model: Arc<DocumentModel>,
        backend: Arc<dyn PageBackend>,
        book: BookId,
        store: Arc<dyn StateStore>,
        surface: Box<dyn ImmersiveSurface>,
        state: ViewerState,
    ) -> Self {
        Self {
            model,
            backend,
            book,
            store,
            surface,
            state,
            reveal_until: None,
            render_cache: Mutex::new(HashMap::new()),
            events: Vec::new(),
        }
    }

    pub fn model(&self) -> &DocumentModel {
        &self.model
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn apply(&mut self, command: Command) {
        match command {
            Command::Load { index } => self.load(index),
            Command::NextPage { count } => {
                let last = self.model.page_count().saturating_sub(1);
                let next = self.state.index.saturating_add(count).min(last);
                if next != self.state.index {
                    self.load(next);
                }
            }
            Command::PrevPage { count } => {
                let next = self.state.index.saturating_sub(count);
                if next != self.state.index {
                    self.load(next);
                }
            }
            Command::FirstPage => {
                if self.state.index != 0 {
                    self.load(0);
                }
            }
            Command::LastPage => {
                let last = self.model.page_count().saturating_sub(1);
                if self.state.index != last {
                    self.load(last);
                }
            }
            Command::SetFitMode { mode } => self.set_fit_mode(mode),
            Command::Zoom { delta } => self.zoom(delta),
            Command::Pan { dx, dy } => {
                self.pan(dx, dy);
            }
            Command::ToggleOutline { show } => self.toggle_outline(show),
            Command::ToggleImmersive => self.toggle_immersive(),
            Command::ExitImmersive => {
                if self.state.immersive != ImmersiveMode::Off {
                    self.toggle_immersive();
                }
            }
            Command::DeepLink { token } => {
                if let Some(page) = deep_link_page(&token) {
                    self.load(page - 1);
                }
            }
        }
    }

    /// Moves to `index`, resetting the zoom/pan transform to identity.
    /// Out-of-range targets are ignored silently: all callers derive their
    /// indices from the model, and deep links may simply be stale.
    pub fn load(&mut self, index: usize) {
        if index >= self.model.page_count() {
            debug!(index, "ignoring out-of-range load");
            return;
        }
        self.state.index = index;
        self.state.zoom = 1.0;
        self.state.pan_x = 0.0;
        self.state.pan_y = 0.0;
        self.events.push(SessionEvent::PositionChanged { index });
        self.events.push(SessionEvent::RedrawNeeded);
        self.persist();
    }

    /// Fit-mode changes and zoom are mutually exclusive adjustments; the
    /// transform always resets to identity here.
    pub fn set_fit_mode(&mut self, mode: FitMode) {
        self.state.fit_mode = mode;
        self.state.zoom = 1.0;
        self.state.pan_x = 0.0;
        self.state.pan_y = 0.0;
        self.events.push(SessionEvent::RedrawNeeded);
        self.persist();
    }

    /// Additive zoom, clamped to `[ZOOM_MIN, ZOOM_MAX]`, layered on top of
    /// whichever fit mode is active.
    pub fn zoom(&mut self, delta: f32) {
        let next = (self.state.zoom + delta).clamp(ZOOM_MIN, ZOOM_MAX);
        if (next - self.state.zoom).abs() > f32::EPSILON {
            self.state.zoom = next;
            self.events.push(SessionEvent::RedrawNeeded);
            self.persist();
        }
    }

    pub fn pan(&mut self, dx: f32, dy: f32) -> PanOutcome {
        if self.state.zoom <= 1.0 {
            return PanOutcome::NotApplied;
        }
        self.state.pan_x += dx;
        self.state.pan_y += dy;
        self.events.push(SessionEvent::RedrawNeeded);
        self.persist();
        PanOutcome::Applied
    }

    /// Tri-state: `Some(true)` shows, `Some(false)` hides, `None` toggles.
    pub fn toggle_outline(&mut self, show: Option<bool>) {
        let open = show.unwrap_or(!self.state.outline_open);
        if open != self.state.outline_open {
            self.state.outline_open = open;
            self.events.push(SessionEvent::OutlineToggled { open });
            self.events.push(SessionEvent::RedrawNeeded);
        }
    }

    pub fn toggle_immersive(&mut self) {
        let mode = match self.state.immersive {
            ImmersiveMode::Off => match self.surface.enter() {
                Ok(()) => ImmersiveMode::Native,
                Err(err) => {
                    warn!(?err, "fullscreen request rejected, using degraded presentation");
                    ImmersiveMode::Degraded
                }
            },
            current => {
                if current == ImmersiveMode::Native {
                    self.surface.exit();
                }
                self.reveal_until = None;
                ImmersiveMode::Off
            }
        };
        self.state.immersive = mode;
        self.events.push(SessionEvent::ImmersiveChanged { mode });
        self.events.push(SessionEvent::RedrawNeeded);
    }

    /// The platform left native fullscreen on its own (window manager or
    /// terminal escape). Goes straight to `Off` and disarms the reveal.
    pub fn immersive_exited_externally(&mut self) {
        if self.state.immersive != ImmersiveMode::Native {
            return;
        }
        self.state.immersive = ImmersiveMode::Off;
        self.reveal_until = None;
        self.events.push(SessionEvent::ImmersiveChanged {
            mode: ImmersiveMode::Off,
        });
        self.events.push(SessionEvent::RedrawNeeded);
    }

    /// A tap on the page area while immersive arms the reveal window. A tap
    /// while already revealed replaces the deadline (restarting the window),
    /// never toggles chrome off early.
    pub fn tap(&mut self, now: Instant) {
        if self.state.immersive == ImmersiveMode::Off {
            return;
        }
        self.reveal_until = Some(now + REVEAL_WINDOW);
        self.events.push(SessionEvent::RedrawNeeded);
    }

    /// Expires the reveal deadline. There is only ever one outstanding
    /// deadline; re-arming replaced any previous one.
    pub fn tick(&mut self, now: Instant) {
        if let Some(deadline) = self.reveal_until {
            if now >= deadline {
                self.reveal_until = None;
                self.events.push(SessionEvent::RedrawNeeded);
            }
        }
    }

    pub fn chrome_visible(&self, now: Instant) -> bool {
        self.state.immersive == ImmersiveMode::Off
            || self.reveal_until.map_or(false, |deadline| now < deadline)
    }

    pub fn breadcrumb(&self) -> Breadcrumb {
        model::breadcrumb(&self.model, self.state.index)
    }

    pub fn outline_highlight(&self) -> OutlineHighlight {
        model::outline_highlight(&self.model, self.state.index)
    }

    /// Best-effort persistence after a transition; storage being unavailable
    /// must never block navigation.
    pub fn persist(&self) {
        let snapshot = PersistedViewerState {
            page: self.state.index,
            zoom: self.state.zoom,
            fit_mode: self.state.fit_mode,
            translate_x: self.state.pan_x,
            translate_y: self.state.pan_y,
        };
        if let Err(err) = self.store.save(&self.book, &snapshot) {
            warn!(?err, "failed to persist viewer state");
        }
    }

    pub fn render_current(&self) -> Result<RenderImage> {
        self.render_page(self.state.index)
    }

    fn render_page(&self, index: usize) -> Result<RenderImage> {
        if index >= self.model.page_count() {
            anyhow::bail!("page {index} out of range");
        }
        if let Some(image) = self.render_cache.lock().get(&index) {
            return Ok(image.clone());
        }
        let image = self.backend.render_page(RenderRequest { index })?;
        self.store_cached(index, &image);
        Ok(image)
    }

    fn store_cached(&self, index: usize, image: &RenderImage) {
        let mut cache = self.render_cache.lock();
        cache.insert(index, image.clone());
        if cache.len() > RENDER_CACHE_CAPACITY {
            let current = self.state.index;
            let mut keys: Vec<usize> = cache.keys().copied().collect();
            keys.sort_by_key(|k| k.abs_diff(current));
            for stale in keys.into_iter().skip(RENDER_CACHE_CAPACITY) {
                cache.remove(&stale);
            }
        }
    }

    pub fn prefetch_neighbors(&self, range: usize) -> Result<()> {
        if range == 0 {
            return Ok(());
        }
        let current = self.state.index;
        let mut last_error = None;
        for offset in 1..=range {
            if let Some(prev) = current.checked_sub(offset) {
                if let Err(err) = self.render_page(prev) {
                    last_error = Some(err);
                }
            }
            let next = current + offset;
            if next < self.model.page_count() {
                if let Err(err) = self.render_page(next) {
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use crate::model::BookManifest;
    use crate::refs::PageRef;
    use crate::store::{book_id_for_path, MemoryStateStore};
    use crate::PageBackend;

    struct FakeBackend {
        pages: usize,
    }

    impl PageBackend for FakeBackend {
        fn page_count(&self) -> usize {
            self.pages
        }

        fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
            Ok(RenderImage {
                width: 1,
                height: 1,
                pixels: vec![request.index as u8, 0, 0, 255],
            })
        }
    }

    struct AcceptingSurface;

    impl ImmersiveSurface for AcceptingSurface {
        fn enter(&mut self) -> Result<()> {
            Ok(())
        }

        fn exit(&mut self) {}
    }

    struct RejectingSurface;

    impl ImmersiveSurface for RejectingSurface {
        fn enter(&mut self) -> Result<()> {
            anyhow::bail!("denied")
        }

        fn exit(&mut self) {}
    }

    struct FailingStore;

    impl StateStore for FailingStore {
        fn load(&self, _book: &BookId) -> Result<Option<PersistedViewerState>> {
            anyhow::bail!("storage unavailable")
        }

        fn save(&self, _book: &BookId, _state: &PersistedViewerState) -> Result<()> {
            anyhow::bail!("storage unavailable")
        }
    }

    fn model_with_pages(count: usize) -> Arc<DocumentModel> {
        let pages: Vec<String> = (1..=count)
            .map(|p| format!("pages/1-01-{p:02}.webp"))
            .collect();
        let mut page_map = HashMap::new();
        for (i, _) in pages.iter().enumerate() {
            page_map.insert(PageRef::new(1, 1, (i + 1) as u32), i);
        }
        Arc::new(DocumentModel::new(BookManifest {
            pages,
            toc: None,
            page_map,
        }))
    }

    fn session_with(
        count: usize,
        store: Arc<dyn StateStore>,
        surface: Box<dyn ImmersiveSurface>,
    ) -> ViewerSession {
        let model = model_with_pages(count);
        let backend = Arc::new(FakeBackend { pages: count });
        ViewerSession::new(
            model,
            backend,
            book_id_for_path(std::path::Path::new("/tmp/folio-test-book")),
            store,
            surface,
            ViewerState::default(),
        )
    }

    fn basic_session(count: usize) -> ViewerSession {
        session_with(
            count,
            Arc::new(MemoryStateStore::new()),
            Box::new(NoNativeSurface),
        )
    }

    #[test]
    fn out_of_range_load_is_a_no_op() {
        let mut session = basic_session(50);
        session.apply(Command::Load { index: 10 });
        assert_eq!(session.state.index, 10);

        session.apply(Command::Load { index: 50 });
        assert_eq!(session.state.index, 10);
        session.apply(Command::Load { index: usize::MAX });
        assert_eq!(session.state.index, 10);
    }

    #[test]
    fn page_steps_clamp_without_resetting_the_transform_at_the_edge() {
        let mut session = basic_session(5);
        session.apply(Command::Zoom { delta: 1.0 });
        session.apply(Command::PrevPage { count: 1 });
        // Already at the first page: no load happened, the zoom survives.
        assert_eq!(session.state.index, 0);
        assert!((session.state.zoom - 2.0).abs() < f32::EPSILON);

        session.apply(Command::LastPage);
        assert_eq!(session.state.index, 4);
        session.apply(Command::Zoom { delta: 1.0 });
        session.apply(Command::NextPage { count: 3 });
        assert_eq!(session.state.index, 4);
        assert!((session.state.zoom - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn load_resets_zoom_and_pan() {
        let mut session = basic_session(5);
        session.apply(Command::Zoom { delta: 1.0 });
        let outcome = session.pan(10.0, -5.0);
        assert_eq!(outcome, PanOutcome::Applied);

        session.apply(Command::Load { index: 3 });
        assert!((session.state.zoom - 1.0).abs() < f32::EPSILON);
        assert_eq!(session.state.pan_x, 0.0);
        assert_eq!(session.state.pan_y, 0.0);
    }

    #[test]
    fn zoom_is_additive_and_clamped() {
        let mut session = basic_session(5);
        for _ in 0..4 {
            session.apply(Command::Zoom { delta: 0.15 });
        }
        assert!((session.state.zoom - 1.6).abs() < 1e-5);

        session.state.zoom = 4.95;
        session.apply(Command::Zoom { delta: 0.15 });
        assert_eq!(session.state.zoom, ZOOM_MAX);

        session.state.zoom = 0.3;
        session.apply(Command::Zoom { delta: -0.15 });
        assert_eq!(session.state.zoom, ZOOM_MIN);
    }

    #[test]
    fn pan_reports_not_applied_at_identity_zoom() {
        let mut session = basic_session(5);
        assert_eq!(session.pan(50.0, 0.0), PanOutcome::NotApplied);
        assert_eq!(session.state.pan_x, 0.0);

        session.apply(Command::Zoom { delta: 1.0 });
        assert_eq!(session.pan(50.0, 0.0), PanOutcome::Applied);
        assert!((session.state.pan_x - 50.0).abs() < f32::EPSILON);
    }

    #[test]
    fn fit_mode_change_resets_the_transform() {
        let mut session = basic_session(5);
        session.apply(Command::Zoom { delta: 2.0 });
        session.pan(10.0, 10.0);

        session.apply(Command::SetFitMode {
            mode: FitMode::Width,
        });
        assert_eq!(session.state.fit_mode, FitMode::Width);
        assert!((session.state.zoom - 1.0).abs() < f32::EPSILON);
        assert_eq!(session.state.pan_x, 0.0);
    }

    #[test]
    fn outline_toggle_is_tri_state() {
        let mut session = basic_session(5);
        session.apply(Command::ToggleOutline { show: None });
        assert!(session.state.outline_open);
        session.apply(Command::ToggleOutline { show: Some(true) });
        assert!(session.state.outline_open);
        session.apply(Command::ToggleOutline { show: Some(false) });
        assert!(!session.state.outline_open);
        session.apply(Command::ToggleOutline { show: None });
        assert!(session.state.outline_open);
    }

    #[test]
    fn immersive_uses_native_when_the_surface_accepts() {
        let mut session = session_with(
            5,
            Arc::new(MemoryStateStore::new()),
            Box::new(AcceptingSurface),
        );
        session.apply(Command::ToggleImmersive);
        assert_eq!(session.state.immersive, ImmersiveMode::Native);
        session.apply(Command::ToggleImmersive);
        assert_eq!(session.state.immersive, ImmersiveMode::Off);
    }

    #[test]
    fn rejected_fullscreen_falls_back_to_degraded() {
        let mut session = session_with(
            5,
            Arc::new(MemoryStateStore::new()),
            Box::new(RejectingSurface),
        );
        session.apply(Command::ToggleImmersive);
        assert_eq!(session.state.immersive, ImmersiveMode::Degraded);
        session.apply(Command::ToggleImmersive);
        assert_eq!(session.state.immersive, ImmersiveMode::Off);
    }

    #[test]
    fn tap_arms_and_rearms_the_reveal_window() {
        let mut session = session_with(
            5,
            Arc::new(MemoryStateStore::new()),
            Box::new(AcceptingSurface),
        );
        let t0 = Instant::now();
        assert!(session.chrome_visible(t0));

        session.apply(Command::ToggleImmersive);
        assert!(!session.chrome_visible(t0));

        session.tap(t0);
        assert!(session.chrome_visible(t0 + Duration::from_secs(2)));

        // A second tap restarts the window instead of toggling it off.
        session.tap(t0 + Duration::from_secs(2));
        assert!(session.chrome_visible(t0 + Duration::from_millis(4500)));
        assert!(!session.chrome_visible(t0 + Duration::from_millis(5500)));

        session.tick(t0 + Duration::from_secs(6));
        assert!(!session.chrome_visible(t0 + Duration::from_secs(6)));
    }

    #[test]
    fn tap_outside_immersive_mode_does_nothing() {
        let mut session = basic_session(5);
        let t0 = Instant::now();
        session.tap(t0);
        assert!(session.chrome_visible(t0));
        assert!(session.take_events().is_empty());
    }

    #[test]
    fn external_exit_clears_the_reveal_window() {
        let mut session = session_with(
            5,
            Arc::new(MemoryStateStore::new()),
            Box::new(AcceptingSurface),
        );
        let t0 = Instant::now();
        session.apply(Command::ToggleImmersive);
        session.tap(t0);

        session.immersive_exited_externally();
        assert_eq!(session.state.immersive, ImmersiveMode::Off);
        // Chrome is governed by the off state again, not by the old deadline.
        assert!(session.chrome_visible(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn persistence_failures_never_block_transitions() {
        let mut session = session_with(5, Arc::new(FailingStore), Box::new(NoNativeSurface));
        session.apply(Command::Load { index: 3 });
        assert_eq!(session.state.index, 3);
        session.apply(Command::Zoom { delta: 0.5 });
        assert!((session.state.zoom - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn transitions_persist_the_full_blob() {
        let store = Arc::new(MemoryStateStore::new());
        let book = book_id_for_path(std::path::Path::new("/tmp/folio-test-book"));
        let mut session = session_with(5, store.clone(), Box::new(NoNativeSurface));

        session.apply(Command::Load { index: 2 });
        session.apply(Command::Zoom { delta: 0.5 });

        let saved = store.load(&book).unwrap().unwrap();
        assert_eq!(saved.page, 2);
        assert!((saved.zoom - 1.5).abs() < f32::EPSILON);
        assert_eq!(saved.fit_mode, FitMode::Height);
    }

    #[test]
    fn deep_link_tokens_parse_and_apply() {
        assert_eq!(deep_link_page("page=12"), Some(12));
        assert_eq!(deep_link_page("#page=3"), Some(3));
        assert_eq!(deep_link_page("page=0"), None);
        assert_eq!(deep_link_page("page="), None);
        assert_eq!(deep_link_page("page=three"), None);
        assert_eq!(deep_link_page("chapter=3"), None);

        let mut session = basic_session(5);
        session.apply(Command::DeepLink {
            token: "page=4".to_string(),
        });
        assert_eq!(session.state.index, 3);

        // Out of range: ignored, never a user-visible failure.
        session.apply(Command::DeepLink {
            token: "page=9".to_string(),
        });
        assert_eq!(session.state.index, 3);
    }

    #[test]
    fn initial_state_precedence_is_config_then_persisted_then_deep_link() {
        let config = ViewerConfig {
            fit_mode: Some(FitMode::Width),
            outline_open: Some(true),
            ..ViewerConfig::default()
        };

        let from_config = resolve_initial_state(&config, None, None, 50);
        assert_eq!(from_config.fit_mode, FitMode::Width);
        assert!(from_config.outline_open);
        assert_eq!(from_config.index, 0);

        let persisted = PersistedViewerState {
            page: 7,
            zoom: 2.0,
            fit_mode: FitMode::Height,
            translate_x: 5.0,
            translate_y: -5.0,
        };
        let from_persisted = resolve_initial_state(&config, Some(persisted.clone()), None, 50);
        assert_eq!(from_persisted.index, 7);
        assert_eq!(from_persisted.fit_mode, FitMode::Height);
        assert!((from_persisted.zoom - 2.0).abs() < f32::EPSILON);

        let from_link = resolve_initial_state(&config, Some(persisted.clone()), Some(20), 50);
        assert_eq!(from_link.index, 19);
        assert!((from_link.zoom - 1.0).abs() < f32::EPSILON);

        // An out-of-range link leaves the persisted position in charge.
        let stale_link = resolve_initial_state(&config, Some(persisted.clone()), Some(51), 50);
        assert_eq!(stale_link.index, 7);

        // A persisted page beyond a shrunken catalog falls back to zero.
        let shrunk = resolve_initial_state(&config, Some(persisted), None, 5);
        assert_eq!(shrunk.index, 0);
    }

    #[test]
    fn render_cache_serves_neighbors_after_prefetch() {
        let session = basic_session(10);
        session.prefetch_neighbors(2).unwrap();
        let image = session.render_current().unwrap();
        assert_eq!(image.pixels[0], 0);
        assert_eq!(session.render_cache.lock().len(), 3);
    }

    #[test]
    fn load_emits_position_and_redraw_events() {
        let mut session = basic_session(5);
        session.take_events();
        session.apply(Command::Load { index: 2 });
        let events = session.take_events();
        assert!(events.contains(&SessionEvent::PositionChanged { index: 2 }));
        assert!(events.contains(&SessionEvent::RedrawNeeded));
    }
}
