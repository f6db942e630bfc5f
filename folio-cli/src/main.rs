use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::cursor;
use crossterm::event;
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use folio_core::{
    assemble, book_id_for_path, deep_link_page, load_outline, read_manifest, resolve_initial_state,
    scan_book_dir, write_manifest, CatalogError, Chapter, Command, DocumentModel, FileStateStore,
    FitMode, ImmersiveMode, ImmersiveSurface, NoNativeSurface, PageProvider, PanOutcome,
    RenderImage, SessionEvent, StateStore, ViewerConfig, ViewerSession, ViewerState,
};
use folio_render::ImageRenderFactory;
use folio_tty::{
    write_status_line, ArrowDirection, DrawParams, EventMapper, InputMode, KittyRenderer, UiEvent,
};
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "folio",
    version,
    about = "viewer for captured page-image books"
)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Scan a book directory and write the viewer manifest
    Build {
        /// Directory containing the page images and outline
        dir: PathBuf,
    },
    /// Open a built book in the interactive viewer
    View {
        dir: PathBuf,
        /// 1-based page to open on, overriding saved state
        #[arg(short = 'p', long = "page")]
        page: Option<usize>,
        /// Deep-link token, e.g. "page=12"
        #[arg(long = "at")]
        at: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Cmd::Build { dir } => build(&dir),
        Cmd::View { dir, page, at } => view(dir, page, at).await,
    }
}

fn build(dir: &Path) -> Result<()> {
    let catalog = match scan_book_dir(dir) {
        Ok(catalog) => catalog,
        Err(CatalogError::NoImages { checked }) => {
            eprintln!("No eligible images found in {}", dir.display());
            eprintln!(
                "  Checked: {}",
                checked
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            bail!("nothing to build");
        }
        Err(err) => return Err(err.into()),
    };

    let outline = load_outline(dir);
    let outline_summary = match &outline {
        Some((chapters, source)) => {
            let sections: usize = chapters.iter().map(|c| c.sections.len()).sum();
            let with_objectives = chapters
                .iter()
                .flat_map(|c| &c.sections)
                .filter(|s| s.objectives.is_some())
                .count();
            format!(
                "{} ({} chapters, {} sections, {} with objectives)",
                source.file_name(),
                chapters.len(),
                sections,
                with_objectives
            )
        }
        None => "none".to_string(),
    };

    let image_count = catalog.pages.len();
    let source_name = catalog
        .source_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(".")
        .to_string();
    let manifest = assemble(catalog, outline.map(|(chapters, _)| chapters));
    let path = write_manifest(dir, &manifest)?;

    println!("folio build");
    println!("  Folder:  {}", dir.display());
    println!("  Images:  {} (from {}/)", image_count, source_name);
    println!("  Outline: {}", outline_summary);
    println!("  PageMap: {} refs", manifest.page_map.len());
    println!(
        "  Output:  {}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("?")
    );
    Ok(())
}

async fn view(dir: PathBuf, page: Option<usize>, at: Option<String>) -> Result<()> {
    let manifest = read_manifest(&dir).with_context(|| {
        format!(
            "no viewer manifest in {}; run `folio build` there first",
            dir.display()
        )
    })?;
    if manifest.pages.is_empty() {
        bail!("the manifest in {} lists no pages", dir.display());
    }

    let project_dirs = ProjectDirs::from("net", "folio", "folio")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config = ViewerConfig::load_default(&project_dirs);
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(
        project_dirs.data_local_dir().join("state"),
    )?);
    let book = book_id_for_path(&dir);
    let persisted = store.load(&book).unwrap_or_else(|err| {
        warn!(?err, "ignoring unreadable persisted state");
        None
    });

    let deep_link = page.or_else(|| at.as_deref().and_then(deep_link_page));
    let model = Arc::new(DocumentModel::new(manifest));
    let initial = resolve_initial_state(&config, persisted, deep_link, model.page_count());

    let provider = ImageRenderFactory::new();
    let backend = provider
        .open(&dir, model.manifest())
        .await
        .with_context(|| format!("failed to open {}", dir.display()))?;

    let surface = probe_surface();
    let mut session = ViewerSession::new(model, backend, book, store, surface, initial);

    run_viewer(&mut session, &config)
}

/// Picks the fullscreen capability once at startup. Terminals advertising
/// xterm-style window ops get the real thing; everything else degrades to
/// the in-window clean presentation.
fn probe_surface() -> Box<dyn ImmersiveSurface> {
    let term = std::env::var("TERM").unwrap_or_default();
    if std::env::var_os("KITTY_WINDOW_ID").is_some()
        || term.contains("kitty")
        || term.contains("xterm")
    {
        Box::new(WindowOpSurface)
    } else {
        Box::new(NoNativeSurface)
    }
}

/// Requests fullscreen via the xterm window manipulation sequence.
struct WindowOpSurface;

impl ImmersiveSurface for WindowOpSurface {
    fn enter(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        write!(stdout, "\u{1b}[10;1t")?;
        stdout.flush()?;
        Ok(())
    }

    fn exit(&mut self) {
        let mut stdout = io::stdout();
        let _ = write!(stdout, "\u{1b}[10;0t");
        let _ = stdout.flush();
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, cursor::Hide, event::EnableMouseCapture)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, event::DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

enum LoopAction {
    Continue,
    Redraw,
    Quit,
}

/// View-layer state that is not navigation state: the sidebar widget and the
/// vertical scroll position used by width-fit mode.
struct ViewerChrome {
    panel: OutlinePanel,
    scroll: f32,
}

fn run_viewer(session: &mut ViewerSession, config: &ViewerConfig) -> Result<()> {
    let _raw = RawModeGuard::new()?;
    let mut renderer = KittyRenderer::new(io::stdout());
    let mut mapper = EventMapper::new();
    let chapters = session
        .model()
        .outline()
        .map(|chapters| chapters.to_vec())
        .unwrap_or_default();
    let mut chrome = ViewerChrome {
        panel: OutlinePanel::new(chapters),
        scroll: 0.0,
    };
    chrome.panel.sync_to(session);

    let mut dirty = true;
    let mut needs_clear = true;

    loop {
        let panel_active = session.state.outline_open;
        if panel_active && mapper.mode() != InputMode::Outline {
            mapper.set_mode(InputMode::Outline);
        } else if !panel_active && mapper.mode() == InputMode::Outline {
            mapper.set_mode(InputMode::Normal);
        }

        if dirty {
            if needs_clear {
                renderer.clear_all()?;
                needs_clear = false;
            }
            redraw(
                &mut renderer,
                session,
                &mut chrome,
                mapper.pending_input().as_deref(),
            )?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ev = event::read()?;
            match handle_event(mapper.map_event(ev), session, &mut chrome, config)? {
                LoopAction::Quit => break,
                LoopAction::Redraw => dirty = true,
                LoopAction::Continue => {}
            }
        }

        session.tick(Instant::now());
        let events = session.take_events();
        if !events.is_empty() {
            dirty = true;
            for event in &events {
                match event {
                    SessionEvent::PositionChanged { .. } => {
                        chrome.scroll = 0.0;
                        chrome.panel.sync_to(session);
                        needs_clear = true;
                    }
                    SessionEvent::OutlineToggled { .. } | SessionEvent::ImmersiveChanged { .. } => {
                        needs_clear = true;
                    }
                    SessionEvent::RedrawNeeded => {}
                }
            }
        }
    }

    renderer.clear_all()?;
    session.persist();
    Ok(())
}

fn handle_event(
    event: UiEvent,
    session: &mut ViewerSession,
    chrome: &mut ViewerChrome,
    config: &ViewerConfig,
) -> Result<LoopAction> {
    match event {
        UiEvent::Command(command) => {
            if matches!(command, Command::SetFitMode { .. }) {
                chrome.scroll = 0.0;
            }
            session.apply(command);
            Ok(LoopAction::Continue)
        }
        UiEvent::Arrow {
            direction,
            count,
            forced,
        } => Ok(handle_arrow(session, chrome, direction, count, forced, config.pan_step())),
        UiEvent::ZoomIn => {
            session.apply(Command::Zoom {
                delta: config.zoom_step(),
            });
            Ok(LoopAction::Continue)
        }
        UiEvent::ZoomOut => {
            session.apply(Command::Zoom {
                delta: -config.zoom_step(),
            });
            Ok(LoopAction::Continue)
        }
        UiEvent::ToggleImmersive => {
            session.apply(Command::ToggleImmersive);
            Ok(LoopAction::Continue)
        }
        UiEvent::Escape => {
            if session.state.immersive != ImmersiveMode::Off {
                session.apply(Command::ExitImmersive);
            }
            Ok(LoopAction::Continue)
        }
        UiEvent::Tap => {
            session.tap(Instant::now());
            Ok(LoopAction::Continue)
        }
        UiEvent::CopyLink => {
            copy_link(session);
            Ok(LoopAction::Continue)
        }
        UiEvent::OpenOutline => {
            chrome.panel.sync_to(session);
            session.apply(Command::ToggleOutline { show: Some(true) });
            Ok(LoopAction::Continue)
        }
        UiEvent::CloseOverlay => {
            session.apply(Command::ToggleOutline { show: Some(false) });
            Ok(LoopAction::Continue)
        }
        UiEvent::OutlineMove { delta } => {
            if chrome.panel.move_selection(delta) {
                Ok(LoopAction::Redraw)
            } else {
                Ok(LoopAction::Continue)
            }
        }
        UiEvent::OutlineActivate => {
            if let Some(target) = chrome.panel.activate(session.model()) {
                session.apply(Command::Load { index: target });
                session.apply(Command::ToggleOutline { show: Some(false) });
            }
            Ok(LoopAction::Redraw)
        }
        UiEvent::Quit => Ok(LoopAction::Quit),
        UiEvent::None => Ok(LoopAction::Continue),
    }
}

/// Arrows pan when zoomed; otherwise horizontal arrows turn the page and
/// vertical ones scroll in width-fit mode. Ctrl always turns the page.
fn handle_arrow(
    session: &mut ViewerSession,
    chrome: &mut ViewerChrome,
    direction: ArrowDirection,
    count: usize,
    forced: bool,
    pan_step: f32,
) -> LoopAction {
    if forced {
        match direction {
            ArrowDirection::Left => session.apply(Command::PrevPage { count }),
            ArrowDirection::Right => session.apply(Command::NextPage { count }),
            ArrowDirection::Up | ArrowDirection::Down => {}
        }
        return LoopAction::Continue;
    }

    let steps = count as f32;
    let (dx, dy) = match direction {
        ArrowDirection::Left => (pan_step, 0.0),
        ArrowDirection::Right => (-pan_step, 0.0),
        ArrowDirection::Up => (0.0, pan_step),
        ArrowDirection::Down => (0.0, -pan_step),
    };
    if session.pan(dx * steps, dy * steps) == PanOutcome::Applied {
        return LoopAction::Continue;
    }

    match direction {
        ArrowDirection::Left => session.apply(Command::PrevPage { count }),
        ArrowDirection::Right => session.apply(Command::NextPage { count }),
        ArrowDirection::Up | ArrowDirection::Down if session.state.fit_mode == FitMode::Width => {
            let delta = if direction == ArrowDirection::Up { -0.25 } else { 0.25 };
            let next = (chrome.scroll + delta * steps).clamp(0.0, 1.0);
            if (next - chrome.scroll).abs() > f32::EPSILON {
                chrome.scroll = next;
                return LoopAction::Redraw;
            }
        }
        _ => {}
    }
    LoopAction::Continue
}

fn copy_link(session: &ViewerSession) {
    let token = format!("page={}", session.state.index + 1);
    match arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(token.clone())) {
        Ok(()) => debug!(token = %token, "copied deep link"),
        Err(err) => warn!(?err, "failed to copy deep link"),
    }
}

fn redraw(
    renderer: &mut KittyRenderer<io::Stdout>,
    session: &ViewerSession,
    chrome: &mut ViewerChrome,
    pending_input: Option<&str>,
) -> Result<()> {
    let window = terminal::window_size()?;
    let total_cols = u32::from(window.columns).max(1);
    let total_rows = u32::from(window.rows).max(1);
    let (cell_w, cell_h) = cell_metrics(
        u32::from(window.width),
        u32::from(window.height),
        total_cols,
        total_rows,
    );

    let now = Instant::now();
    let chrome_visible = session.chrome_visible(now);
    let image_rows = if chrome_visible {
        total_rows.saturating_sub(1).max(1)
    } else {
        total_rows
    };

    let base = session.render_current()?;
    let zoomed = if session.state.zoom > 1.0 {
        crop_for_zoom(&base, session.state)
    } else {
        base
    };

    let margin_cols = total_cols.min(2);
    let available_cols = total_cols.saturating_sub(margin_cols).max(1);
    let available_rows = image_rows.saturating_sub(1).max(1);

    let (view, cols, rows, start_row) = match session.state.fit_mode {
        FitMode::Height => {
            let (cols, rows) = aspect_fit(&zoomed, available_cols, available_rows, cell_w, cell_h);
            let start_row = (image_rows.saturating_sub(rows)) / 2;
            (zoomed, cols, rows, start_row)
        }
        FitMode::Width => {
            let cols = available_cols;
            let rows_needed = rows_for_width(&zoomed, cols, cell_w, cell_h);
            if rows_needed > available_rows {
                let visible = available_rows as f32 / rows_needed as f32;
                let crop_h = ((zoomed.height as f32) * visible).round().max(1.0) as u32;
                let max_origin = zoomed.height.saturating_sub(crop_h);
                let origin_y = ((max_origin as f32) * chrome.scroll)
                    .round()
                    .clamp(0.0, max_origin as f32) as u32;
                let view = crop_image(&zoomed, 0, origin_y, zoomed.width, crop_h);
                (view, cols, available_rows, 0)
            } else {
                (zoomed, cols, rows_needed.min(available_rows), 0)
            }
        }
    };
    let start_col = (total_cols.saturating_sub(cols)) / 2;

    {
        let writer = renderer.writer();
        crossterm::execute!(writer, cursor::MoveTo(start_col as u16, start_row as u16))?;
    }
    renderer.draw(&view, DrawParams::clamped(cols, rows))?;

    if chrome_visible {
        let status = combine_status(format_status(session), pending_input);
        draw_status_line(renderer, &status, total_rows)?;
        if session.state.outline_open {
            draw_outline_panel(renderer, &mut chrome.panel, total_cols, image_rows)?;
        }
    }

    if let Err(err) = session.prefetch_neighbors(2) {
        warn!(?err, index = session.state.index, "failed to prefetch neighboring pages");
    }

    Ok(())
}

fn cell_metrics(pixel_width: u32, pixel_height: u32, cols: u32, rows: u32) -> (f32, f32) {
    if pixel_width > 0 && pixel_height > 0 && cols > 0 && rows > 0 {
        (
            pixel_width as f32 / cols as f32,
            pixel_height as f32 / rows as f32,
        )
    } else {
        // The terminal did not report a pixel size; assume a common glyph cell.
        (8.0, 16.0)
    }
}

fn aspect_fit(
    image: &RenderImage,
    available_cols: u32,
    available_rows: u32,
    cell_w: f32,
    cell_h: f32,
) -> (u32, u32) {
    if image.width == 0 || image.height == 0 {
        return (1, 1);
    }
    let max_w = available_cols as f32 * cell_w;
    let max_h = available_rows as f32 * cell_h;
    let scale = (max_w / image.width as f32).min(max_h / image.height as f32);
    let cols = ((image.width as f32 * scale) / cell_w).floor().max(1.0) as u32;
    let rows = ((image.height as f32 * scale) / cell_h).floor().max(1.0) as u32;
    (cols.min(available_cols), rows.min(available_rows))
}

fn rows_for_width(image: &RenderImage, cols: u32, cell_w: f32, cell_h: f32) -> u32 {
    if image.width == 0 {
        return 1;
    }
    let display_w = cols as f32 * cell_w;
    let scale = display_w / image.width as f32;
    ((image.height as f32 * scale) / cell_h).ceil().max(1.0) as u32
}

fn crop_for_zoom(image: &RenderImage, state: ViewerState) -> RenderImage {
    let ratio = (1.0 / state.zoom).clamp(0.0, 1.0);
    let crop_w = ((image.width as f32) * ratio)
        .round()
        .clamp(1.0, image.width as f32) as u32;
    let crop_h = ((image.height as f32) * ratio)
        .round()
        .clamp(1.0, image.height as f32) as u32;
    if crop_w >= image.width && crop_h >= image.height {
        return image.clone();
    }
    let origin_x = pan_origin(image.width, crop_w, -state.pan_x);
    let origin_y = pan_origin(image.height, crop_h, -state.pan_y);
    crop_image(image, origin_x, origin_y, crop_w, crop_h)
}

/// Viewport origin along one axis: centered, shifted by the pan offset in
/// source pixels. A positive translate moves the image, so the viewport
/// moves the other way.
fn pan_origin(total: u32, window: u32, offset: f32) -> u32 {
    let max_origin = total.saturating_sub(window);
    let centered = max_origin as f32 / 2.0;
    (centered + offset).round().clamp(0.0, max_origin as f32) as u32
}

fn crop_image(
    image: &RenderImage,
    origin_x: u32,
    origin_y: u32,
    width: u32,
    height: u32,
) -> RenderImage {
    if image.width == 0 || image.height == 0 {
        return RenderImage {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        };
    }

    let width = width.min(image.width).max(1);
    let height = height.min(image.height).max(1);
    let origin_x = origin_x.min(image.width - width);
    let origin_y = origin_y.min(image.height - height);

    let stride = image.width as usize * 4;
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for row in 0..height {
        let src_y = (origin_y + row) as usize;
        let start = src_y * stride + origin_x as usize * 4;
        let end = start + width as usize * 4;
        pixels.extend_from_slice(&image.pixels[start..end]);
    }

    RenderImage {
        width,
        height,
        pixels,
    }
}

fn format_status(session: &ViewerSession) -> String {
    let crumb = session.breadcrumb();
    let mut status = String::new();
    if let Some(chapter) = &crumb.chapter {
        status.push_str(&chapter.label);
        status.push_str(" — ");
    }
    status.push_str(&crumb.page_label);
    status.push(' ');
    status.push_str(&crumb.total_label);
    status.push_str(&format!(" — {:.0}%", session.state.zoom * 100.0));
    match session.state.immersive {
        ImmersiveMode::Off => {}
        ImmersiveMode::Native => status.push_str(" — fullscreen"),
        ImmersiveMode::Degraded => status.push_str(" — clean"),
    }
    status
}

fn combine_status(base: String, pending_input: Option<&str>) -> String {
    match pending_input.filter(|s| !s.is_empty()) {
        Some(pending) => format!("{base} | {pending}"),
        None => base,
    }
}

fn draw_status_line(
    renderer: &mut KittyRenderer<io::Stdout>,
    status: &str,
    total_rows: u32,
) -> Result<()> {
    let status_row = total_rows.saturating_sub(1);
    let writer = renderer.writer();
    crossterm::execute!(
        writer,
        cursor::MoveTo(0, status_row as u16),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(writer, status)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PanelRow {
    Chapter(usize),
    Section(usize, usize),
}

/// The collapsible outline sidebar. At most one chapter is expanded at a
/// time; following the current page keeps the active section marked.
struct OutlinePanel {
    chapters: Vec<Chapter>,
    open: Option<usize>,
    active_section: Option<(usize, usize)>,
    selected: usize,
    scroll_offset: usize,
}

impl OutlinePanel {
    fn new(chapters: Vec<Chapter>) -> Self {
        Self {
            chapters,
            open: None,
            active_section: None,
            selected: 0,
            scroll_offset: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    fn rows(&self) -> Vec<PanelRow> {
        let mut rows = Vec::new();
        for (ci, chapter) in self.chapters.iter().enumerate() {
            rows.push(PanelRow::Chapter(ci));
            if self.open == Some(ci) {
                for si in 0..chapter.sections.len() {
                    rows.push(PanelRow::Section(ci, si));
                }
            }
        }
        rows
    }

    /// Expands the chapter for the current page (collapsing any other) and
    /// moves the selection to the highlighted entry.
    fn sync_to(&mut self, session: &ViewerSession) {
        let highlight = session.outline_highlight();
        self.open = highlight
            .chapter
            .and_then(|key| self.chapters.iter().position(|c| c.key == key));
        self.active_section = match (self.open, highlight.section) {
            (Some(ci), Some(si)) => Some((ci, si)),
            _ => None,
        };
        let rows = self.rows();
        let target = match self.active_section {
            Some((ci, si)) => rows.iter().position(|row| *row == PanelRow::Section(ci, si)),
            None => self
                .open
                .and_then(|ci| rows.iter().position(|row| *row == PanelRow::Chapter(ci))),
        };
        self.selected = target.unwrap_or(0);
    }

    fn move_selection(&mut self, delta: isize) -> bool {
        let rows = self.rows();
        if rows.is_empty() {
            return false;
        }
        let len = rows.len() as isize;
        let next = (self.selected as isize + delta).clamp(0, len - 1) as usize;
        if next != self.selected {
            self.selected = next;
            true
        } else {
            false
        }
    }

    /// The page index to jump to for the selected entry. Activating a
    /// chapter also expands it, collapsing whichever was open.
    fn activate(&mut self, model: &DocumentModel) -> Option<usize> {
        match *self.rows().get(self.selected)? {
            PanelRow::Chapter(ci) => {
                self.open = Some(ci);
                Some(model.resolve(self.chapters[ci].toc))
            }
            PanelRow::Section(ci, si) => Some(model.resolve(self.chapters[ci].sections[si].page)),
        }
    }

    fn ensure_visible(&mut self, viewport_height: usize, row_count: usize) {
        if viewport_height == 0 || row_count == 0 {
            self.scroll_offset = 0;
            return;
        }
        let max_offset = row_count.saturating_sub(viewport_height);
        if self.scroll_offset > max_offset {
            self.scroll_offset = max_offset;
        }
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
            return;
        }
        let bottom = self.scroll_offset + viewport_height;
        if self.selected >= bottom {
            self.scroll_offset = self
                .selected
                .saturating_sub(viewport_height.saturating_sub(1));
        }
    }
}

fn draw_outline_panel(
    renderer: &mut KittyRenderer<io::Stdout>,
    panel: &mut OutlinePanel,
    total_cols: u32,
    rows_available: u32,
) -> Result<()> {
    const TITLE: &str = "Contents";
    const EMPTY_MESSAGE: &str = "No outline available";

    if total_cols < 24 || rows_available < 4 {
        return Ok(());
    }
    let inner_width = ((total_cols / 3) as usize).clamp(20, 40);
    let content_height = rows_available.saturating_sub(1) as usize;

    let rows = panel.rows();
    panel.ensure_visible(content_height, rows.len());

    let writer = renderer.writer();
    print_panel_line(writer, 0, true, &pad_line(format!(" {TITLE}"), inner_width))?;

    if panel.is_empty() {
        print_panel_line(writer, 1, false, &pad_line(format!(" {EMPTY_MESSAGE}"), inner_width))?;
        return Ok(());
    }

    let start = panel.scroll_offset;
    let end = (start + content_height).min(rows.len());
    for (line, row_index) in (start..end).enumerate() {
        let row = rows[row_index];
        let selected = row_index == panel.selected;
        let text = match row {
            PanelRow::Chapter(ci) => {
                let chapter = &panel.chapters[ci];
                let marker = if panel.open == Some(ci) { '▾' } else { '▸' };
                format!(" {} {}. {}", marker, chapter.number, chapter.name)
            }
            PanelRow::Section(ci, si) => {
                let section = &panel.chapters[ci].sections[si];
                let marker = if panel.active_section == Some((ci, si)) {
                    '•'
                } else {
                    ' '
                };
                format!("   {} {}", marker, section.name)
            }
        };
        print_panel_line(
            writer,
            (line + 1) as u16,
            selected,
            &pad_line(text, inner_width),
        )?;
    }

    Ok(())
}

fn print_panel_line(
    writer: &mut impl Write,
    row: u16,
    inverted: bool,
    content: &str,
) -> Result<()> {
    if inverted {
        crossterm::execute!(
            writer,
            cursor::MoveTo(0, row),
            SetAttribute(Attribute::Reverse),
            Print(content),
            SetAttribute(Attribute::Reset)
        )?;
    } else {
        crossterm::execute!(writer, cursor::MoveTo(0, row), Print(content))?;
    }
    Ok(())
}

fn pad_line(mut text: String, width: usize) -> String {
    let length = text.chars().count();
    if length > width {
        if width <= 3 {
            text = text.chars().take(width).collect();
        } else {
            let mut truncated: String = text.chars().take(width - 3).collect();
            truncated.push_str("...");
            text = truncated;
        }
    }
    let length = text.chars().count();
    if length < width {
        text.push_str(&" ".repeat(width - length));
    }
    text
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "folio.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // File only: the console belongs to the viewer.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
