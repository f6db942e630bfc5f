use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind},
    terminal::{Clear, ClearType},
};
use folio_core::{Command, FitMode, RenderImage};
use png::{BitDepth, ColorType, Encoder};

/// Draws RGBA frames over the kitty graphics protocol.
pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `image` as PNG and places it over `columns x rows` cells at
    /// the current cursor position. The previous frame with the same id is
    /// deleted first so page turns never stack placements.
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=i,i={},q=2\u{1b}\\", self.image_id)?;

        let mut buffer = Vec::new();
        {
            let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
            encoder.set_color(ColorType::Rgba);
            encoder.set_depth(BitDepth::Eight);
            let mut png_writer = encoder.write_header()?;
            png_writer.write_image_data(&image.pixels)?;
            png_writer.finish()?;
        }

        let payload = BASE64.encode(&buffer);
        let mut chunks = payload.as_bytes().chunks(4096).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let more = if chunks.peek().is_some() { 1 } else { 0 };
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,q=2,i={},c={},r={},m={}",
                    self.image_id, params.columns, params.rows, more
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", more)?;
            }
            self.writer.write_all(b";")?;
            self.writer.write_all(chunk)?;
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(&mut self.writer, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
        Ok(())
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowDirection {
    Left,
    Right,
    Up,
    Down,
}

/// What the terminal input means to the viewer. Arrow keys are reported as
/// such because their meaning depends on navigation state the mapper cannot
/// see: they pan when zoomed and turn or scroll pages when not, unless
/// `forced` (Ctrl held), which always turns the page.
#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(Command),
    Arrow {
        direction: ArrowDirection,
        count: usize,
        forced: bool,
    },
    ZoomIn,
    ZoomOut,
    ToggleImmersive,
    Escape,
    Tap,
    CopyLink,
    OpenOutline,
    CloseOverlay,
    OutlineMove { delta: isize },
    OutlineActivate,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Outline,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    mode: InputMode,
    pending_count: Option<usize>,
    pending_digits: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.mode = mode;
        }
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::Outline => self.map_event_outline(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                    if let Some(digit) = c.to_digit(10) {
                        self.push_digit(digit as usize);
                    }
                    UiEvent::None
                }
                (KeyCode::Left, modifiers) => self.arrow(ArrowDirection::Left, modifiers),
                (KeyCode::Right, modifiers) => self.arrow(ArrowDirection::Right, modifiers),
                (KeyCode::Up, modifiers) => self.arrow(ArrowDirection::Up, modifiers),
                (KeyCode::Down, modifiers) => self.arrow(ArrowDirection::Down, modifiers),
                (KeyCode::PageUp, _) => {
                    let count = self.take_count();
                    UiEvent::Command(Command::PrevPage { count })
                }
                (KeyCode::PageDown, _) => {
                    let count = self.take_count();
                    UiEvent::Command(Command::NextPage { count })
                }
                (KeyCode::Char('j'), KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::Command(Command::NextPage { count })
                }
                (KeyCode::Char('k'), KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::Command(Command::PrevPage { count })
                }
                (KeyCode::Home, _) | (KeyCode::Char('g'), KeyModifiers::NONE) => {
                    self.reset_count();
                    UiEvent::Command(Command::FirstPage)
                }
                (KeyCode::End, _) | (KeyCode::Char('G'), KeyModifiers::SHIFT) => {
                    self.reset_count();
                    UiEvent::Command(Command::LastPage)
                }
                (KeyCode::Char('h'), _) | (KeyCode::Char('H'), _) => {
                    self.reset_count();
                    UiEvent::Command(Command::SetFitMode {
                        mode: FitMode::Height,
                    })
                }
                (KeyCode::Char('w'), _) | (KeyCode::Char('W'), _) => {
                    self.reset_count();
                    UiEvent::Command(Command::SetFitMode {
                        mode: FitMode::Width,
                    })
                }
                (KeyCode::Char('+'), _) | (KeyCode::Char('='), _) => {
                    self.reset_count();
                    UiEvent::ZoomIn
                }
                (KeyCode::Char('-'), _) => {
                    self.reset_count();
                    UiEvent::ZoomOut
                }
                (KeyCode::Char('t'), _) | (KeyCode::Char('T'), _) => {
                    self.reset_count();
                    UiEvent::OpenOutline
                }
                (KeyCode::Char('f'), _) | (KeyCode::Char('F'), _) => {
                    self.reset_count();
                    UiEvent::ToggleImmersive
                }
                (KeyCode::Char('c'), KeyModifiers::NONE) => {
                    self.reset_count();
                    UiEvent::CopyLink
                }
                (KeyCode::Esc, _) => {
                    self.reset_count();
                    UiEvent::Escape
                }
                (KeyCode::Char('q'), _) => {
                    self.reset_count();
                    UiEvent::Quit
                }
                _ => {
                    self.reset_count();
                    UiEvent::None
                }
            },
            Event::Mouse(MouseEvent {
                kind: MouseEventKind::Down(MouseButton::Left),
                ..
            }) => UiEvent::Tap,
            _ => UiEvent::None,
        }
    }

    fn map_event_outline(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Esc, _) | (KeyCode::Char('t'), _) | (KeyCode::Char('T'), _) => {
                    UiEvent::CloseOverlay
                }
                (KeyCode::Enter, _) => UiEvent::OutlineActivate,
                (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                    UiEvent::OutlineMove { delta: 1 }
                }
                (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                    UiEvent::OutlineMove { delta: -1 }
                }
                (KeyCode::Char('q'), _) => UiEvent::Quit,
                _ => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }

    fn arrow(&mut self, direction: ArrowDirection, modifiers: KeyModifiers) -> UiEvent {
        let count = self.take_count();
        UiEvent::Arrow {
            direction,
            count,
            forced: modifiers.contains(KeyModifiers::CONTROL),
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        self.pending_count = Some(current.saturating_mul(10).saturating_add(digit));
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    /// Digits typed so far, for the status line.
    pub fn pending_input(&self) -> Option<String> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventKind, KeyEventState};

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    #[test]
    fn kitty_draw_deletes_then_transmits() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let image = RenderImage {
            width: 1,
            height: 1,
            pixels: vec![255, 0, 0, 255],
        };

        renderer.draw(&image, DrawParams::clamped(10, 5)).unwrap();
        let output = String::from_utf8(renderer.writer).unwrap();
        assert!(output.starts_with("\u{1b}_Ga=d,d=i,i=1"));
        assert!(output.contains("_Ga=T,f=100"));
        assert!(output.contains("c=10,r=5"));
    }

    #[test]
    fn draw_params_never_collapse_to_zero() {
        let params = DrawParams::clamped(0, 0);
        assert_eq!((params.columns, params.rows), (1, 1));
    }

    #[test]
    fn numeric_prefix_scales_page_turns() {
        let mut mapper = EventMapper::new();
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('1'))),
            UiEvent::None
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('2'))),
            UiEvent::None
        ));
        assert_eq!(mapper.pending_input().as_deref(), Some("12"));

        match mapper.map_event(key_event(KeyCode::Char('j'))) {
            UiEvent::Command(Command::NextPage { count }) => assert_eq!(count, 12),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn prefix_resets_after_use() {
        let mut mapper = EventMapper::new();
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('3'))),
            UiEvent::None
        ));
        match mapper.map_event(key_event(KeyCode::Char('k'))) {
            UiEvent::Command(Command::PrevPage { count }) => assert_eq!(count, 3),
            other => panic!("unexpected event: {:?}", other),
        }
        match mapper.map_event(key_event(KeyCode::Char('k'))) {
            UiEvent::Command(Command::PrevPage { count }) => assert_eq!(count, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn plain_arrows_are_reported_for_the_caller_to_resolve() {
        let mut mapper = EventMapper::new();
        match mapper.map_event(key_event(KeyCode::Left)) {
            UiEvent::Arrow {
                direction: ArrowDirection::Left,
                count: 1,
                forced: false,
            } => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn ctrl_arrows_force_a_page_turn() {
        let mut mapper = EventMapper::new();
        match mapper.map_event(key_event_with_modifiers(
            KeyCode::Right,
            KeyModifiers::CONTROL,
        )) {
            UiEvent::Arrow {
                direction: ArrowDirection::Right,
                forced: true,
                ..
            } => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn fit_mode_keys_map_directly() {
        let mut mapper = EventMapper::new();
        match mapper.map_event(key_event(KeyCode::Char('h'))) {
            UiEvent::Command(Command::SetFitMode {
                mode: FitMode::Height,
            }) => {}
            other => panic!("unexpected event: {:?}", other),
        }
        match mapper.map_event(key_event_with_modifiers(
            KeyCode::Char('W'),
            KeyModifiers::SHIFT,
        )) {
            UiEvent::Command(Command::SetFitMode {
                mode: FitMode::Width,
            }) => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn zoom_outline_and_immersive_keys_map() {
        let mut mapper = EventMapper::new();
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('+'))),
            UiEvent::ZoomIn
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('-'))),
            UiEvent::ZoomOut
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('t'))),
            UiEvent::OpenOutline
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('f'))),
            UiEvent::ToggleImmersive
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('c'))),
            UiEvent::CopyLink
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('q'))),
            UiEvent::Quit
        ));
    }

    #[test]
    fn mouse_click_is_a_tap() {
        let mut mapper = EventMapper::new();
        let event = Event::Mouse(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 3,
            row: 4,
            modifiers: KeyModifiers::NONE,
        });
        assert!(matches!(mapper.map_event(event), UiEvent::Tap));
    }

    #[test]
    fn outline_mode_maps_navigation_keys() {
        let mut mapper = EventMapper::new();
        mapper.set_mode(InputMode::Outline);

        match mapper.map_event(key_event(KeyCode::Char('j'))) {
            UiEvent::OutlineMove { delta } => assert_eq!(delta, 1),
            other => panic!("unexpected event: {:?}", other),
        }
        match mapper.map_event(key_event(KeyCode::Char('k'))) {
            UiEvent::OutlineMove { delta } => assert_eq!(delta, -1),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Enter)),
            UiEvent::OutlineActivate
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Esc)),
            UiEvent::CloseOverlay
        ));
    }

    #[test]
    fn switching_modes_clears_the_pending_prefix() {
        let mut mapper = EventMapper::new();
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('4'))),
            UiEvent::None
        ));
        assert_eq!(mapper.pending_input().as_deref(), Some("4"));

        mapper.set_mode(InputMode::Outline);
        assert!(mapper.pending_input().is_none());
    }
}
