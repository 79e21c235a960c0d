use std::io::stdout;

use anyhow::Result;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::Rect,
    style::{Color, Style},
    text::Line,
    widgets::{Block, Borders, Paragraph},
};
use ratioflame_core::config::LayoutOptions;
use ratioflame_core::model::NodeId;
use ratioflame_core::source::ProfileSource;
use ratioflame_core::state::{MemoryLink, ShareTarget, format_threshold};
use ratioflame_core::{Transition, Viewer};
use ratioflame_protocol::{Point, RenderCommand, Viewport};

/// One terminal cell per level, one column per pixel.
const CELL_LAYOUT: LayoutOptions = LayoutOptions {
    cell_height: 1.0,
    min_frame_width: 1.0,
};

const HEADER_ROWS: u16 = 2;
const FOOTER_ROWS: u16 = 2;

fn to_term(color: ratioflame_protocol::Color) -> Color {
    Color::Rgb(color.r, color.g, color.b)
}

/// Next (or previous) entry after `current`, wrapping around.
fn cycle(items: &[String], current: &str, forward: bool) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let next = match (items.iter().position(|i| i == current), forward) {
        (None, _) => 0,
        (Some(i), true) => (i + 1) % items.len(),
        (Some(i), false) => (i + items.len() - 1) % items.len(),
    };
    items.get(next).cloned()
}

/// Column span of a frame rect, at least one cell wide.
fn columns(rect: &ratioflame_protocol::Rect) -> (u16, u16) {
    let start = rect.x.max(0.0).floor();
    let end = (rect.x + rect.w).floor();
    (start as u16, ((end - start) as u16).max(1))
}

struct App<'a> {
    viewer: &'a mut Viewer,
    source: &'a dyn ProfileSource,
    link: &'a mut MemoryLink,
    files: Vec<String>,
    scroll_y: f64,
    hover: Option<NodeId>,
    status: Option<String>,
}

impl App<'_> {
    fn dispatch(&mut self, transition: Transition) {
        match self.viewer.run(transition, self.source, &mut *self.link) {
            Ok(_) => self.status = None,
            Err(err) => self.status = Some(err.to_string()),
        }
    }

    fn cycle_file(&mut self, forward: bool) {
        let current = self.viewer.loaded_file().unwrap_or_default().to_string();
        if let Some(key) = cycle(&self.files, &current, forward) {
            self.hover = None;
            self.dispatch(Transition::SelectFile(key));
        }
    }

    fn cycle_metric(&mut self, forward: bool) {
        let metrics = self.viewer.metrics();
        if let Some(key) = cycle(&metrics, &self.viewer.state().metric_key, forward) {
            self.dispatch(Transition::SelectMetric(key));
        }
    }

    fn nudge_threshold(&mut self, steps: i32) {
        if let Some(slider) = self.viewer.slider() {
            let threshold = slider.nudge(self.viewer.state().threshold, steps);
            self.dispatch(Transition::SetThreshold(threshold));
        }
    }

    fn header(&self) -> [Line<'static>; 2] {
        let state = self.viewer.state();
        let file = self.viewer.loaded_file().unwrap_or("-");
        let mut first = format!(
            " ratioflame | file {file} (f/F) | metric {} (m/M) | threshold {} (+/-) | q quit",
            state.metric_key,
            format_threshold(state.threshold),
        );
        if let Some(status) = &self.status {
            first = format!("{first} | {status}");
        }
        let second = match (self.viewer.summary(), self.viewer.slider()) {
            (Some(summary), Some(slider)) => format!(
                " max ratio {} | p98 {:.2} | slider 0..{} step {} | {}",
                summary.max_label(),
                summary.p98_ratio,
                slider.max,
                slider.step,
                self.link.current(),
            ),
            _ => format!(" {}", self.link.current()),
        };
        [Line::from(first), Line::from(second)]
    }

    fn details(&self) -> String {
        let Some(details) = self.hover.and_then(|id| self.viewer.details(id)) else {
            return " hover a frame for its counters".to_string();
        };
        let counters: Vec<String> = details
            .counters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!(" {} | {}", details.name, counters.join(" "))
    }
}

fn draw_commands(buf: &mut ratatui::buffer::Buffer, area: Rect, cmds: &[RenderCommand]) {
    for cmd in cmds {
        let RenderCommand::DrawRect {
            rect, fill, label, ..
        } = cmd
        else {
            continue;
        };
        if rect.y < 0.0 {
            continue;
        }
        let row = rect.y.floor() as u16;
        let (col, width) = columns(rect);
        if row >= area.height || col >= area.width {
            continue;
        }

        let bg = to_term(*fill);
        let fg = if fill.luminance() > 0.5 {
            Color::Black
        } else {
            Color::White
        };
        let label_str = label.as_deref().unwrap_or("");
        let display: String = if (width as usize) > label_str.chars().count() + 1 {
            format!(" {label_str:<w$}", w = (width as usize).saturating_sub(1))
        } else {
            " ".repeat(width as usize)
        };

        let clamped_width = width.min(area.width.saturating_sub(col));
        for (i, ch) in display.chars().take(clamped_width as usize).enumerate() {
            let x = area.x + col + i as u16;
            let y = area.y + row;
            buf[(x, y)].set_char(ch).set_fg(fg).set_bg(bg);
        }
        // Frame boundary so adjacent siblings stay distinguishable.
        if clamped_width > 1 {
            let x = area.x + col + clamped_width - 1;
            buf[(x, area.y + row)].set_char('▏').set_fg(Color::Gray);
        }
    }
}

/// Interactive view over `viewer` until the user quits.
pub fn run(
    viewer: &mut Viewer,
    source: &dyn ProfileSource,
    link: &mut MemoryLink,
    status: Option<String>,
) -> Result<()> {
    let files = source.keys()?;
    let mut app = App {
        viewer,
        source,
        link,
        files,
        scroll_y: 0.0,
        hover: None,
        status,
    };

    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    loop {
        let size = terminal.size()?;
        let content = Rect::new(
            0,
            HEADER_ROWS,
            size.width,
            size.height.saturating_sub(HEADER_ROWS + FOOTER_ROWS),
        );
        let viewport = Viewport {
            x: 0.0,
            y: app.scroll_y,
            width: f64::from(content.width),
            height: f64::from(content.height),
        };
        let cmds = app.viewer.paint_with(&viewport, &CELL_LAYOUT);
        let header = app.header();
        let details = app.details();

        terminal.draw(|frame| {
            let area = frame.area();
            let bar = Style::default().fg(Color::White).bg(Color::DarkGray);
            frame.render_widget(
                Paragraph::new(header.to_vec()).style(bar),
                Rect::new(0, 0, area.width, HEADER_ROWS.min(area.height)),
            );

            frame.render_widget(
                Block::default()
                    .borders(Borders::NONE)
                    .style(Style::default().bg(Color::Black)),
                content,
            );
            draw_commands(frame.buffer_mut(), content, &cmds);

            let footer_y = content.y + content.height;
            if footer_y < area.height {
                frame.render_widget(
                    Paragraph::new(details.clone()).style(bar),
                    Rect::new(0, footer_y, area.width, area.height - footer_y),
                );
            }
        })?;

        if event::poll(std::time::Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Char('f') => app.cycle_file(true),
                    KeyCode::Char('F') => app.cycle_file(false),
                    KeyCode::Char('m') => app.cycle_metric(true),
                    KeyCode::Char('M') => app.cycle_metric(false),
                    KeyCode::Char('+') | KeyCode::Char('=') => app.nudge_threshold(1),
                    KeyCode::Char('-') => app.nudge_threshold(-1),
                    KeyCode::Char(']') => app.nudge_threshold(10),
                    KeyCode::Char('[') => app.nudge_threshold(-10),
                    KeyCode::Up => app.scroll_y = (app.scroll_y - 1.0).max(0.0),
                    KeyCode::Down => app.scroll_y += 1.0,
                    _ => {}
                },
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::Moved => {
                        app.hover = mouse.row.checked_sub(content.y).and_then(|row| {
                            let point = Point::new(f64::from(mouse.column), f64::from(row));
                            app.viewer.node_at(point, &viewport)
                        });
                    }
                    MouseEventKind::ScrollDown => app.scroll_y += 1.0,
                    MouseEventKind::ScrollUp => app.scroll_y = (app.scroll_y - 1.0).max(0.0),
                    _ => {}
                },
                _ => {}
            }
        }
    }

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(())
}
