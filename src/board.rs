use std::error::Error;
use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CEvent, KeyCode, KeyEventKind};
use crossterm::terminal::{
	EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use crossterm::{ExecutableCommand, execute};
use log::{info, warn};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::{Frame, Terminal};

use crate::catalog::TaskCatalog;
use crate::session::{Button, DisplayAdapter, InputAdapter, Moment, Session, SessionSettings};
use crate::storage::LogStore;

pub const LCD_COLUMNS: usize = 16;
pub const LCD_ROWS: usize = 2;

const LIT_BACKGROUND_COLOR: Color = Color::Rgb(120, 200, 80);
const LIT_TEXT_COLOR: Color = Color::Black;
const DARK_BACKGROUND_COLOR: Color = Color::Rgb(20, 40, 20);
const DARK_TEXT_COLOR: Color = Color::DarkGray;
const HINT: &str = "1 clock | 2 prev | 3 next | 4 pause | q quit";

type CrosstermTerminal = Terminal<CrosstermBackend<Stdout>>;

/// What the character display currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcdState {
	pub text: String,
	pub backlight: bool,
}

impl Default for LcdState {
	fn default() -> Self {
		Self {
			text: String::new(),
			backlight: true,
		}
	}
}

impl LcdState {
	/// The text cut into display rows, each padded to the panel width.
	pub fn rows(&self) -> Vec<String> {
		let mut rows = self
			.text
			.split('\n')
			.take(LCD_ROWS)
			.map(|row| {
				let mut row = row.chars().take(LCD_COLUMNS).collect::<String>();
				let width = row.chars().count();
				row.extend(std::iter::repeat_n(' ', LCD_COLUMNS - width));
				row
			})
			.collect::<Vec<_>>();
		rows.resize(LCD_ROWS, " ".repeat(LCD_COLUMNS));
		rows
	}
}

/// 16x2 character display drawn in the terminal.
pub struct LcdPanel {
	terminal: CrosstermTerminal,
	state: LcdState,
}

impl LcdPanel {
	pub fn new(terminal: CrosstermTerminal) -> Self {
		Self {
			terminal,
			state: LcdState::default(),
		}
	}

	fn redraw(&mut self) -> io::Result<()> {
		let state = &self.state;
		self.terminal.draw(|frame| draw_lcd(frame, state))?;
		Ok(())
	}

	fn restore(mut self) -> io::Result<()> {
		disable_raw_mode()?;
		execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
		self.terminal.show_cursor()?;
		Ok(())
	}
}

impl DisplayAdapter for LcdPanel {
	fn display(&mut self, text: &str, switch_backlight: bool) -> io::Result<()> {
		self.state.text = text.to_string();
		if switch_backlight {
			self.state.backlight = true;
		}
		self.redraw()
	}

	fn clear(&mut self) -> io::Result<()> {
		self.state.text.clear();
		self.redraw()
	}

	fn toggle_backlight(&mut self) -> io::Result<()> {
		self.state.backlight = !self.state.backlight;
		self.redraw()
	}

	fn backlight_state(&self) -> bool {
		self.state.backlight
	}
}

pub fn draw_lcd(frame: &mut Frame, state: &LcdState) {
	let area = lcd_rect(frame.area());
	let layout = Layout::default()
		.direction(Direction::Vertical)
		.constraints([Constraint::Length(LCD_ROWS as u16 + 2), Constraint::Length(1)])
		.split(area);

	let style = if state.backlight {
		Style::default()
			.fg(LIT_TEXT_COLOR)
			.bg(LIT_BACKGROUND_COLOR)
			.add_modifier(Modifier::BOLD)
	} else {
		Style::default().fg(DARK_TEXT_COLOR).bg(DARK_BACKGROUND_COLOR)
	};

	let lines = state.rows().into_iter().map(Line::from).collect::<Vec<_>>();
	let panel = Paragraph::new(lines)
		.style(style)
		.block(Block::default().borders(Borders::ALL).title("taskboard"));
	frame.render_widget(panel, layout[0]);
	frame.render_widget(Paragraph::new(Line::from(HINT)), layout[1]);
}

fn lcd_rect(area: Rect) -> Rect {
	let width = (HINT.len() as u16).min(area.width);
	let height = (LCD_ROWS as u16 + 3).min(area.height);
	Rect {
		x: area.x + (area.width - width) / 2,
		y: area.y + (area.height - height) / 2,
		width,
		height,
	}
}

/// Keys `1`-`4` as the board's buttons.
///
/// Only key presses count, so a held or released key never fires twice.
#[derive(Debug, Default)]
pub struct Keypad {
	pending: [bool; 4],
	quit: bool,
}

impl Keypad {
	/// Collects key events for up to `timeout`. Returns false once quit was
	/// requested.
	pub fn poll(&mut self, timeout: Duration) -> io::Result<bool> {
		let deadline = Instant::now() + timeout;
		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if !event::poll(remaining)? {
				break;
			}
			if let CEvent::Key(key) = event::read()? {
				if key.kind == KeyEventKind::Press {
					self.press(key.code);
				}
			}
			if remaining.is_zero() {
				break;
			}
		}
		Ok(!self.quit)
	}

	fn press(&mut self, code: KeyCode) {
		match code {
			KeyCode::Char('q') | KeyCode::Esc => self.quit = true,
			code => {
				if let Some(button) = button_for_key(code) {
					self.pending[button_index(button)] = true;
				}
			}
		}
	}
}

impl InputAdapter for Keypad {
	fn activated(&mut self, button: Button) -> bool {
		std::mem::take(&mut self.pending[button_index(button)])
	}
}

pub fn button_for_key(code: KeyCode) -> Option<Button> {
	match code {
		KeyCode::Char(digit @ '1'..='4') => Button::from_index(digit as usize - '1' as usize),
		_ => None,
	}
}

fn button_index(button: Button) -> usize {
	match button {
		Button::Clock => 0,
		Button::Prev => 1,
		Button::Next => 2,
		Button::Pause => 3,
	}
}

pub fn run_board(
	catalog: TaskCatalog,
	store: LogStore,
	settings: SessionSettings,
	poll_interval: Duration,
) -> Result<(), Box<dyn Error>> {
	enable_raw_mode()?;
	let mut stdout = io::stdout();
	stdout.execute(EnterAlternateScreen)?;
	let backend = CrosstermBackend::new(stdout);
	let terminal = Terminal::new(backend)?;

	info!(
		"board started on task {} logging to {}",
		catalog.current(),
		store.path().display()
	);
	let mut session = Session::new(catalog, store, LcdPanel::new(terminal), settings, Moment::now());
	let mut keypad = Keypad::default();

	let result = run_event_loop(&mut session, &mut keypad, poll_interval);

	info!(
		"board stopped on task {} at {}s",
		session.catalog().current(),
		session.timer().elapsed(Instant::now())
	);
	session.blank();
	session.into_display().restore()?;

	result
}

fn run_event_loop(
	session: &mut Session<LcdPanel>,
	keypad: &mut Keypad,
	poll_interval: Duration,
) -> Result<(), Box<dyn Error>> {
	loop {
		if !keypad.poll(poll_interval)? {
			break;
		}

		let now = Moment::now();
		session.poll_input(keypad, now);
		if let Err(err) = session.tick(now) {
			warn!("{err} (display shows: {})", session.fault().unwrap_or("no fault"));
		}
	}

	Ok(())
}
