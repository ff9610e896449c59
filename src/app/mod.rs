use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::ListState;
use ratatui::Terminal;

use crate::config::AppConfig;
use crate::ui;

pub mod backend;
pub mod coordinator;
pub mod state;

pub use backend::{BackendHandle, Completion, Job};
pub use coordinator::{Command, RequestId, Settled, StatsView, ViewCoordinator, ViewEvent, ViewState};
pub use state::{AppState, FocusPane, FormField, InputMode};

/// Completions handled per frame before input is polled again.
const COMPLETIONS_PER_TICK: usize = 32;

enum Action {
    Quit,
    SelectNext,
    SelectPrevious,
    ToggleFocus,
    Refresh,
    ToggleScope,
    StartSearch,
    CycleStatus,
    CycleCategory,
    Activate,
    PlacePin,
    MoveCursor(f64, f64),
    ShowStats,
}

pub struct App {
    pub config: Arc<AppConfig>,
    backend: BackendHandle,
    state: AppState,
    list_state: ListState,
    should_quit: bool,
    tick_rate: Duration,
}

impl App {
    pub fn new(config: Arc<AppConfig>, backend: BackendHandle) -> Self {
        let mut state = AppState::new(&config);
        let initial = state.reload();
        backend.submit(initial);
        Self {
            config,
            backend,
            state,
            list_state: ListState::default(),
            should_quit: false,
            tick_rate: Duration::from_millis(100),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            terminal
                .draw(|frame| {
                    self.list_state.select(self.state.selected_index());
                    ui::draw_app(frame, &self.state, &mut self.list_state);
                })
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                match event::read().context("reading terminal event")? {
                    Event::Key(key) => self.handle_key(key),
                    Event::Resize(_, _) => {
                        // next draw adapts to the new size
                    }
                    _ => {}
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn on_tick(&mut self) {
        for _ in 0..COMPLETIONS_PER_TICK {
            let Some(completion) = self.backend.try_completion() else {
                break;
            };
            for job in self.state.apply_completion(completion) {
                self.backend.submit(job);
            }
        }
    }

    fn submit(&self, job: Option<Job>) {
        if let Some(job) = job {
            self.backend.submit(job);
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }

        if self.handle_view_key(key) {
            return;
        }

        if self.state.input_mode() == InputMode::Search {
            match key.code {
                KeyCode::Esc => self.state.cancel_search(),
                KeyCode::Enter => self.state.finish_search(),
                KeyCode::Backspace => self.state.pop_search_char(),
                KeyCode::Char(ch) if !has_command_modifier(key) => self.state.push_search_char(ch),
                _ => {}
            }
            return;
        }

        let map_focus = self.state.focus() == FocusPane::Map;
        let action = match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Refresh)
            }
            KeyCode::Char('j') | KeyCode::Down if !map_focus => Some(Action::SelectNext),
            KeyCode::Char('k') | KeyCode::Up if !map_focus => Some(Action::SelectPrevious),
            KeyCode::Char('k') | KeyCode::Up => Some(Action::MoveCursor(1.0, 0.0)),
            KeyCode::Char('j') | KeyCode::Down => Some(Action::MoveCursor(-1.0, 0.0)),
            KeyCode::Char('h') | KeyCode::Left => Some(Action::MoveCursor(0.0, -1.0)),
            KeyCode::Char('l') | KeyCode::Right => Some(Action::MoveCursor(0.0, 1.0)),
            KeyCode::Char('K') => Some(Action::MoveCursor(5.0, 0.0)),
            KeyCode::Char('J') => Some(Action::MoveCursor(-5.0, 0.0)),
            KeyCode::Char('H') => Some(Action::MoveCursor(0.0, -5.0)),
            KeyCode::Char('L') => Some(Action::MoveCursor(0.0, 5.0)),
            KeyCode::Tab => Some(Action::ToggleFocus),
            KeyCode::Enter => Some(Action::Activate),
            KeyCode::Char('n') if !has_command_modifier(key) => Some(Action::PlacePin),
            KeyCode::Char('/') => Some(Action::StartSearch),
            KeyCode::Char('s') if !has_command_modifier(key) => Some(Action::CycleStatus),
            KeyCode::Char('c') if !has_command_modifier(key) => Some(Action::CycleCategory),
            KeyCode::Char('P') => Some(Action::ToggleScope),
            KeyCode::Char('S') => Some(Action::ShowStats),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::SelectNext => self.state.move_selection(1),
            Action::SelectPrevious => self.state.move_selection(-1),
            Action::ToggleFocus => self.state.toggle_focus(),
            Action::Refresh => {
                let job = self.state.reload();
                self.backend.submit(job);
            }
            Action::ToggleScope => {
                let job = self.state.toggle_scope();
                self.submit(job);
            }
            Action::StartSearch => self.state.begin_search(),
            Action::CycleStatus => self.state.cycle_status_filter(),
            Action::CycleCategory => self.state.cycle_category_filter(),
            Action::Activate => {
                let job = match self.state.focus() {
                    FocusPane::List => self.state.activate_selected(),
                    FocusPane::Map => self.state.activate_marker_at_cursor(),
                };
                self.submit(job);
            }
            Action::PlacePin => {
                let job = self.state.place_pin_at_cursor();
                self.submit(job);
            }
            Action::MoveCursor(lat, lon) => self.state.move_cursor(lat, lon),
            Action::ShowStats => {
                let job = self.state.dispatch(ViewEvent::StatsRequested);
                self.submit(job);
            }
        }
    }

    /// Keys consumed by whichever modal view is open.
    fn handle_view_key(&mut self, key: KeyEvent) -> bool {
        match self.state.view_state().clone() {
            ViewState::Browsing => false,
            ViewState::ViewingDetail { confirm_delete, .. } => {
                let event = match key.code {
                    KeyCode::Char('y') if confirm_delete => Some(ViewEvent::DeleteConfirmed),
                    KeyCode::Char('n') | KeyCode::Esc if confirm_delete => {
                        Some(ViewEvent::DeleteDismissed)
                    }
                    KeyCode::Esc | KeyCode::Char('q') => Some(ViewEvent::Close),
                    KeyCode::Char('e') => Some(ViewEvent::EditRequested),
                    KeyCode::Char('d') => Some(ViewEvent::DeleteRequested),
                    KeyCode::Char('c') => Some(ViewEvent::CopyRequested),
                    _ => None,
                };
                if let Some(event) = event {
                    let job = self.state.dispatch(event);
                    self.submit(job);
                }
                true
            }
            ViewState::ViewingStats { .. } => {
                if matches!(key.code, KeyCode::Esc | KeyCode::Char('q') | KeyCode::Enter) {
                    self.state.dispatch(ViewEvent::Close);
                }
                true
            }
            ViewState::Editing {
                confirm_delete: true,
                ..
            } => {
                let event = match key.code {
                    KeyCode::Char('y') => Some(ViewEvent::DeleteConfirmed),
                    KeyCode::Char('n') | KeyCode::Esc => Some(ViewEvent::DeleteDismissed),
                    _ => None,
                };
                if let Some(event) = event {
                    let job = self.state.dispatch(event);
                    self.submit(job);
                }
                true
            }
            ViewState::Creating { .. } | ViewState::Editing { .. } => {
                self.handle_form_key(key);
                true
            }
        }
    }

    fn handle_form_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('s') => {
                    let job = self.state.dispatch(ViewEvent::Submit);
                    self.submit(job);
                }
                KeyCode::Char('a') => self.state.form_add_section(),
                KeyCode::Char('d') => self.state.form_remove_section(),
                KeyCode::Char('x') => {
                    self.state.dispatch(ViewEvent::DeleteRequested);
                }
                _ => {}
            }
            return;
        }

        match key.code {
            KeyCode::Esc => {
                self.state.dispatch(ViewEvent::Cancel);
            }
            KeyCode::Tab | KeyCode::Down => self.state.form_next_field(),
            KeyCode::BackTab | KeyCode::Up => self.state.form_previous_field(),
            KeyCode::Left => self.state.form_cycle(false),
            KeyCode::Right => self.state.form_cycle(true),
            KeyCode::Backspace => self.state.form_backspace(),
            KeyCode::Enter => {
                let job = self.state.form_enter();
                self.submit(job);
            }
            KeyCode::Char(ch) if !has_command_modifier(key) => self.state.form_insert_char(ch),
            _ => {}
        }
    }
}

fn has_command_modifier(key: KeyEvent) -> bool {
    key.modifiers
        .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER)
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("entering alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("creating terminal")
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode().context("disabling raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("leaving alternate screen")?;
    terminal.show_cursor().context("showing cursor")?;
    Ok(())
}
