use std::path::PathBuf;

use crate::config::AppConfig;
use crate::error::PinError;
use crate::filter::{FilterCounts, PinFilter};
use crate::model::{Coordinate, PinId, PinRecord, Scope};
use crate::staging::{without_last_grapheme, SectionField, StagedImage};
use crate::storage::PinStore;

use super::backend::{Completion, Job};
use super::coordinator::{RequestId, Settled, ViewCoordinator, ViewEvent, ViewState};

/// Markers closer than this many degrees to the cursor can be opened from the map.
const MARKER_PICK_RADIUS: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    List,
    Map,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Title,
    Section(usize, SectionField),
    Status,
    Category,
    Public,
    Image,
}

pub struct AppState {
    store: PinStore,
    view: ViewCoordinator,
    pub filter: PinFilter,
    selected: Option<PinId>,
    focus: FocusPane,
    input_mode: InputMode,
    cursor: Coordinate,
    cursor_step: f64,
    form_field: FormField,
    image_path: String,
    loading: bool,
    status_message: Option<String>,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: PinStore::new(config.browse.default_scope, config.server.caller()),
            view: ViewCoordinator::new(config.staging.max_image_bytes),
            filter: PinFilter {
                status: config.browse.status_filter,
                category: config.browse.category_filter,
                search: String::new(),
            },
            selected: None,
            focus: FocusPane::List,
            input_mode: InputMode::Normal,
            cursor: config.map.center(),
            cursor_step: config.map.cursor_step,
            form_field: FormField::Title,
            image_path: String::new(),
            loading: false,
            status_message: None,
        }
    }

    pub fn store(&self) -> &PinStore {
        &self.store
    }

    pub fn view(&self) -> &ViewCoordinator {
        &self.view
    }

    pub fn view_state(&self) -> &ViewState {
        self.view.state()
    }

    pub fn focus(&self) -> FocusPane {
        self.focus
    }

    pub fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    pub fn cursor(&self) -> Coordinate {
        self.cursor
    }

    pub fn form_field(&self) -> FormField {
        self.form_field
    }

    pub fn image_path(&self) -> &str {
        &self.image_path
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }

    pub fn visible(&self) -> Vec<&PinRecord> {
        self.filter.apply(self.store.pins())
    }

    pub fn counts(&self) -> FilterCounts {
        FilterCounts::tally(self.store.pins())
    }

    pub fn selected_index(&self) -> Option<usize> {
        let id = self.selected?;
        self.visible().iter().position(|pin| pin.id == id)
    }

    pub fn selected_pin(&self) -> Option<&PinRecord> {
        self.selected.and_then(|id| self.store.get(id))
    }

    /// The pin shown by the detail or edit view.
    pub fn open_pin(&self) -> Option<&PinRecord> {
        self.view.state().pin().and_then(|id| self.store.get(id))
    }

    pub fn move_selection(&mut self, delta: isize) {
        let visible: Vec<PinId> = self.visible().iter().map(|pin| pin.id).collect();
        if visible.is_empty() {
            self.selected = None;
            return;
        }
        let len = visible.len() as isize;
        let next = match self.selected_index() {
            Some(current) => (current as isize + delta).clamp(0, len - 1),
            None if delta < 0 => len - 1,
            None => 0,
        };
        self.selected = Some(visible[next as usize]);
    }

    fn keep_selection_visible(&mut self) {
        if self.selected.is_some() && self.selected_index().is_none() {
            self.selected = None;
        }
    }

    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            FocusPane::List => FocusPane::Map,
            FocusPane::Map => FocusPane::List,
        };
    }

    pub fn reload(&mut self) -> Job {
        self.load_scope(self.store.scope())
    }

    pub fn toggle_scope(&mut self) -> Option<Job> {
        if self.view.state() != &ViewState::Browsing {
            self.set_status_message(Some("Close the current view before switching collections"));
            return None;
        }
        Some(self.load_scope(self.store.scope().toggled()))
    }

    fn load_scope(&mut self, scope: Scope) -> Job {
        let ticket = self.store.begin_load(scope);
        self.loading = true;
        self.set_status_message(Some(format!("Loading {}...", scope.label())));
        Job::Load { ticket }
    }

    pub fn cycle_status_filter(&mut self) {
        self.filter.status = self.filter.status.cycle();
        self.keep_selection_visible();
    }

    pub fn cycle_category_filter(&mut self) {
        self.filter.category = self.filter.category.cycle();
        self.keep_selection_visible();
    }

    pub fn begin_search(&mut self) {
        self.input_mode = InputMode::Search;
    }

    pub fn push_search_char(&mut self, ch: char) {
        self.filter.search.push(ch);
        self.keep_selection_visible();
    }

    pub fn pop_search_char(&mut self) {
        self.filter.search = without_last_grapheme(&self.filter.search);
        self.keep_selection_visible();
    }

    pub fn finish_search(&mut self) {
        self.input_mode = InputMode::Normal;
    }

    pub fn cancel_search(&mut self) {
        self.filter.search.clear();
        self.input_mode = InputMode::Normal;
    }

    pub fn move_cursor(&mut self, lat_steps: f64, lon_steps: f64) {
        self.cursor = self
            .cursor
            .offset(lat_steps * self.cursor_step, lon_steps * self.cursor_step);
    }

    pub fn place_pin_at_cursor(&mut self) -> Option<Job> {
        self.dispatch(ViewEvent::MapClicked(self.cursor))
    }

    pub fn activate_selected(&mut self) -> Option<Job> {
        let id = self.selected?;
        self.dispatch(ViewEvent::PinActivated(id))
    }

    /// Opens the visible marker nearest the cursor.
    pub fn activate_marker_at_cursor(&mut self) -> Option<Job> {
        let cursor = self.cursor;
        let nearest = self
            .visible()
            .into_iter()
            .map(|pin| (pin.id, angular_gap(cursor, pin.coordinate)))
            .filter(|(_, gap)| *gap <= MARKER_PICK_RADIUS)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id);
        match nearest {
            Some(id) => {
                self.selected = Some(id);
                self.dispatch(ViewEvent::PinActivated(id))
            }
            None => {
                self.set_status_message(Some("No pin under the cursor; press n to add one here"));
                None
            }
        }
    }

    pub fn dispatch(&mut self, event: ViewEvent) -> Option<Job> {
        let entering_form = !self.view.state().is_form();
        match self.view.handle(event, &self.store) {
            Ok(command) => {
                if entering_form && self.view.state().is_form() {
                    self.form_field = FormField::Title;
                    self.image_path.clear();
                }
                if let Some(message) = transition_message(event, self.view.state()) {
                    self.set_status_message(Some(message));
                }
                command.map(Job::Run)
            }
            Err(err) => {
                self.report(&err);
                None
            }
        }
    }

    pub fn apply_completion(&mut self, completion: Completion) -> Vec<Job> {
        match completion {
            Completion::Loaded { ticket, result } => {
                match self.store.apply_load(ticket, result) {
                    Ok(count) => {
                        self.loading = false;
                        self.set_status_message(Some(format!(
                            "{}: {count} pin(s)",
                            self.store.scope().label()
                        )));
                    }
                    Err(err) => {
                        if !err.is_stale() {
                            self.loading = false;
                        }
                        self.report(&err);
                    }
                }
                self.after_store_change();
            }
            Completion::Created {
                request,
                ticket,
                result,
            } => {
                let applied = self.store.apply_create(ticket, result).map(|_| ());
                self.settle(request, applied, "Pin created");
            }
            Completion::Updated {
                request,
                pin,
                result,
            } => {
                let applied = self.store.apply_update(pin, result).map(|_| ());
                self.settle(request, applied, "Pin updated");
            }
            Completion::Deleted {
                request,
                pin,
                result,
            } => {
                let applied = self.store.apply_remove(pin, result);
                self.settle(request, applied, "Pin deleted");
            }
            Completion::Copied { pin, result } => match result {
                Ok(()) => self.set_status_message(Some(format!("Added {pin} to My Pins"))),
                Err(err) => self.report(&err),
            },
            Completion::Stats { request, result } => self.view.settle_stats(request, result),
            Completion::ImageRead {
                draft,
                file_name,
                result,
            } => match result {
                Ok(bytes) => match self.view.stage_image(draft, file_name, bytes) {
                    Ok(Some(command)) => {
                        self.image_path.clear();
                        self.set_status_message(Some("Preparing image preview..."));
                        return vec![Job::Run(command)];
                    }
                    Ok(None) => {}
                    Err(err) => self.report(&err.into()),
                },
                Err(message) => {
                    tracing::warn!(%message, "could not read image");
                    self.set_status_message(Some(format!("Could not read image: {message}")));
                }
            },
            Completion::Preview(outcome) => match self.view.apply_preview(outcome) {
                Ok(()) => {
                    if let StagedImage::Staged { preview, .. } = self.view.draft().image() {
                        let summary = preview.summary();
                        self.set_status_message(Some(format!("Image staged: {summary}")));
                    }
                }
                Err(err) => self.report(&err.into()),
            },
        }
        Vec::new()
    }

    fn settle(&mut self, request: RequestId, applied: Result<(), PinError>, done: &str) {
        let succeeded = applied.is_ok();
        match self.view.settle(request, applied) {
            Ok(Settled::Returned) => {
                self.selected = None;
                self.image_path.clear();
                if succeeded {
                    self.set_status_message(Some(done));
                }
            }
            Ok(Settled::Ignored) => {}
            Err(err) => self.report(&err),
        }
        self.after_store_change();
    }

    fn after_store_change(&mut self) {
        if self.view.reconcile(&self.store) {
            self.set_status_message(Some("That pin is no longer available"));
        }
        self.keep_selection_visible();
    }

    fn report(&mut self, err: &PinError) {
        if err.is_stale() {
            tracing::debug!(?err, "stale result discarded");
            return;
        }
        tracing::warn!(?err, "operation failed");
        let message = match err {
            PinError::Authorization { .. } => "Only the owner can change this pin".to_string(),
            PinError::Network(_) => format!("Network problem: {err}"),
            PinError::Rejected { status } => format!("Server refused the request ({status})"),
            other => other.to_string(),
        };
        self.set_status_message(Some(message));
    }

    pub fn form_next_field(&mut self) {
        self.form_field = self.step_field(true);
    }

    pub fn form_previous_field(&mut self) {
        self.form_field = self.step_field(false);
    }

    fn form_fields(&self) -> Vec<FormField> {
        let mut fields = vec![FormField::Title];
        for index in 0..self.view.draft().sections().len() {
            fields.push(FormField::Section(index, SectionField::Title));
            fields.push(FormField::Section(index, SectionField::Content));
        }
        fields.extend([
            FormField::Status,
            FormField::Category,
            FormField::Public,
            FormField::Image,
        ]);
        fields
    }

    fn step_field(&self, forward: bool) -> FormField {
        let fields = self.form_fields();
        let len = fields.len();
        let current = fields
            .iter()
            .position(|field| *field == self.form_field)
            .unwrap_or(0);
        let next = if forward {
            (current + 1) % len
        } else {
            (current + len - 1) % len
        };
        fields[next]
    }

    pub fn form_insert_char(&mut self, ch: char) {
        match self.form_field {
            FormField::Title => {
                self.view.edit_draft(|draft| draft.push_title_char(ch));
            }
            FormField::Section(index, field) => {
                let result = self.view.try_edit_draft(|draft| {
                    let mut value = draft
                        .section_field(index, field)
                        .unwrap_or_default()
                        .to_string();
                    value.push(ch);
                    draft.update_section(index, field, value)
                });
                if let Err(err) = result {
                    self.report(&err.into());
                }
            }
            FormField::Image => self.image_path.push(ch),
            FormField::Public if ch == ' ' => self.form_toggle_public(),
            FormField::Status | FormField::Category if ch == ' ' => self.form_cycle(true),
            _ => {}
        }
    }

    pub fn form_backspace(&mut self) {
        match self.form_field {
            FormField::Title => {
                self.view.edit_draft(|draft| draft.pop_title_grapheme());
            }
            FormField::Section(index, field) => {
                let result = self.view.try_edit_draft(|draft| {
                    let current = draft.section_field(index, field).unwrap_or_default();
                    let value = without_last_grapheme(current);
                    draft.update_section(index, field, value)
                });
                if let Err(err) = result {
                    self.report(&err.into());
                }
            }
            FormField::Image => {
                if self.image_path.is_empty() {
                    self.view.edit_draft(|draft| draft.discard_staged_image());
                } else {
                    self.image_path = without_last_grapheme(&self.image_path);
                }
            }
            _ => {}
        }
    }

    pub fn form_cycle(&mut self, forward: bool) {
        match self.form_field {
            FormField::Status => {
                self.view.edit_draft(|draft| {
                    let status = draft.status();
                    draft.with_status(if forward { status.next() } else { status.previous() })
                });
            }
            FormField::Category => {
                self.view.edit_draft(|draft| {
                    let category = draft.category();
                    draft.with_category(if forward {
                        category.next()
                    } else {
                        category.previous()
                    })
                });
            }
            FormField::Public => self.form_toggle_public(),
            _ => {}
        }
    }

    pub fn form_toggle_public(&mut self) {
        self.view.edit_draft(|draft| draft.with_public(!draft.is_public()));
    }

    pub fn form_add_section(&mut self) {
        if self.view.edit_draft(|draft| draft.add_section()) {
            let index = self.view.draft().sections().len().saturating_sub(1);
            self.form_field = FormField::Section(index, SectionField::Title);
        }
    }

    pub fn form_remove_section(&mut self) {
        let FormField::Section(index, _) = self.form_field else {
            self.set_status_message(Some("Move to a section to remove it"));
            return;
        };
        match self.view.try_edit_draft(|draft| draft.remove_section(index)) {
            Ok(_) => {
                let remaining = self.view.draft().sections().len();
                self.form_field = if remaining == 0 {
                    FormField::Title
                } else {
                    FormField::Section(index.min(remaining - 1), SectionField::Title)
                };
            }
            Err(err) => self.report(&err.into()),
        }
    }

    /// Enter inside the form: loads the typed image path, otherwise moves on.
    pub fn form_enter(&mut self) -> Option<Job> {
        if self.form_field != FormField::Image {
            self.form_next_field();
            return None;
        }
        let path = self.image_path.trim();
        if path.is_empty() {
            self.set_status_message(Some("Type the path of an image file, then press Enter"));
            return None;
        }
        let path = PathBuf::from(path);
        self.set_status_message(Some(format!("Reading {}...", path.display())));
        self.view.request_image(path).map(Job::Run)
    }
}

fn angular_gap(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = a.lat() - b.lat();
    let raw = (a.lon() - b.lon()).abs();
    let d_lon = raw.min(360.0 - raw);
    (d_lat * d_lat + d_lon * d_lon).sqrt()
}

fn transition_message(event: ViewEvent, state: &ViewState) -> Option<&'static str> {
    let message = match (event, state) {
        (ViewEvent::MapClicked(_), ViewState::Creating { .. }) => {
            "New pin: Tab next field • Ctrl-s save • Esc cancel"
        }
        (ViewEvent::EditRequested, ViewState::Editing { .. }) => {
            "Editing: Tab next field • Ctrl-s save • Ctrl-x delete • Esc cancel"
        }
        (
            ViewEvent::DeleteRequested,
            ViewState::ViewingDetail {
                confirm_delete: true,
                ..
            }
            | ViewState::Editing {
                confirm_delete: true,
                ..
            },
        ) => "Delete this pin? y confirm • n keep",
        (ViewEvent::Cancel, ViewState::Browsing) => "Discarded draft",
        (ViewEvent::CopyRequested, _) => "Copying to My Pins...",
        _ => return None,
    };
    Some(message)
}
