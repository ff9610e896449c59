use std::path::PathBuf;

use crate::error::{PinError, StagingError};
use crate::model::{Coordinate, PinId, PinStats, PinSubmission};
use crate::staging::{DraftId, FormDraft, PreviewHandle, PreviewJob, PreviewOutcome};
use crate::storage::{CreateTicket, PinStore};

/// Correlates a command with the completion it eventually produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatsView {
    Loading,
    Ready(PinStats),
    Failed(String),
}

/// The single active view.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    Browsing,
    ViewingDetail { pin: PinId, confirm_delete: bool },
    Creating { coordinate: Coordinate },
    Editing { pin: PinId, confirm_delete: bool },
    ViewingStats { stats: StatsView },
}

impl ViewState {
    pub fn name(&self) -> &'static str {
        match self {
            ViewState::Browsing => "browsing",
            ViewState::ViewingDetail { .. } => "viewing-detail",
            ViewState::Creating { .. } => "creating",
            ViewState::Editing { .. } => "editing",
            ViewState::ViewingStats { .. } => "viewing-stats",
        }
    }

    pub fn is_form(&self) -> bool {
        matches!(self, ViewState::Creating { .. } | ViewState::Editing { .. })
    }

    /// The pin this view is bound to, if any.
    pub fn pin(&self) -> Option<PinId> {
        match self {
            ViewState::ViewingDetail { pin, .. } | ViewState::Editing { pin, .. } => Some(*pin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewEvent {
    MapClicked(Coordinate),
    PinActivated(PinId),
    EditRequested,
    DeleteRequested,
    DeleteConfirmed,
    DeleteDismissed,
    CopyRequested,
    StatsRequested,
    Close,
    Submit,
    Cancel,
}

/// Work the coordinator wants performed off the UI thread.
#[derive(Debug)]
pub enum Command {
    Create {
        request: RequestId,
        ticket: CreateTicket,
        submission: PinSubmission,
    },
    Update {
        request: RequestId,
        pin: PinId,
        submission: PinSubmission,
    },
    Delete {
        request: RequestId,
        pin: PinId,
    },
    Copy {
        request: RequestId,
        pin: PinId,
    },
    LoadStats {
        request: RequestId,
    },
    ReadImage {
        draft: DraftId,
        path: PathBuf,
    },
    DerivePreview(PreviewJob),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Create,
    Update(PinId),
    Delete(PinId),
    Stats,
}

/// What a settled request did to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// The view was not waiting for this result.
    Ignored,
    /// The view finished with the request and went back to browsing.
    Returned,
}

/// Owns the active view and the staging draft that belongs to it.
#[derive(Debug)]
pub struct ViewCoordinator {
    state: ViewState,
    draft: FormDraft,
    max_image_bytes: usize,
    preview: Option<PreviewHandle>,
    in_flight: Option<(RequestId, Pending)>,
    next_request: u64,
}

impl ViewCoordinator {
    pub fn new(max_image_bytes: usize) -> Self {
        Self {
            state: ViewState::Browsing,
            draft: FormDraft::new_pin().with_image_limit(max_image_bytes),
            max_image_bytes,
            preview: None,
            in_flight: None,
            next_request: 0,
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn draft(&self) -> &FormDraft {
        &self.draft
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn handle(
        &mut self,
        event: ViewEvent,
        store: &PinStore,
    ) -> Result<Option<Command>, PinError> {
        let state = self.state.clone();
        match (state, event) {
            (ViewState::Browsing, ViewEvent::MapClicked(coordinate)) => {
                self.enter(ViewState::Creating { coordinate });
                self.draft =
                    FormDraft::for_location(coordinate).with_image_limit(self.max_image_bytes);
                Ok(None)
            }
            (ViewState::Browsing, ViewEvent::PinActivated(pin)) => {
                if !store.contains(pin) {
                    tracing::debug!(%pin, "activated pin not in collection");
                    return Ok(None);
                }
                self.enter(ViewState::ViewingDetail {
                    pin,
                    confirm_delete: false,
                });
                Ok(None)
            }
            (ViewState::ViewingDetail { pin, .. }, ViewEvent::EditRequested) => {
                store.authorize_mutation(pin)?;
                let Some(record) = store.get(pin) else {
                    return Err(PinError::StaleTarget(pin));
                };
                let draft = FormDraft::from_pin(record).with_image_limit(self.max_image_bytes);
                self.enter(ViewState::Editing {
                    pin,
                    confirm_delete: false,
                });
                self.draft = draft;
                Ok(None)
            }
            (ViewState::ViewingDetail { pin, .. }, ViewEvent::DeleteRequested) => {
                store.authorize_mutation(pin)?;
                self.state = ViewState::ViewingDetail {
                    pin,
                    confirm_delete: true,
                };
                Ok(None)
            }
            (ViewState::ViewingDetail { pin, .. }, ViewEvent::DeleteDismissed) => {
                self.state = ViewState::ViewingDetail {
                    pin,
                    confirm_delete: false,
                };
                Ok(None)
            }
            // The draft survives the prompt so dismissing it resumes editing.
            (ViewState::Editing { pin, .. }, ViewEvent::DeleteRequested) => {
                store.authorize_mutation(pin)?;
                self.state = ViewState::Editing {
                    pin,
                    confirm_delete: true,
                };
                Ok(None)
            }
            (ViewState::Editing { pin, .. }, ViewEvent::DeleteDismissed) => {
                self.state = ViewState::Editing {
                    pin,
                    confirm_delete: false,
                };
                Ok(None)
            }
            (
                ViewState::ViewingDetail {
                    pin,
                    confirm_delete: true,
                }
                | ViewState::Editing {
                    pin,
                    confirm_delete: true,
                },
                ViewEvent::DeleteConfirmed,
            ) => {
                store.authorize_mutation(pin)?;
                if self.in_flight.is_some() {
                    tracing::debug!(%pin, "request already in flight, ignoring delete");
                    return Ok(None);
                }
                let request = self.track(Pending::Delete(pin));
                Ok(Some(Command::Delete { request, pin }))
            }
            (ViewState::ViewingDetail { pin, .. }, ViewEvent::CopyRequested) => {
                let Some(record) = store.get(pin) else {
                    return Err(PinError::StaleTarget(pin));
                };
                if store.is_owner(record) == Some(true) {
                    tracing::debug!(%pin, "pin already belongs to caller, nothing to copy");
                    return Ok(None);
                }
                let request = self.issue();
                Ok(Some(Command::Copy { request, pin }))
            }
            (ViewState::Browsing, ViewEvent::StatsRequested) => {
                self.enter(ViewState::ViewingStats {
                    stats: StatsView::Loading,
                });
                let request = self.track(Pending::Stats);
                Ok(Some(Command::LoadStats { request }))
            }
            (ViewState::ViewingDetail { .. } | ViewState::ViewingStats { .. }, ViewEvent::Close) => {
                self.enter(ViewState::Browsing);
                Ok(None)
            }
            (ViewState::Creating { .. } | ViewState::Editing { .. }, ViewEvent::Cancel) => {
                self.enter(ViewState::Browsing);
                Ok(None)
            }
            (ViewState::Creating { .. }, ViewEvent::Submit) => {
                if self.in_flight.is_some() {
                    return Ok(None);
                }
                let submission = self.draft.to_submission()?;
                let request = self.track(Pending::Create);
                Ok(Some(Command::Create {
                    request,
                    ticket: store.create_ticket(),
                    submission,
                }))
            }
            (ViewState::Editing { pin, .. }, ViewEvent::Submit) => {
                if self.in_flight.is_some() {
                    return Ok(None);
                }
                let submission = self.draft.to_submission()?;
                store.authorize_mutation(pin)?;
                let request = self.track(Pending::Update(pin));
                Ok(Some(Command::Update {
                    request,
                    pin,
                    submission,
                }))
            }
            (state, event) => {
                tracing::debug!(state = state.name(), ?event, "event has no transition");
                Ok(None)
            }
        }
    }

    /// Replaces the draft while a form is open; ignored otherwise.
    pub fn edit_draft(&mut self, edit: impl FnOnce(&FormDraft) -> FormDraft) -> bool {
        if !self.state.is_form() {
            return false;
        }
        let next = edit(&self.draft);
        if next.id() != self.draft.id() {
            tracing::debug!("draft edit attempted to swap lineage, ignoring");
            return false;
        }
        self.draft = next;
        true
    }

    pub fn try_edit_draft(
        &mut self,
        edit: impl FnOnce(&FormDraft) -> Result<FormDraft, StagingError>,
    ) -> Result<bool, StagingError> {
        if !self.state.is_form() {
            return Ok(false);
        }
        let next = edit(&self.draft)?;
        Ok(self.edit_draft(|_| next))
    }

    pub fn request_image(&self, path: PathBuf) -> Option<Command> {
        if !self.state.is_form() {
            return None;
        }
        Some(Command::ReadImage {
            draft: self.draft.id(),
            path,
        })
    }

    /// Stages freshly read bytes, superseding any preview still being derived.
    pub fn stage_image(
        &mut self,
        draft: DraftId,
        file_name: String,
        bytes: Vec<u8>,
    ) -> Result<Option<Command>, StagingError> {
        if !self.state.is_form() || draft != self.draft.id() {
            tracing::debug!("image read for a draft that is gone, dropping");
            return Ok(None);
        }
        let (next, job) = self.draft.begin_image_staging(file_name, bytes)?;
        self.cancel_preview();
        self.preview = Some(job.handle());
        self.draft = next;
        Ok(Some(Command::DerivePreview(job)))
    }

    pub fn apply_preview(&mut self, outcome: PreviewOutcome) -> Result<(), StagingError> {
        let matches_current = self
            .preview
            .as_ref()
            .is_some_and(|handle| handle.ticket() == outcome.ticket);
        if !matches_current {
            tracing::debug!(ticket = ?outcome.ticket, "discarding stale preview");
            return Ok(());
        }
        self.preview = None;
        match self.draft.apply_preview(outcome) {
            Some(Ok(next)) => {
                self.draft = next;
                Ok(())
            }
            Some(Err(err)) => {
                self.draft = self.draft.discard_staged_image();
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Folds a finished create/update/delete into the view.
    ///
    /// `result` is the outcome after the store applied it. Failures keep the
    /// current view and draft so the user can retry or cancel.
    pub fn settle(
        &mut self,
        request: RequestId,
        result: Result<(), PinError>,
    ) -> Result<Settled, PinError> {
        let Some((current, pending)) = self.in_flight else {
            tracing::debug!(%request, "no request in flight, ignoring result");
            return Ok(Settled::Ignored);
        };
        if current != request || pending == Pending::Stats {
            tracing::debug!(%request, %current, "result for a different request, ignoring");
            return Ok(Settled::Ignored);
        }
        self.in_flight = None;
        match result {
            Ok(()) => {
                self.enter(ViewState::Browsing);
                Ok(Settled::Returned)
            }
            Err(err) if err.is_stale() => {
                tracing::debug!(%request, ?err, "stale result dropped");
                self.enter(ViewState::Browsing);
                Ok(Settled::Returned)
            }
            Err(err) => {
                match self.state {
                    ViewState::ViewingDetail { pin, .. } => {
                        self.state = ViewState::ViewingDetail {
                            pin,
                            confirm_delete: false,
                        };
                    }
                    ViewState::Editing { pin, .. } => {
                        self.state = ViewState::Editing {
                            pin,
                            confirm_delete: false,
                        };
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }

    pub fn settle_stats(&mut self, request: RequestId, result: Result<PinStats, PinError>) {
        if self.in_flight != Some((request, Pending::Stats)) {
            tracing::debug!(%request, "stats result no longer wanted");
            return;
        }
        self.in_flight = None;
        if !matches!(self.state, ViewState::ViewingStats { .. }) {
            return;
        }
        let stats = match result {
            Ok(stats) => StatsView::Ready(stats),
            Err(err) => {
                tracing::warn!(?err, "failed to load stats");
                StatsView::Failed(err.to_string())
            }
        };
        self.state = ViewState::ViewingStats { stats };
    }

    /// Closes any view bound to a pin the store no longer holds.
    pub fn reconcile(&mut self, store: &PinStore) -> bool {
        let Some(pin) = self.state.pin() else {
            return false;
        };
        if store.contains(pin) {
            return false;
        }
        tracing::info!(%pin, view = self.state.name(), "open pin left the collection, closing view");
        self.in_flight = None;
        self.enter(ViewState::Browsing);
        true
    }

    fn enter(&mut self, next: ViewState) {
        tracing::debug!(from = self.state.name(), to = next.name(), "view transition");
        self.cancel_preview();
        self.draft = self.draft.reset();
        self.in_flight = None;
        self.state = next;
    }

    fn cancel_preview(&mut self) {
        if let Some(handle) = self.preview.take() {
            handle.cancel();
        }
    }

    fn issue(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }

    fn track(&mut self, pending: Pending) -> RequestId {
        let request = self.issue();
        self.in_flight = Some((request, pending));
        request
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::filter::tests::pin;
    use crate::model::{PinCategory, PinRecord, PinStatus, Scope, Section, UserId};
    use crate::staging::preview::tests::tiny_png;
    use crate::staging::{SectionField, StagedImage, DEFAULT_MAX_IMAGE_BYTES};

    fn store_with(records: Vec<PinRecord>, caller: Option<UserId>) -> PinStore {
        let mut store = PinStore::new(Scope::Mine, caller);
        let ticket = store.begin_load(Scope::Mine);
        store.apply_load(ticket, Ok(records)).expect("load");
        store
    }

    fn coordinator() -> ViewCoordinator {
        ViewCoordinator::new(DEFAULT_MAX_IMAGE_BYTES)
    }

    fn here() -> Coordinate {
        Coordinate::normalized(41.737, -111.8338)
    }

    #[test]
    fn map_click_starts_creating_with_captured_location() {
        let store = store_with(Vec::new(), Some(UserId(1)));
        let mut view = coordinator();
        assert_matches!(view.handle(ViewEvent::MapClicked(here()), &store), Ok(None));
        assert_eq!(view.state(), &ViewState::Creating { coordinate: here() });
        assert_eq!(view.draft().coordinate(), Some(here()));
    }

    #[test]
    fn empty_title_submit_issues_nothing_and_stays() {
        let store = store_with(Vec::new(), Some(UserId(1)));
        let mut view = coordinator();
        view.handle(ViewEvent::MapClicked(here()), &store).expect("click");
        view.edit_draft(|draft| draft.with_title("   "));

        assert_matches!(
            view.handle(ViewEvent::Submit, &store),
            Err(PinError::Validation(StagingError::EmptyTitle))
        );
        assert_eq!(view.state().name(), "creating");
        assert!(!view.is_busy());
    }

    #[test]
    fn successful_create_returns_to_browsing_with_fresh_draft() {
        let store = store_with(Vec::new(), Some(UserId(1)));
        let mut view = coordinator();
        view.handle(ViewEvent::MapClicked(here()), &store).expect("click");
        view.edit_draft(|draft| draft.with_title("Logan"));
        let command = view.handle(ViewEvent::Submit, &store).expect("submit");
        let Some(Command::Create { request, submission, .. }) = command else {
            panic!("expected create command, got {command:?}");
        };
        assert_eq!(submission.coordinate, Some(here()));

        assert_matches!(
            view.settle(request, Ok(())),
            Ok(Settled::Returned)
        );
        assert_eq!(view.state(), &ViewState::Browsing);
        assert_eq!(view.draft().title(), "");
        assert_eq!(view.draft().coordinate(), None);
    }

    #[test]
    fn failed_submit_preserves_draft_for_retry() {
        let store = store_with(Vec::new(), Some(UserId(1)));
        let mut view = coordinator();
        view.handle(ViewEvent::MapClicked(here()), &store).expect("click");
        view.edit_draft(|draft| draft.with_title("Logan").add_section());
        let Some(Command::Create { request, .. }) =
            view.handle(ViewEvent::Submit, &store).expect("submit")
        else {
            panic!("expected create");
        };
        assert_matches!(
            view.settle(request, Err(PinError::Network("timeout".into()))),
            Err(PinError::Network(_))
        );
        assert_eq!(view.state().name(), "creating");
        assert_eq!(view.draft().title(), "Logan");
        assert_eq!(view.draft().sections().len(), 1);
        assert!(!view.is_busy());
    }

    #[test]
    fn edit_prepopulates_and_cancel_leaves_store_alone() {
        let mut five = pin(5, PinStatus::Visited, PinCategory::Hotel);
        five.sections = vec![Section::new("Stay", "room 12")];
        five.image = Some(crate::model::ImageRef("/media/pin_images/five.jpg".into()));
        let store = store_with(vec![five.clone()], Some(UserId(1)));
        let mut view = coordinator();

        view.handle(ViewEvent::PinActivated(PinId(5)), &store).expect("open");
        view.handle(ViewEvent::EditRequested, &store).expect("edit");
        assert_eq!(
            view.state(),
            &ViewState::Editing {
                pin: PinId(5),
                confirm_delete: false
            }
        );
        let draft = view.draft();
        assert_eq!(draft.title(), five.title);
        assert_eq!(draft.sections(), five.sections.as_slice());
        assert_eq!(draft.status(), five.status);
        assert_eq!(draft.category(), five.category);
        assert_matches!(draft.image(), StagedImage::Inherited(_));

        view.edit_draft(|draft| {
            draft
                .with_title("scribble")
                .update_section(0, SectionField::Content, "changed")
                .expect("section")
        });
        view.handle(ViewEvent::Cancel, &store).expect("cancel");
        assert_eq!(view.state(), &ViewState::Browsing);
        assert_eq!(store.get(PinId(5)), Some(&five));
    }

    #[test]
    fn edit_with_cleared_title_is_refused_and_keeps_editing() {
        let store = store_with(
            vec![pin(5, PinStatus::Visited, PinCategory::Hotel)],
            Some(UserId(1)),
        );
        let mut view = coordinator();
        view.handle(ViewEvent::PinActivated(PinId(5)), &store).expect("open");
        view.handle(ViewEvent::EditRequested, &store).expect("edit");
        view.edit_draft(|draft| draft.with_title(""));

        assert_matches!(
            view.handle(ViewEvent::Submit, &store),
            Err(PinError::Validation(StagingError::EmptyTitle))
        );
        assert_eq!(
            view.state(),
            &ViewState::Editing {
                pin: PinId(5),
                confirm_delete: false
            }
        );
        assert!(!view.is_busy());
    }

    #[test]
    fn delete_from_editor_waits_for_confirmation() {
        let store = store_with(
            vec![pin(5, PinStatus::Visited, PinCategory::Hotel)],
            Some(UserId(1)),
        );
        let mut view = coordinator();
        view.handle(ViewEvent::PinActivated(PinId(5)), &store).expect("open");
        view.handle(ViewEvent::EditRequested, &store).expect("edit");
        view.edit_draft(|draft| draft.with_title("half typed"));

        // an unprompted confirm does nothing
        assert_matches!(view.handle(ViewEvent::DeleteConfirmed, &store), Ok(None));
        assert!(!view.is_busy());

        assert_matches!(view.handle(ViewEvent::DeleteRequested, &store), Ok(None));
        assert!(!view.is_busy());
        assert_eq!(
            view.state(),
            &ViewState::Editing {
                pin: PinId(5),
                confirm_delete: true
            }
        );

        view.handle(ViewEvent::DeleteDismissed, &store).expect("dismiss");
        assert_eq!(view.draft().title(), "half typed");
        assert_matches!(view.handle(ViewEvent::DeleteConfirmed, &store), Ok(None));

        view.handle(ViewEvent::DeleteRequested, &store).expect("ask");
        let command = view.handle(ViewEvent::DeleteConfirmed, &store).expect("confirm");
        assert_matches!(command, Some(Command::Delete { pin: PinId(5), .. }));
        assert!(view.is_busy());
    }

    #[test]
    fn non_owner_cannot_edit_or_delete_but_can_copy() {
        let mut theirs = pin(7, PinStatus::Favorite, PinCategory::Trip);
        theirs.owner = UserId(2);
        let store = store_with(vec![theirs], Some(UserId(1)));
        let mut view = coordinator();
        view.handle(ViewEvent::PinActivated(PinId(7)), &store).expect("open");

        assert_matches!(
            view.handle(ViewEvent::EditRequested, &store),
            Err(PinError::Authorization { .. })
        );
        assert_matches!(
            view.handle(ViewEvent::DeleteRequested, &store),
            Err(PinError::Authorization { .. })
        );
        assert_matches!(
            view.handle(ViewEvent::CopyRequested, &store),
            Ok(Some(Command::Copy { pin: PinId(7), .. }))
        );
        assert_eq!(
            view.state(),
            &ViewState::ViewingDetail {
                pin: PinId(7),
                confirm_delete: false
            }
        );
    }

    #[test]
    fn delete_requires_confirmation_then_closes_on_success() {
        let store = store_with(vec![pin(3, PinStatus::Visited, PinCategory::Trip)], Some(UserId(1)));
        let mut view = coordinator();
        view.handle(ViewEvent::PinActivated(PinId(3)), &store).expect("open");

        assert_matches!(view.handle(ViewEvent::DeleteConfirmed, &store), Ok(None));
        view.handle(ViewEvent::DeleteRequested, &store).expect("ask");
        let Some(Command::Delete { request, pin }) =
            view.handle(ViewEvent::DeleteConfirmed, &store).expect("confirm")
        else {
            panic!("expected delete");
        };
        assert_eq!(pin, PinId(3));
        assert_matches!(view.settle(request, Ok(())), Ok(Settled::Returned));
        assert_eq!(view.state(), &ViewState::Browsing);
    }

    #[test]
    fn deleting_open_pin_elsewhere_forces_browsing() {
        let records = vec![pin(9, PinStatus::Visited, PinCategory::Trip)];
        let mut store = store_with(records, Some(UserId(1)));
        let mut view = coordinator();
        view.handle(ViewEvent::PinActivated(PinId(9)), &store).expect("open");
        view.handle(ViewEvent::EditRequested, &store).expect("edit");
        view.edit_draft(|draft| draft.with_title("half done"));

        store.apply_remove(PinId(9), Ok(())).expect("remove");
        assert!(view.reconcile(&store));
        assert_eq!(view.state(), &ViewState::Browsing);
        assert_eq!(view.draft().title(), "");
        assert_eq!(view.draft().editing(), None);
    }

    #[test]
    fn result_for_abandoned_view_is_ignored() {
        let store = store_with(Vec::new(), Some(UserId(1)));
        let mut view = coordinator();
        view.handle(ViewEvent::MapClicked(here()), &store).expect("click");
        view.edit_draft(|draft| draft.with_title("Logan"));
        let Some(Command::Create { request, .. }) =
            view.handle(ViewEvent::Submit, &store).expect("submit")
        else {
            panic!("expected create");
        };
        view.handle(ViewEvent::Cancel, &store).expect("cancel");
        view.handle(ViewEvent::MapClicked(here()), &store).expect("click again");

        assert_matches!(view.settle(request, Ok(())), Ok(Settled::Ignored));
        assert_eq!(view.state().name(), "creating");
    }

    #[test]
    fn stats_view_fills_in_when_loaded() {
        let store = store_with(Vec::new(), Some(UserId(1)));
        let mut view = coordinator();
        let Some(Command::LoadStats { request }) =
            view.handle(ViewEvent::StatsRequested, &store).expect("stats")
        else {
            panic!("expected stats load");
        };
        let stats = PinStats {
            total_pins: 4,
            ..PinStats::default()
        };
        view.settle_stats(request, Ok(stats));
        assert_eq!(
            view.state(),
            &ViewState::ViewingStats {
                stats: StatsView::Ready(stats)
            }
        );
        view.handle(ViewEvent::Close, &store).expect("close");
        assert_eq!(view.state(), &ViewState::Browsing);
    }

    #[test]
    fn preview_for_previous_draft_is_discarded() {
        let store = store_with(Vec::new(), Some(UserId(1)));
        let mut view = coordinator();
        view.handle(ViewEvent::MapClicked(here()), &store).expect("click");
        let draft = view.draft().id();
        let Some(Command::DerivePreview(job)) = view
            .stage_image(draft, "photo.png".into(), tiny_png())
            .expect("stage")
        else {
            panic!("expected preview job");
        };
        let handle = job.handle();

        view.handle(ViewEvent::Cancel, &store).expect("cancel");
        assert!(handle.is_cancelled());
        assert!(job.run().is_none());
        assert_matches!(view.draft().image(), StagedImage::Empty);
    }

    #[test]
    fn preview_applies_to_current_draft() {
        let store = store_with(Vec::new(), Some(UserId(1)));
        let mut view = coordinator();
        view.handle(ViewEvent::MapClicked(here()), &store).expect("click");
        let draft = view.draft().id();
        let Some(Command::DerivePreview(job)) = view
            .stage_image(draft, "photo.png".into(), tiny_png())
            .expect("stage")
        else {
            panic!("expected preview job");
        };
        let outcome = job.run().expect("not cancelled");
        view.apply_preview(outcome).expect("apply");
        assert_matches!(view.draft().image(), StagedImage::Staged { preview, .. } if preview.dimensions == Some((4, 3)));
    }
}
