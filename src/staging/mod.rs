use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;

use crate::error::StagingError;
use crate::model::{
    Coordinate, ImageRef, ImageUpload, PinCategory, PinId, PinRecord, PinStatus, PinSubmission,
    Section,
};

pub mod preview;

pub use preview::{ImagePreview, PreviewHandle, PreviewJob, PreviewOutcome, PreviewTicket};

pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

static NEXT_DRAFT: AtomicU64 = AtomicU64::new(1);

/// Identity of one draft lineage; every reset or redirect starts a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DraftId(pub(crate) u64);

impl DraftId {
    fn fresh() -> Self {
        DraftId(NEXT_DRAFT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DraftMode {
    Create { coordinate: Option<Coordinate> },
    Edit { pin: PinId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionField {
    Title,
    Content,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StagedImage {
    Empty,
    /// Bytes accepted, preview still being derived.
    Pending {
        upload: ImageUpload,
        ticket: PreviewTicket,
    },
    Staged {
        upload: ImageUpload,
        preview: ImagePreview,
    },
    /// The image already attached to the pin being edited.
    Inherited(ImageRef),
}

impl StagedImage {
    pub fn upload(&self) -> Option<&ImageUpload> {
        match self {
            StagedImage::Pending { upload, .. } | StagedImage::Staged { upload, .. } => {
                Some(upload)
            }
            StagedImage::Empty | StagedImage::Inherited(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, StagedImage::Pending { .. })
    }
}

/// An immutable snapshot of the create/edit form.
///
/// Every mutation returns a new snapshot; a snapshot held elsewhere is never
/// altered underneath its holder.
#[derive(Debug, Clone, PartialEq)]
pub struct FormDraft {
    id: DraftId,
    mode: DraftMode,
    title: String,
    sections: Vec<Section>,
    status: PinStatus,
    category: PinCategory,
    is_public: bool,
    image: StagedImage,
    committed_image: Option<ImageRef>,
    image_seq: u64,
    max_image_bytes: usize,
}

impl Default for FormDraft {
    fn default() -> Self {
        Self::new_pin()
    }
}

impl FormDraft {
    /// An empty "new pin" draft with no location and no image.
    pub fn new_pin() -> Self {
        Self {
            id: DraftId::fresh(),
            mode: DraftMode::Create { coordinate: None },
            title: String::new(),
            sections: Vec::new(),
            status: PinStatus::default(),
            category: PinCategory::default(),
            is_public: true,
            image: StagedImage::Empty,
            committed_image: None,
            image_seq: 0,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    pub fn for_location(coordinate: Coordinate) -> Self {
        Self {
            mode: DraftMode::Create {
                coordinate: Some(coordinate),
            },
            ..Self::new_pin()
        }
    }

    /// Copies the committed values of `pin`; the record itself is never referenced again.
    pub fn from_pin(pin: &PinRecord) -> Self {
        Self {
            mode: DraftMode::Edit { pin: pin.id },
            title: pin.title.clone(),
            sections: pin.sections.clone(),
            status: pin.status,
            category: pin.category,
            is_public: pin.is_public,
            image: pin
                .image
                .clone()
                .map(StagedImage::Inherited)
                .unwrap_or(StagedImage::Empty),
            committed_image: pin.image.clone(),
            ..Self::new_pin()
        }
    }

    pub fn reset(&self) -> Self {
        Self {
            max_image_bytes: self.max_image_bytes,
            ..Self::new_pin()
        }
    }

    pub fn with_image_limit(&self, max_image_bytes: usize) -> Self {
        Self {
            max_image_bytes,
            ..self.clone()
        }
    }

    pub fn id(&self) -> DraftId {
        self.id
    }

    pub fn mode(&self) -> DraftMode {
        self.mode
    }

    pub fn editing(&self) -> Option<PinId> {
        match self.mode {
            DraftMode::Edit { pin } => Some(pin),
            DraftMode::Create { .. } => None,
        }
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        match self.mode {
            DraftMode::Create { coordinate } => coordinate,
            DraftMode::Edit { .. } => None,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn status(&self) -> PinStatus {
        self.status
    }

    pub fn category(&self) -> PinCategory {
        self.category
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    pub fn image(&self) -> &StagedImage {
        &self.image
    }

    pub fn with_title(&self, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..self.clone()
        }
    }

    pub fn push_title_char(&self, ch: char) -> Self {
        let mut title = self.title.clone();
        title.push(ch);
        self.with_title(title)
    }

    pub fn pop_title_grapheme(&self) -> Self {
        self.with_title(without_last_grapheme(&self.title))
    }

    pub fn with_status(&self, status: PinStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub fn with_category(&self, category: PinCategory) -> Self {
        Self {
            category,
            ..self.clone()
        }
    }

    pub fn with_public(&self, is_public: bool) -> Self {
        Self {
            is_public,
            ..self.clone()
        }
    }

    pub fn add_section(&self) -> Self {
        let mut sections = self.sections.clone();
        sections.push(Section::default());
        Self {
            sections,
            ..self.clone()
        }
    }

    pub fn remove_section(&self, index: usize) -> Result<Self, StagingError> {
        self.check_section(index)?;
        let mut sections = self.sections.clone();
        sections.remove(index);
        Ok(Self {
            sections,
            ..self.clone()
        })
    }

    pub fn update_section(
        &self,
        index: usize,
        field: SectionField,
        value: impl Into<String>,
    ) -> Result<Self, StagingError> {
        self.check_section(index)?;
        let mut sections = self.sections.clone();
        let section = &mut sections[index];
        match field {
            SectionField::Title => section.title = value.into(),
            SectionField::Content => section.content = value.into(),
        }
        Ok(Self {
            sections,
            ..self.clone()
        })
    }

    pub fn section_field(&self, index: usize, field: SectionField) -> Option<&str> {
        self.sections.get(index).map(|section| match field {
            SectionField::Title => section.title.as_str(),
            SectionField::Content => section.content.as_str(),
        })
    }

    /// Stages `bytes` and derives the preview inline.
    pub fn stage_image(
        &self,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, StagingError> {
        let upload = self.accept_upload(file_name.into(), bytes)?;
        let preview = preview::derive_preview(&upload.bytes)?;
        Ok(Self {
            image: StagedImage::Staged { upload, preview },
            image_seq: self.image_seq + 1,
            ..self.clone()
        })
    }

    /// Stages `bytes` and hands back the preview derivation as a job to run elsewhere.
    pub fn begin_image_staging(
        &self,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<(Self, PreviewJob), StagingError> {
        let upload = self.accept_upload(file_name.into(), bytes)?;
        let ticket = PreviewTicket {
            draft: self.id,
            seq: self.image_seq + 1,
        };
        let job = PreviewJob::new(ticket, Arc::clone(&upload.bytes));
        let draft = Self {
            image: StagedImage::Pending { upload, ticket },
            image_seq: ticket.seq,
            ..self.clone()
        };
        Ok((draft, job))
    }

    /// Applies a finished preview, or `None` if it belongs to another draft or image.
    pub fn apply_preview(&self, outcome: PreviewOutcome) -> Option<Result<Self, StagingError>> {
        let StagedImage::Pending { upload, ticket } = &self.image else {
            return None;
        };
        if *ticket != outcome.ticket {
            return None;
        }
        Some(match outcome.result {
            Ok(preview) => Ok(Self {
                image: StagedImage::Staged {
                    upload: upload.clone(),
                    preview,
                },
                ..self.clone()
            }),
            Err(err) => Err(err),
        })
    }

    /// Drops a newly staged image, falling back to the one the pin already has.
    ///
    /// Uploads only ever replace an image, so there is no way to remove one.
    pub fn discard_staged_image(&self) -> Self {
        Self {
            image: self
                .committed_image
                .clone()
                .map(StagedImage::Inherited)
                .unwrap_or(StagedImage::Empty),
            image_seq: self.image_seq + 1,
            ..self.clone()
        }
    }

    pub fn to_submission(&self) -> Result<PinSubmission, StagingError> {
        if self.title.trim().is_empty() {
            return Err(StagingError::EmptyTitle);
        }
        let coordinate = match self.mode {
            DraftMode::Create { coordinate: None } => {
                return Err(StagingError::MissingCoordinate);
            }
            DraftMode::Create { coordinate } => coordinate,
            DraftMode::Edit { .. } => None,
        };
        Ok(PinSubmission {
            title: self.title.trim().to_string(),
            sections: self.sections.clone(),
            status: self.status,
            category: self.category,
            is_public: self.is_public,
            coordinate,
            image: self.image.upload().cloned(),
        })
    }

    fn check_section(&self, index: usize) -> Result<(), StagingError> {
        if index >= self.sections.len() {
            return Err(StagingError::SectionOutOfBounds {
                index,
                len: self.sections.len(),
            });
        }
        Ok(())
    }

    fn accept_upload(&self, file_name: String, bytes: Vec<u8>) -> Result<ImageUpload, StagingError> {
        if bytes.len() > self.max_image_bytes {
            return Err(StagingError::ImageTooLarge {
                len: bytes.len(),
                limit: self.max_image_bytes,
            });
        }
        let mime = preview::sniff_mime(&bytes).ok_or(StagingError::UnsupportedImage)?;
        let file_name = if file_name.trim().is_empty() {
            format!("image.{}", mime.trim_start_matches("image/"))
        } else {
            file_name
        };
        Ok(ImageUpload {
            file_name,
            mime,
            bytes: Arc::from(bytes),
        })
    }
}

pub(crate) fn without_last_grapheme(text: &str) -> String {
    match text.grapheme_indices(true).next_back() {
        Some((idx, _)) => text[..idx].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::preview::tests::tiny_png;
    use super::*;
    use crate::filter::tests::pin;
    use crate::model::ImageRef;
    use assert_matches::assert_matches;

    fn located() -> FormDraft {
        FormDraft::for_location(Coordinate::normalized(41.737, -111.8338))
    }

    #[test]
    fn sections_append_remove_and_reindex() {
        let draft = located().add_section().add_section().add_section();
        let draft = draft
            .update_section(0, SectionField::Title, "a")
            .and_then(|d| d.update_section(1, SectionField::Title, "b"))
            .and_then(|d| d.update_section(2, SectionField::Content, "c"))
            .expect("updates");
        let draft = draft.remove_section(1).expect("remove");
        assert_eq!(
            draft.sections(),
            &[Section::new("a", ""), Section::new("", "c")]
        );
        assert_eq!(draft.section_field(1, SectionField::Content), Some("c"));
        assert_matches!(
            draft.remove_section(2),
            Err(StagingError::SectionOutOfBounds { index: 2, len: 2 })
        );
    }

    #[test]
    fn mutations_leave_older_snapshots_untouched() {
        let original = located().with_title("Lisbon");
        let changed = original.add_section().with_title("Porto");
        assert_eq!(original.title(), "Lisbon");
        assert!(original.sections().is_empty());
        assert_eq!(changed.title(), "Porto");
        assert_eq!(changed.id(), original.id());
    }

    #[test]
    fn empty_title_produces_no_submission() {
        assert_eq!(located().to_submission(), Err(StagingError::EmptyTitle));
        assert_eq!(
            located().with_title("   ").to_submission(),
            Err(StagingError::EmptyTitle)
        );
    }

    #[test]
    fn create_submission_carries_coordinate_and_edit_omits_it() {
        let created = located().with_title("Logan").to_submission().expect("submission");
        assert_eq!(
            created.coordinate,
            Some(Coordinate::normalized(41.737, -111.8338))
        );

        let record = pin(5, PinStatus::Visited, PinCategory::Hotel);
        let edited = FormDraft::from_pin(&record).to_submission().expect("submission");
        assert_eq!(edited.coordinate, None);
        assert_eq!(edited.title, record.title);
        assert_eq!(edited.status, PinStatus::Visited);
        assert_eq!(edited.category, PinCategory::Hotel);
    }

    #[test]
    fn reset_draft_has_no_coordinate() {
        let draft = located().with_title("x").reset();
        assert_eq!(draft.title(), "");
        assert_eq!(draft.coordinate(), None);
        assert_eq!(draft.image(), &StagedImage::Empty);
        assert_eq!(
            draft.with_title("x").to_submission(),
            Err(StagingError::MissingCoordinate)
        );
    }

    #[test]
    fn discarding_a_staged_image_restores_the_committed_one() {
        let mut record = pin(9, PinStatus::Favorite, PinCategory::Trip);
        record.image = Some(ImageRef("/media/a.jpg".into()));
        let staged = FormDraft::from_pin(&record)
            .stage_image("new.png", tiny_png())
            .expect("stage");
        assert!(staged.to_submission().expect("submission").image.is_some());

        let discarded = staged.discard_staged_image();
        assert_eq!(
            discarded.image(),
            &StagedImage::Inherited(ImageRef("/media/a.jpg".into()))
        );
        assert!(discarded.to_submission().expect("submission").image.is_none());

        let fresh = located()
            .with_title("x")
            .stage_image("new.png", tiny_png())
            .expect("stage")
            .discard_staged_image();
        assert_eq!(fresh.image(), &StagedImage::Empty);
    }

    #[test]
    fn edit_draft_inherits_remote_image() {
        let mut record = pin(9, PinStatus::Favorite, PinCategory::Trip);
        record.image = Some(ImageRef("/media/a.jpg".into()));
        let draft = FormDraft::from_pin(&record);
        assert_eq!(draft.editing(), Some(record.id));
        assert_eq!(
            draft.image(),
            &StagedImage::Inherited(ImageRef("/media/a.jpg".into()))
        );
        assert!(draft.to_submission().expect("submission").image.is_none());
    }

    #[test]
    fn inline_staging_attaches_upload_and_preview() {
        let draft = located()
            .with_title("x")
            .stage_image("tower.png", tiny_png())
            .expect("stage");
        assert_matches!(draft.image(), StagedImage::Staged { preview, .. } if preview.mime == "image/png");
        let submission = draft.to_submission().expect("submission");
        let upload = submission.image.expect("upload");
        assert_eq!(upload.file_name, "tower.png");
        assert_eq!(&upload.bytes[..], &tiny_png()[..]);
    }

    #[test]
    fn oversized_or_unknown_images_are_refused() {
        let small = located().with_image_limit(8);
        assert_matches!(
            small.stage_image("big.png", tiny_png()),
            Err(StagingError::ImageTooLarge { limit: 8, .. })
        );
        assert_matches!(
            located().stage_image("notes.txt", b"hello".to_vec()),
            Err(StagingError::UnsupportedImage)
        );
    }

    #[test]
    fn preview_applies_only_to_matching_draft_and_image() {
        let draft = located();
        let (pending, job) = draft
            .begin_image_staging("a.png", tiny_png())
            .expect("stage");
        assert!(pending.image().is_pending());
        let outcome = job.run().expect("outcome");

        // a newer image supersedes the first
        let (newer, _second) = pending
            .begin_image_staging("b.png", tiny_png())
            .expect("stage");
        assert!(newer.apply_preview(outcome.clone()).is_none());

        // a reset draft never accepts an old preview
        assert!(pending.reset().apply_preview(outcome.clone()).is_none());

        let applied = pending
            .apply_preview(outcome)
            .expect("matching")
            .expect("preview ok");
        assert_matches!(applied.image(), StagedImage::Staged { upload, .. } if upload.file_name == "a.png");
    }

    #[test]
    fn title_editing_is_grapheme_aware() {
        let draft = located().with_title("Café👍🏽");
        assert_eq!(draft.pop_title_grapheme().title(), "Café");
        assert_eq!(FormDraft::new_pin().pop_title_grapheme().title(), "");
    }
}
