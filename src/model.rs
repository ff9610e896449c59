use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use time::OffsetDateTime;

use crate::error::StagingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinId(pub u64);

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for PinId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(PinId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Scope {
    #[default]
    Mine,
    Public,
}

impl Scope {
    pub fn label(self) -> &'static str {
        match self {
            Scope::Mine => "My Pins",
            Scope::Public => "Public Pins",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Scope::Mine => Scope::Public,
            Scope::Public => Scope::Mine,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PinStatus {
    #[default]
    Wishlisted,
    Visited,
    Favorite,
}

impl PinStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn label(self) -> &'static str {
        match self {
            PinStatus::Wishlisted => "Wishlisted",
            PinStatus::Visited => "Visited",
            PinStatus::Favorite => "Favorite",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            PinStatus::Wishlisted => "⭐",
            PinStatus::Visited => "✓",
            PinStatus::Favorite => "❤",
        }
    }

    pub fn next(self) -> Self {
        match self {
            PinStatus::Wishlisted => PinStatus::Visited,
            PinStatus::Visited => PinStatus::Favorite,
            PinStatus::Favorite => PinStatus::Wishlisted,
        }
    }

    pub fn previous(self) -> Self {
        match self {
            PinStatus::Wishlisted => PinStatus::Favorite,
            PinStatus::Visited => PinStatus::Wishlisted,
            PinStatus::Favorite => PinStatus::Visited,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PinCategory {
    Trip,
    Hotel,
    Restaurant,
    Attraction,
    #[default]
    Other,
}

impl PinCategory {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn label(self) -> &'static str {
        match self {
            PinCategory::Trip => "Trip",
            PinCategory::Hotel => "Hotel",
            PinCategory::Restaurant => "Restaurant",
            PinCategory::Attraction => "Attraction",
            PinCategory::Other => "Other",
        }
    }

    pub fn plural_label(self) -> &'static str {
        match self {
            PinCategory::Trip => "Trips",
            PinCategory::Hotel => "Hotels",
            PinCategory::Restaurant => "Restaurants",
            PinCategory::Attraction => "Attractions",
            PinCategory::Other => "Other",
        }
    }

    pub fn next(self) -> Self {
        match self {
            PinCategory::Trip => PinCategory::Hotel,
            PinCategory::Hotel => PinCategory::Restaurant,
            PinCategory::Restaurant => PinCategory::Attraction,
            PinCategory::Attraction => PinCategory::Other,
            PinCategory::Other => PinCategory::Trip,
        }
    }

    pub fn previous(self) -> Self {
        match self {
            PinCategory::Trip => PinCategory::Other,
            PinCategory::Hotel => PinCategory::Trip,
            PinCategory::Restaurant => PinCategory::Hotel,
            PinCategory::Attraction => PinCategory::Restaurant,
            PinCategory::Other => PinCategory::Attraction,
        }
    }
}

/// A latitude/longitude pair that is always within range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, StagingError> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        if !valid {
            return Err(StagingError::InvalidCoordinate {
                lat: lat.to_string(),
                lon: lon.to_string(),
            });
        }
        Ok(Self { lat, lon })
    }

    /// Clamps latitude and wraps longitude, the way a panned map reports clicks.
    pub fn normalized(lat: f64, lon: f64) -> Self {
        let lat = if lat.is_finite() {
            lat.clamp(-90.0, 90.0)
        } else {
            0.0
        };
        let lon = if !lon.is_finite() {
            0.0
        } else if (-180.0..=180.0).contains(&lon) {
            lon
        } else {
            (lon + 180.0).rem_euclid(360.0) - 180.0
        };
        Self { lat, lon }
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    pub fn offset(&self, d_lat: f64, d_lon: f64) -> Self {
        Self::normalized(self.lat + d_lat, self.lon + d_lon)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Section {
    pub title: String,
    pub content: String,
}

impl Section {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WirePin", into = "WirePin")]
pub struct PinRecord {
    pub id: PinId,
    pub owner: UserId,
    pub owner_name: Option<String>,
    pub title: String,
    pub sections: Vec<Section>,
    pub status: PinStatus,
    pub category: PinCategory,
    pub is_public: bool,
    pub coordinate: Coordinate,
    pub image: Option<ImageRef>,
    pub created_at: OffsetDateTime,
}

impl PinRecord {
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner == user
    }

    pub fn matches_text(&self, needle_lower: &str) -> bool {
        if needle_lower.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(needle_lower)
            || self
                .sections
                .iter()
                .any(|section| section.content.to_lowercase().contains(needle_lower))
    }
}

#[serde_as]
#[derive(Serialize, Deserialize)]
struct WirePin {
    id: PinId,
    user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    title: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    sections: Vec<Section>,
    #[serde(default)]
    status: PinStatus,
    #[serde(default)]
    category: PinCategory,
    #[serde(default = "default_public")]
    is_public: bool,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    image: Option<ImageRef>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

fn default_public() -> bool {
    true
}

impl TryFrom<WirePin> for PinRecord {
    type Error = StagingError;

    fn try_from(wire: WirePin) -> Result<Self, Self::Error> {
        let coordinate = Coordinate::new(wire.latitude, wire.longitude)?;
        Ok(Self {
            id: wire.id,
            owner: wire.user_id,
            owner_name: wire.user,
            title: wire.title,
            sections: wire.sections,
            status: wire.status,
            category: wire.category,
            is_public: wire.is_public,
            coordinate,
            image: wire.image.filter(|image| !image.0.is_empty()),
            created_at: wire.created_at,
        })
    }
}

impl From<PinRecord> for WirePin {
    fn from(record: PinRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.owner,
            user: record.owner_name,
            title: record.title,
            sections: record.sections,
            status: record.status,
            category: record.category,
            is_public: record.is_public,
            latitude: record.coordinate.lat(),
            longitude: record.coordinate.lon(),
            image: record.image,
            created_at: record.created_at,
        }
    }
}

/// Aggregate counts served by the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinStats {
    pub total_pins: u64,
    pub wishlisted_pins: u64,
    pub visited_pins: u64,
    pub favorite_pins: u64,
    pub trip_pins: u64,
    pub hotel_pins: u64,
    pub restaurant_pins: u64,
    pub attraction_pins: u64,
    pub other_pins: u64,
}

impl PinStats {
    pub fn for_status(&self, status: PinStatus) -> u64 {
        match status {
            PinStatus::Wishlisted => self.wishlisted_pins,
            PinStatus::Visited => self.visited_pins,
            PinStatus::Favorite => self.favorite_pins,
        }
    }

    pub fn for_category(&self, category: PinCategory) -> u64 {
        match category {
            PinCategory::Trip => self.trip_pins,
            PinCategory::Hotel => self.hotel_pins,
            PinCategory::Restaurant => self.restaurant_pins,
            PinCategory::Attraction => self.attraction_pins,
            PinCategory::Other => self.other_pins,
        }
    }
}

/// Raw image bytes queued for upload with a create or update.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Arc<[u8]>,
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// The payload of a create or update request.
#[derive(Debug, Clone, PartialEq)]
pub struct PinSubmission {
    pub title: String,
    pub sections: Vec<Section>,
    pub status: PinStatus,
    pub category: PinCategory,
    pub is_public: bool,
    /// Present for creates only.
    pub coordinate: Option<Coordinate>,
    pub image: Option<ImageUpload>,
}
