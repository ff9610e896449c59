use std::fmt;
use std::str::FromStr;

use strum::IntoEnumIterator;

use crate::model::{PinCategory, PinRecord, PinStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Only(PinStatus),
}

impl StatusFilter {
    pub fn matches(self, status: PinStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => wanted == status,
        }
    }

    /// all → wishlisted → visited → favorite → all
    pub fn cycle(self) -> Self {
        match self {
            StatusFilter::All => StatusFilter::Only(PinStatus::Wishlisted),
            StatusFilter::Only(PinStatus::Favorite) => StatusFilter::All,
            StatusFilter::Only(status) => StatusFilter::Only(status.next()),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(StatusFilter::All);
        }
        trimmed.to_lowercase().parse().map(StatusFilter::Only)
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusFilter::All => f.write_str("all"),
            StatusFilter::Only(status) => f.write_str(status.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(PinCategory),
}

impl CategoryFilter {
    pub fn matches(self, category: PinCategory) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(wanted) => wanted == category,
        }
    }

    pub fn cycle(self) -> Self {
        match self {
            CategoryFilter::All => CategoryFilter::Only(PinCategory::Trip),
            CategoryFilter::Only(PinCategory::Other) => CategoryFilter::All,
            CategoryFilter::Only(category) => CategoryFilter::Only(category.next()),
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(CategoryFilter::All);
        }
        trimmed.to_lowercase().parse().map(CategoryFilter::Only)
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryFilter::All => f.write_str("all"),
            CategoryFilter::Only(category) => f.write_str(category.as_str()),
        }
    }
}

/// The three predicates applied to a collection before it is rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinFilter {
    pub status: StatusFilter,
    pub category: CategoryFilter,
    pub search: String,
}

impl PinFilter {
    pub fn is_active(&self) -> bool {
        self.status != StatusFilter::All
            || self.category != CategoryFilter::All
            || !self.search.is_empty()
    }

    pub fn apply<'a, I>(&self, collection: I) -> Vec<&'a PinRecord>
    where
        I: IntoIterator<Item = &'a PinRecord>,
    {
        apply(collection, self.status, self.category, &self.search)
    }
}

/// Order-preserving subset of `collection` matching every predicate.
///
/// `search` is a case-insensitive substring test against the title and each
/// section's content; an empty string matches everything.
pub fn apply<'a, I>(
    collection: I,
    status: StatusFilter,
    category: CategoryFilter,
    search: &str,
) -> Vec<&'a PinRecord>
where
    I: IntoIterator<Item = &'a PinRecord>,
{
    let needle = search.to_lowercase();
    collection
        .into_iter()
        .filter(|pin| status.matches(pin.status))
        .filter(|pin| category.matches(pin.category))
        .filter(|pin| pin.matches_text(&needle))
        .collect()
}

/// Per-tab counts shown next to the status and category filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCounts {
    pub total: usize,
    statuses: [usize; 3],
    categories: [usize; 5],
}

impl FilterCounts {
    pub fn tally<'a, I>(collection: I) -> Self
    where
        I: IntoIterator<Item = &'a PinRecord>,
    {
        let mut counts = FilterCounts::default();
        for pin in collection {
            counts.total += 1;
            counts.statuses[status_slot(pin.status)] += 1;
            counts.categories[category_slot(pin.category)] += 1;
        }
        counts
    }

    pub fn status(&self, filter: StatusFilter) -> usize {
        match filter {
            StatusFilter::All => self.total,
            StatusFilter::Only(status) => self.statuses[status_slot(status)],
        }
    }

    pub fn category(&self, filter: CategoryFilter) -> usize {
        match filter {
            CategoryFilter::All => self.total,
            CategoryFilter::Only(category) => self.categories[category_slot(category)],
        }
    }

    pub fn status_tabs(&self) -> Vec<(StatusFilter, usize)> {
        std::iter::once(StatusFilter::All)
            .chain(PinStatus::iter().map(StatusFilter::Only))
            .map(|filter| (filter, self.status(filter)))
            .collect()
    }

    pub fn category_tabs(&self) -> Vec<(CategoryFilter, usize)> {
        std::iter::once(CategoryFilter::All)
            .chain(PinCategory::iter().map(CategoryFilter::Only))
            .map(|filter| (filter, self.category(filter)))
            .collect()
    }
}

fn status_slot(status: PinStatus) -> usize {
    match status {
        PinStatus::Wishlisted => 0,
        PinStatus::Visited => 1,
        PinStatus::Favorite => 2,
    }
}

fn category_slot(category: PinCategory) -> usize {
    match category {
        PinCategory::Trip => 0,
        PinCategory::Hotel => 1,
        PinCategory::Restaurant => 2,
        PinCategory::Attraction => 3,
        PinCategory::Other => 4,
    }
}
