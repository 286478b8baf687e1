//! Canonical documents produced by the harvester
//!
//! Field names on the wire (`GA Url`, `Course Id`, `Username`, `User Id`,
//! `Review Id`) are the contract shared with the web application and the
//! recommender, which indexes its rating matrix by `User Id` and `Course Id`.
//! Absent optional data is an explicit `None`, never a missing key.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Entity classes that live in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityClass {
    Courses,
    Users,
    Reviews,
}

impl EntityClass {
    pub const ALL: [EntityClass; 3] = [Self::Courses, Self::Users, Self::Reviews];

    /// Name used for the counter document and in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Courses => "Courses",
            Self::Users => "Users",
            Self::Reviews => "Reviews",
        }
    }

    /// Whether integer IDs for this class come from the sequence counter
    pub fn has_counter(&self) -> bool {
        matches!(self, Self::Courses | Self::Users)
    }

    /// Classes that need a sequence counter
    pub fn counted() -> impl Iterator<Item = EntityClass> {
        Self::ALL.into_iter().filter(Self::has_counter)
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document whose natural key maps to a counter-allocated integer ID
pub trait Document: Clone {
    const ENTITY: EntityClass;

    fn natural_key(&self) -> &str;
    fn id(&self) -> Option<i64>;
    fn set_id(&mut self, id: i64);

    /// Folds a duplicate of the same entity into this one
    fn absorb(&mut self, _other: Self) {}
}

/// Postal address block of a course page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(rename = "streetAddress")]
    pub street: Option<String>,
    #[serde(rename = "addressLocality")]
    pub locality: Option<String>,
    #[serde(rename = "addressRegion")]
    pub region: Option<String>,
    #[serde(rename = "postalCode")]
    pub postal_code: Option<String>,
    #[serde(rename = "addressCountry")]
    pub country: Option<String>,
    #[serde(rename = "telephone")]
    pub telephone: Option<String>,
    #[serde(rename = "Website")]
    pub website: Option<String>,
    /// Address items without a recognised field
    #[serde(rename = "Other")]
    pub other: BTreeMap<String, String>,
}

/// Course layout summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(rename = "Holes")]
    pub holes: Option<String>,
    #[serde(rename = "Par")]
    pub par: Option<String>,
    #[serde(rename = "Length")]
    pub length: Option<String>,
    #[serde(rename = "Slope")]
    pub slope: Option<String>,
    #[serde(rename = "Rating")]
    pub rating: Option<String>,
}

/// Stats for one tee box
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeeStats {
    #[serde(rename = "Length")]
    pub length: Option<String>,
    #[serde(rename = "Par")]
    pub par: Option<String>,
    #[serde(rename = "Slope")]
    pub slope: Option<String>,
    #[serde(rename = "Rating")]
    pub rating: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseDocument {
    #[serde(rename = "GA Url")]
    pub ga_url: String,
    #[serde(rename = "GA Id")]
    pub ga_id: Option<i64>,
    #[serde(rename = "Course Id")]
    pub course_id: Option<i64>,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Review Count")]
    pub review_count: u32,
    #[serde(rename = "Address")]
    pub address: Address,
    #[serde(rename = "Layout")]
    pub layout: Layout,
    /// Free-form "key info" pairs (type, architect, year built, ...)
    #[serde(rename = "Info")]
    pub key_info: BTreeMap<String, String>,
    #[serde(rename = "Tees")]
    pub tees: BTreeMap<String, TeeStats>,
    /// Amenity -> available
    #[serde(rename = "Extras")]
    pub extras: BTreeMap<String, bool>,
}

impl Document for CourseDocument {
    const ENTITY: EntityClass = EntityClass::Courses;

    fn natural_key(&self) -> &str {
        &self.ga_url
    }

    fn id(&self) -> Option<i64> {
        self.course_id
    }

    fn set_id(&mut self, id: i64) {
        self.course_id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    /// Normalized username, the natural key
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "User Id")]
    pub user_id: Option<i64>,
    #[serde(rename = "Display Name")]
    pub display_name: String,
    #[serde(rename = "Userpage")]
    pub profile_url: Option<String>,
    /// Inline profile attributes ("Handicap" -> "10-14", ...)
    #[serde(rename = "Attributes")]
    pub attributes: BTreeMap<String, String>,
    /// Valueless profile badges ("Top Contributor", ...)
    #[serde(rename = "Badges")]
    pub badges: BTreeSet<String>,
}

impl Document for UserDocument {
    const ENTITY: EntityClass = EntityClass::Users;

    fn natural_key(&self) -> &str {
        &self.username
    }

    fn id(&self) -> Option<i64> {
        self.user_id
    }

    fn set_id(&mut self, id: i64) {
        self.user_id = Some(id);
    }

    fn absorb(&mut self, other: Self) {
        if self.profile_url.is_none() {
            self.profile_url = other.profile_url;
        }
        for (key, value) in other.attributes {
            self.attributes.entry(key).or_insert(value);
        }
        self.badges.extend(other.badges);
        if self.user_id.is_none() {
            self.user_id = other.user_id;
        }
    }
}

/// Named secondary ratings of a review
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubRatings {
    #[serde(rename = "Conditions")]
    pub conditions: Option<f32>,
    #[serde(rename = "Difficulty")]
    pub difficulty: Option<f32>,
    #[serde(rename = "Layout")]
    pub layout: Option<f32>,
    #[serde(rename = "Pace")]
    pub pace: Option<f32>,
    #[serde(rename = "Staff")]
    pub staff: Option<f32>,
    #[serde(rename = "Value")]
    pub value: Option<f32>,
    #[serde(rename = "Amenities")]
    pub amenities: Option<f32>,
}

impl SubRatings {
    /// Sets a rating by its label; returns false for unknown labels
    pub fn set(&mut self, label: &str, value: f32) -> bool {
        let slot = match label.trim().to_ascii_lowercase().as_str() {
            "conditions" | "course conditions" => &mut self.conditions,
            "difficulty" => &mut self.difficulty,
            "layout" => &mut self.layout,
            "pace" | "pace of play" => &mut self.pace,
            "staff" | "friendliness" => &mut self.staff,
            "value" => &mut self.value,
            "amenities" | "off-course amenities" => &mut self.amenities,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDocument {
    /// Source review id; reviews without one cannot be deduplicated
    #[serde(rename = "Review Id")]
    pub review_id: Option<String>,
    #[serde(rename = "GA Url")]
    pub course_url: String,
    #[serde(rename = "Course Id")]
    pub course_id: Option<i64>,
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "User Id")]
    pub user_id: Option<i64>,
    #[serde(rename = "Rating")]
    pub rating: f32,
    #[serde(rename = "Title")]
    pub title: Option<String>,
    #[serde(rename = "Played On")]
    pub played_on: Option<String>,
    #[serde(rename = "Review")]
    pub text: String,
    #[serde(rename = "Ratings")]
    pub sub_ratings: SubRatings,
    /// Review tags such as "Walked" or "Played as a single"
    #[serde(rename = "Labels")]
    pub labels: BTreeSet<String>,
}

/// Normalizes a display name into the user natural key
///
/// Trims, collapses inner whitespace, and lowercases.
pub fn normalize_username(display_name: &str) -> String {
    display_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Extracts the numeric site id from a course URL (`/courses/1234-some-club`)
pub fn course_ga_id(course_url: &str) -> Option<i64> {
    let url = url::Url::parse(course_url).ok()?;
    let last = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    last.split('-').next()?.parse().ok()
}
