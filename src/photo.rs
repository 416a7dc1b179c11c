use crate::{Error, Result};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Photos are identified by a creation-timestamp-derived integer
pub type PhotoId = u64;


/// A photo submitted to the contest, as persisted in the catalog
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Photo {
    pub id: PhotoId,
    pub title: String,
    pub author: String,
    pub category: String,
    pub year: i32,
    #[serde(rename = "url")]
    pub image: ImageRef,
}

impl Photo {
    /// Apply a partial update : fields left to `None` keep their current value
    pub fn apply(&mut self, patch: PhotoPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(author) = patch.author {
            self.author = author;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(year) = patch.year {
            self.year = year;
        }
        if let Some(image) = patch.image {
            self.image = image;
        }
    }
}


/// Fields of a photo about to be created, already validated. The id is assigned by the catalog.
#[derive(Clone, Debug)]
pub struct NewPhoto {
    pub title: String,
    pub author: String,
    pub category: String,
    pub year: i32,
    pub image: ImageRef,
}

/// Partial update of a photo
#[derive(Clone, Debug, Default)]
pub struct PhotoPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub year: Option<i32>,
    pub image: Option<ImageRef>,
}


/// Public reference of a stored image, in the form `/uploads/<file name>`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub const PREFIX: &'static str = "/uploads/";

    /// Reference to a file stored in the uploads directory
    pub fn for_file(filename: &str) -> Self {
        Self(format!("{}{}", Self::PREFIX, filename))
    }

    /// Records written by older versions may contain a bare file name, or a path without
    /// the `/uploads/` prefix : turn them into a proper reference
    pub fn normalized(&self) -> Self {
        if self.0.starts_with(Self::PREFIX) {
            self.clone()
        } else {
            Self::for_file(self.0.trim_start_matches('/'))
        }
    }

    /// Name of the referenced file in the uploads directory, if this reference points to
    /// a plain file in it
    pub fn file_name(&self) -> Option<&str> {
        let normalized = self.0.trim_start_matches('/');
        let name = normalized.strip_prefix(Self::PREFIX.trim_start_matches('/')).unwrap_or(normalized);
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            None
        } else {
            Some(name)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}


/// A photo as returned to clients, with its vote count computed from the ledger
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PhotoView {
    pub id: PhotoId,
    pub title: String,
    pub author: String,
    pub category: String,
    pub year: i32,
    pub url: String,
    pub votes: usize,
}

impl PhotoView {
    pub fn new(photo: Photo, votes: usize) -> Self {
        Self {
            url: photo.image.normalized().to_string(),
            id: photo.id,
            title: photo.title,
            author: photo.author,
            category: photo.category,
            year: photo.year,
            votes,
        }
    }
}


/// Restriction on the listed photos ; `None` means no restriction on this field
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhotoFilter {
    pub category: Option<String>,
    pub year: Option<i32>,
}

impl PhotoFilter {
    pub fn matches(&self, photo: &Photo) -> bool {
        self.category.as_ref().map_or(true, |category| &photo.category == category)
            && self.year.map_or(true, |year| photo.year == year)
    }
}


/// Field a list of photos can be sorted on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortKey {
    Id,
    Title,
    Author,
    Year,
    Votes,
}

impl SortKey {
    /// Compare two photos on this field. Votes are ranked from most to least voted,
    /// every other field in ascending order.
    fn compare(&self, a: &PhotoView, b: &PhotoView) -> Ordering {
        match self {
            SortKey::Id => a.id.cmp(&b.id),
            SortKey::Title => natord::compare_ignore_case(&a.title, &b.title),
            SortKey::Author => natord::compare_ignore_case(&a.author, &b.author),
            SortKey::Year => a.year.cmp(&b.year),
            SortKey::Votes => b.votes.cmp(&a.votes),
        }
    }
}

impl TryFrom<&str> for SortKey {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "id" => Ok(SortKey::Id),
            "title" => Ok(SortKey::Title),
            "author" => Ok(SortKey::Author),
            "year" => Ok(SortKey::Year),
            "votes" => Ok(SortKey::Votes),
            other => Err(Error::validation(format!("Unknown sort field \"{other}\""))),
        }
    }
}


/// Order in which photos are listed. Without any key, photos keep their insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SortOrder {
    pub keys: Vec<SortKey>,
    pub reverse: bool,
}

impl SortOrder {
    /// Parse a comma-separated list of fields, such as `votes,title`
    pub fn parse(fields: &str, reverse: bool) -> Result<Self> {
        let keys = fields.split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(SortKey::try_from)
            .collect::<Result<Vec<SortKey>>>()?;
        Ok(Self { keys, reverse })
    }

    /// Sort the given photos in place. The sort is stable so ties keep their insertion order.
    pub fn sort(&self, photos: &mut [PhotoView]) {
        if !self.keys.is_empty() {
            photos.sort_by(|a, b| {
                self.keys.iter().fold(Ordering::Equal, |ordering, key| ordering.then_with(|| key.compare(a, b)))
            });
        }
        if self.reverse {
            photos.reverse();
        }
    }
}


/// Current year, used when a photo is submitted without a valid year
pub fn current_year() -> i32 {
    Utc::now().year()
}

/// Read a year from a form field the lenient way : leading whitespace is skipped and the
/// leading digits are used, so that `"2024"` and `"2024 (summer)"` both give 2024. Anything
/// that doesn't start with a positive number gives `None`.
pub fn parse_year(value: &str) -> Option<i32> {
    let digits = value.trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>();
    digits.parse::<i32>().ok().filter(|year| *year > 0)
}
