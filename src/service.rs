use crate::{
    catalog::CatalogStore,
    config::{Category, Config},
    images::{ImageStore, ImageUpload},
    ledger::{VoteLedger, VoteRecord, VoterId},
    photo::{self, NewPhoto, Photo, PhotoFilter, PhotoId, PhotoPatch, PhotoView, SortOrder},
    session::AdminSession,
    Error, Result,
};
use std::path::Path;


/// Fields of a photo as submitted by the admin panel. On creation, title, author, category
/// and image are required ; on update, every field is optional and empty fields keep their
/// current value.
#[derive(Clone, Debug, Default)]
pub struct PhotoForm {
    pub title: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub year: Option<String>,
    pub image: Option<ImageUpload>,
}


/// Everything the contest does, on top of the catalog, the vote ledger and the image store.
/// This is the only place where the relation between photos and votes is maintained.
pub struct ContestService {
    catalog: CatalogStore,
    ledger: VoteLedger,
    images: ImageStore,
    categories: Vec<Category>,
    default_sort: SortOrder,
}

impl ContestService {
    pub fn new(catalog: CatalogStore, ledger: VoteLedger, images: ImageStore, categories: Vec<Category>, default_sort: SortOrder) -> Self {
        Self {
            catalog,
            ledger,
            images,
            categories,
            default_sort,
        }
    }

    /// Open the stores in the directories given by the config
    pub async fn open(config: &Config) -> Result<Self> {
        let data_dir = Path::new(&config.DATA_DIR);
        crate::storage::ensure_dir(data_dir).await?;
        let catalog = CatalogStore::open(data_dir).await?;
        let ledger = VoteLedger::open(data_dir).await?;
        let images = ImageStore::open(Path::new(&config.UPLOADS_DIR), config.MAX_UPLOAD_SIZE).await?;
        Ok(Self::new(catalog, ledger, images, config.CATEGORIES.clone(), config.default_sort_order()?))
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn default_sort(&self) -> &SortOrder {
        &self.default_sort
    }

    pub async fn photo_count(&self) -> usize {
        self.catalog.len().await
    }

    /// The photos matching the filter, with their vote counts freshly computed from the ledger
    pub async fn photos_with_votes(&self, filter: &PhotoFilter, sort: &SortOrder) -> Vec<PhotoView> {
        let photos = self.catalog.list().await;
        let counts = self.ledger.counts().await;
        let mut views = photos.into_iter()
            .filter(|photo| filter.matches(photo))
            .map(|photo| {
                let votes = counts.get(&photo.id).copied().unwrap_or(0);
                PhotoView::new(photo, votes)
            })
            .collect::<Vec<PhotoView>>();
        sort.sort(&mut views);
        views
    }

    /// Current number of votes for a photo
    pub async fn vote_count(&self, photo_id: PhotoId) -> usize {
        self.ledger.count_for(photo_id).await
    }

    /// Vote for a photo, once per voter
    pub async fn submit_vote(&self, photo_id: PhotoId, voter: &VoterId) -> Result<VoteRecord> {
        if !self.catalog.contains(photo_id).await {
            return Err(Error::NotFound);
        }
        let record = self.ledger.record_vote(voter, photo_id).await?;
        tracing::debug!(photo_id, "Vote recorded");
        Ok(record)
    }

    /// Add a photo to the contest
    pub async fn add_photo(&self, _session: &AdminSession, form: PhotoForm) -> Result<Photo> {
        let upload = form.image.ok_or_else(|| Error::validation("Photo file is required"))?;
        let (title, author, category) = match (required(form.title), required(form.author), required(form.category)) {
            (Some(title), Some(author), Some(category)) => (title, author, category),
            _ => return Err(Error::validation("Title, author, and category are required")),
        };
        self.check_category(&category)?;
        let year = form.year.as_deref().and_then(photo::parse_year).unwrap_or_else(photo::current_year);

        // Only store the image once everything else is known to be valid
        let image = self.images.store(&upload).await?;
        let new_photo = NewPhoto { title, author, category, year, image: image.clone() };
        match self.catalog.create(new_photo).await {
            Ok(photo) => {
                tracing::info!(id = photo.id, title = %photo.title, "Photo added");
                Ok(photo)
            }
            Err(error) => {
                self.images.remove(&image).await;
                Err(error)
            }
        }
    }

    /// Update some fields of a photo, and possibly replace its image
    pub async fn update_photo(&self, _session: &AdminSession, id: PhotoId, form: PhotoForm) -> Result<Photo> {
        if !self.catalog.contains(id).await {
            return Err(Error::NotFound);
        }

        let category = required(form.category);
        if let Some(category) = &category {
            self.check_category(category)?;
        }
        let mut patch = PhotoPatch {
            title: required(form.title),
            author: required(form.author),
            category,
            year: form.year.as_deref().and_then(photo::parse_year),
            image: None,
        };
        if let Some(upload) = &form.image {
            patch.image = Some(self.images.store(upload).await?);
        }
        let new_image = patch.image.clone();

        match self.catalog.update(id, patch).await {
            Ok(update) => {
                // The previous image isn't referenced anymore
                if new_image.is_some() && update.before.image != update.after.image {
                    self.images.remove(&update.before.image).await;
                }
                tracing::info!(id, "Photo updated");
                Ok(update.after)
            }
            Err(error) => {
                if let Some(image) = &new_image {
                    self.images.remove(image).await;
                }
                Err(error)
            }
        }
    }

    /// Remove a photo from the contest, along with its votes and its image
    pub async fn delete_photo(&self, _session: &AdminSession, id: PhotoId) -> Result<Photo> {
        let photo = self.catalog.delete(id).await?;

        // Votes for a deleted photo are never counted anyway, failing to remove them only
        // leaves some dead records behind
        match self.ledger.remove_for(id).await {
            Ok(removed) => tracing::info!(id, votes = removed, "Photo deleted"),
            Err(error) => tracing::warn!(id, "Photo deleted but its votes could not be removed : {}", error),
        }
        self.images.remove(&photo.image).await;
        Ok(photo)
    }

    /// Check that a category key is one of the configured categories, when there are some
    fn check_category(&self, category: &str) -> Result<()> {
        if self.categories.is_empty() || self.categories.iter().any(|c| c.id == category) {
            Ok(())
        } else {
            Err(Error::validation(format!("Unknown category \"{category}\"")))
        }
    }
}


/// Trimmed value of a text field, or None if it is missing or blank
fn required(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
