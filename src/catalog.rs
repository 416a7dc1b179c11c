use crate::{
    photo::{NewPhoto, Photo, PhotoId, PhotoPatch},
    storage::JsonFile,
    Error, Result,
};
use chrono::Utc;
use rocket::tokio::sync::Mutex;
use std::path::Path;


/// The photos of the contest, kept in memory and persisted to `photos.json` after every
/// change. All mutations hold the store's lock for the whole read-modify-write, file
/// write included, so that concurrent writers never lose each other's changes.
pub struct CatalogStore {
    file: JsonFile,
    photos: Mutex<Vec<Photo>>,
}

/// Result of an update, with the photo as it was before
#[derive(Debug, Clone)]
pub struct PhotoUpdate {
    pub before: Photo,
    pub after: Photo,
}

impl CatalogStore {
    pub const FILENAME: &'static str = "photos.json";

    /// Load the catalog from the given data directory
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let file = JsonFile::new(data_dir.join(Self::FILENAME));
        let photos: Vec<Photo> = file.load_or_init().await?;
        tracing::debug!("Loaded {} photo(s) from \"{}\"", photos.len(), file.path().display());
        Ok(Self {
            file,
            photos: Mutex::new(photos),
        })
    }

    /// Every photo, in insertion order
    pub async fn list(&self) -> Vec<Photo> {
        self.photos.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.photos.lock().await.len()
    }

    pub async fn get(&self, id: PhotoId) -> Option<Photo> {
        self.photos.lock().await.iter().find(|p| p.id == id).cloned()
    }

    pub async fn contains(&self, id: PhotoId) -> bool {
        self.photos.lock().await.iter().any(|p| p.id == id)
    }

    /// Add a photo to the catalog under a fresh id
    pub async fn create(&self, new_photo: NewPhoto) -> Result<Photo> {
        let mut photos = self.photos.lock().await;

        let photo = Photo {
            id: next_id(&photos, Utc::now().timestamp_millis()),
            title: new_photo.title,
            author: new_photo.author,
            category: new_photo.category,
            year: new_photo.year,
            image: new_photo.image,
        };
        photos.push(photo.clone());

        // Don't keep a photo that couldn't be persisted
        if let Err(error) = self.file.save(&*photos).await {
            photos.pop();
            return Err(error);
        }
        Ok(photo)
    }

    /// Apply a partial update to the photo with the given id
    pub async fn update(&self, id: PhotoId, patch: PhotoPatch) -> Result<PhotoUpdate> {
        let mut photos = self.photos.lock().await;
        let index = photos.iter().position(|p| p.id == id).ok_or(Error::NotFound)?;

        let before = photos[index].clone();
        photos[index].apply(patch);
        let after = photos[index].clone();

        if let Err(error) = self.file.save(&*photos).await {
            photos[index] = before;
            return Err(error);
        }
        Ok(PhotoUpdate { before, after })
    }

    /// Remove the photo with the given id and return it
    pub async fn delete(&self, id: PhotoId) -> Result<Photo> {
        let mut photos = self.photos.lock().await;
        let index = photos.iter().position(|p| p.id == id).ok_or(Error::NotFound)?;

        let photo = photos.remove(index);
        if let Err(error) = self.file.save(&*photos).await {
            photos.insert(index, photo);
            return Err(error);
        }
        Ok(photo)
    }
}


/// Ids are derived from the creation time in milliseconds, bumped when needed so that
/// they stay strictly increasing even for photos created within the same millisecond or
/// after the clock went backwards
fn next_id(photos: &[Photo], now_millis: i64) -> PhotoId {
    let now = now_millis.max(0) as PhotoId;
    match photos.iter().map(|p| p.id).max() {
        Some(max_id) => now.max(max_id + 1),
        None => now,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::photo::ImageRef;
    use std::sync::Arc;

    /// Turn the data file into a directory, so that every later save fails
    fn break_file(dir: &Path) {
        let path = dir.join(CatalogStore::FILENAME);
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
    }

    fn new_photo(title: &str) -> NewPhoto {
        NewPhoto {
            title: title.to_string(),
            author: "Ann".to_string(),
            category: "nature".to_string(),
            year: 2024,
            image: ImageRef::for_file(&format!("{title}.jpg")),
        }
    }

    #[test]
    fn ids_are_strictly_increasing() {
        assert_eq!(next_id(&[], 1000), 1000);
        let photo = Photo {
            id: 1000,
            title: String::new(),
            author: String::new(),
            category: String::new(),
            year: 2024,
            image: ImageRef::for_file("a.jpg"),
        };
        assert_eq!(next_id(&[photo.clone()], 1000), 1001);
        assert_eq!(next_id(&[photo.clone()], 400), 1001);
        assert_eq!(next_id(&[photo], 5000), 5000);
    }

    #[rocket::async_test]
    async fn create_list_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::open(dir.path()).await.unwrap();
        let first = catalog.create(new_photo("first")).await.unwrap();
        let second = catalog.create(new_photo("second")).await.unwrap();
        assert!(second.id > first.id);

        let titles = catalog.list().await.into_iter().map(|p| p.title).collect::<Vec<String>>();
        assert_eq!(titles, vec!["first", "second"]);

        // A fresh store reads the same catalog back from disk
        let reloaded = CatalogStore::open(dir.path()).await.unwrap();
        assert_eq!(reloaded.list().await, catalog.list().await);
    }

    #[rocket::async_test]
    async fn concurrent_creates_get_unique_ids() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(CatalogStore::open(dir.path()).await.unwrap());

        let tasks = (0..20).map(|i| {
            let catalog = catalog.clone();
            rocket::tokio::spawn(async move { catalog.create(new_photo(&format!("p{i}"))).await })
        }).collect::<Vec<_>>();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().id);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);

        let reloaded = CatalogStore::open(dir.path()).await.unwrap();
        assert_eq!(reloaded.len().await, 20);
    }

    #[rocket::async_test]
    async fn update_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::open(dir.path()).await.unwrap();
        let photo = catalog.create(new_photo("dawn")).await.unwrap();

        let update = catalog.update(photo.id, PhotoPatch {
            author: Some("Bob".to_string()),
            ..Default::default()
        }).await.unwrap();
        assert_eq!(update.before, photo);
        assert_eq!(update.after.author, "Bob");
        assert_eq!(update.after.title, "dawn");
        assert_eq!(update.after.id, photo.id);
        assert_eq!(catalog.get(photo.id).await, Some(update.after));
    }

    #[rocket::async_test]
    async fn unknown_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::open(dir.path()).await.unwrap();
        assert!(matches!(catalog.update(42, PhotoPatch::default()).await, Err(Error::NotFound)));
        assert!(matches!(catalog.delete(42).await, Err(Error::NotFound)));
    }

    #[rocket::async_test]
    async fn second_delete_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::open(dir.path()).await.unwrap();
        let photo = catalog.create(new_photo("dawn")).await.unwrap();

        assert_eq!(catalog.delete(photo.id).await.unwrap(), photo);
        assert!(!catalog.contains(photo.id).await);
        assert!(matches!(catalog.delete(photo.id).await, Err(Error::NotFound)));
    }

    #[rocket::async_test]
    async fn reads_records_written_by_older_versions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CatalogStore::FILENAME), r#"[
            {"id": 1700000000000, "title": "Old", "author": "Ann", "category": "city",
             "year": 2023, "url": "1700000000000-1.jpg", "votes": 0}
        ]"#).unwrap();

        let catalog = CatalogStore::open(dir.path()).await.unwrap();
        let photo = catalog.get(1700000000000).await.unwrap();
        assert_eq!(photo.title, "Old");
        assert_eq!(photo.image.normalized().as_str(), "/uploads/1700000000000-1.jpg");
    }

    #[rocket::async_test]
    async fn failed_save_leaves_the_catalog_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::open(dir.path()).await.unwrap();
        let photo = catalog.create(new_photo("dawn")).await.unwrap();
        break_file(dir.path());

        assert!(matches!(catalog.create(new_photo("dusk")).await, Err(Error::FileError(..))));
        let patch = PhotoPatch { title: Some("dusk".to_string()), ..Default::default() };
        assert!(matches!(catalog.update(photo.id, patch).await, Err(Error::FileError(..))));
        assert!(matches!(catalog.delete(photo.id).await, Err(Error::FileError(..))));

        assert_eq!(catalog.list().await, vec![photo]);
    }
}
