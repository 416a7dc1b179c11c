use crate::{photo::ImageRef, storage, Error, Result};
use chrono::Utc;
use image::ImageFormat;
use md5::{Digest, Md5};
use rocket::tokio::{fs::{self, OpenOptions}, io::AsyncWriteExt};
use std::io;
use std::path::{Path, PathBuf};


/// An image sent by a client, not validated yet
#[derive(Clone, Debug)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    /// Media type announced by the client, if any
    pub content_type: Option<String>,
}

impl ImageUpload {
    pub fn new(bytes: Vec<u8>, content_type: Option<&str>) -> Self {
        Self {
            bytes,
            content_type: content_type.map(|s| s.to_string()),
        }
    }
}


/// Formats accepted for contest photos
const ACCEPTED_FORMATS: [ImageFormat; 4] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Gif, ImageFormat::WebP];


/// Storage of the uploaded images, served as static files under `/uploads/`
#[derive(Debug)]
pub struct ImageStore {
    dir: PathBuf,
    max_size: u64,
}

impl ImageStore {
    pub const URL_PREFIX: &'static str = ImageRef::PREFIX;

    /// Open the uploads directory, creating it if needed
    pub async fn open(dir: &Path, max_size: u64) -> Result<Self> {
        storage::ensure_dir(dir).await?;
        Ok(Self {
            dir: dir.to_path_buf(),
            max_size,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Check that the upload is an image of a recognized format and not too large, and
    /// return its format. The announced media type is only a first filter : the content
    /// itself must look like an image.
    pub fn validate(&self, upload: &ImageUpload) -> Result<ImageFormat> {
        if upload.bytes.is_empty() {
            return Err(Error::validation("Photo file is empty"));
        }
        if upload.bytes.len() as u64 > self.max_size {
            return Err(Error::validation("File size too large"));
        }
        if let Some(content_type) = &upload.content_type {
            if !content_type.to_ascii_lowercase().starts_with("image/") {
                return Err(Error::validation("Only image files are allowed"));
            }
        }
        match image::guess_format(&upload.bytes) {
            Ok(format) if ACCEPTED_FORMATS.contains(&format) => Ok(format),
            _ => Err(Error::validation("Only image files are allowed")),
        }
    }

    /// Validate and write an uploaded image, and return the reference of the new file.
    /// File names are made from the upload time and the content's hash, and an existing
    /// file is never overwritten.
    pub async fn store(&self, upload: &ImageUpload) -> Result<ImageRef> {
        let format = self.validate(upload)?;
        let extension = format.extensions_str().first().copied().unwrap_or("img");
        let hash = format!("{:x}", Md5::digest(&upload.bytes));
        let stem = format!("{}-{}", Utc::now().timestamp_millis(), &hash[..12]);

        // Same content uploaded twice within the same millisecond : add a counter
        let mut attempt = 0;
        loop {
            let filename = match attempt {
                0 => format!("{stem}.{extension}"),
                n => format!("{stem}-{n}.{extension}"),
            };
            let path = self.dir.join(&filename);
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut file) => {
                    let written = match file.write_all(&upload.bytes).await {
                        Ok(()) => file.flush().await,
                        Err(error) => Err(error),
                    };
                    if let Err(error) = written {
                        // Don't leave a truncated image behind
                        drop(file);
                        let _ = fs::remove_file(&path).await;
                        return Err(Error::FileError(error, path));
                    }
                    tracing::info!("Stored image \"{}\" ({} bytes)", filename, upload.bytes.len());
                    return Ok(ImageRef::for_file(&filename));
                }
                Err(error) if error.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => attempt += 1,
                Err(error) => return Err(Error::FileError(error, path)),
            }
        }
    }

    /// Delete the file behind the given reference. Failures are logged and otherwise
    /// ignored : a leftover file is harmless.
    pub async fn remove(&self, image: &ImageRef) {
        let Some(filename) = image.file_name() else {
            tracing::warn!("Not removing image \"{}\" : not a file of the uploads directory", image);
            return;
        };
        let path = self.dir.join(filename);
        match fs::remove_file(&path).await {
            Ok(()) => tracing::info!("Removed image \"{}\"", filename),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => tracing::warn!("Unable to remove image \"{}\" : {}", path.display(), error),
        }
    }
}
