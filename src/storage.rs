use crate::{Error, Result};
use rocket::tokio::fs;
use serde::{de::DeserializeOwned, Serialize};
use std::io;
use std::path::{Path, PathBuf};


/// A JSON document persisted as a single file. The whole document is rewritten on every
/// save, through a temporary file renamed over the previous version so that a crash never
/// leaves a half-written document behind.
#[derive(Debug)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new<P>(path: P) -> Self
        where P: AsRef<Path>
    {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and deserialize the document. If the file doesn't exist yet, it is created
    /// with the default value of the document.
    pub async fn load_or_init<T>(&self) -> Result<T>
        where T: DeserializeOwned + Serialize + Default
    {
        match fs::read_to_string(&self.path).await {
            // An empty file is treated like a fresh document
            Ok(content) if content.trim().is_empty() => Ok(T::default()),

            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| Error::JsonError(e, self.path.clone())),

            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::info!("Creating empty data file \"{}\"", self.path.display());
                let value = T::default();
                self.save(&value).await?;
                Ok(value)
            }

            Err(error) => Err(Error::FileError(error, self.path.clone())),
        }
    }

    /// Serialize and write the whole document
    pub async fn save<T>(&self, value: &T) -> Result<()>
        where T: Serialize + ?Sized
    {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| Error::JsonError(e, self.path.clone()))?;

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        fs::write(&tmp_path, json).await
            .map_err(|e| Error::FileError(e, tmp_path.clone()))?;
        fs::rename(&tmp_path, &self.path).await
            .map_err(|e| Error::FileError(e, self.path.clone()))
    }
}


/// Check that the given directory from the config exists, and if not, try to create it
pub async fn ensure_dir(path: &Path) -> Result<()> {
    match fs::metadata(path).await {

        // The entity exists, check its type
        Ok(metadata) if metadata.is_dir() => Ok(()),

        // The given path exists but is not a valid directory so we can't create
        // it (probably a file?), return an AlreadyExists error
        Ok(_) => Err(Error::FileError(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("\"{}\" is not a valid directory", path.display())
        ), path.to_path_buf())),

        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            tracing::info!("Creating empty directory \"{}\"", path.display());
            fs::create_dir_all(path).await.map_err(|e| Error::FileError(e, path.to_path_buf()))
        }

        Err(error) => Err(Error::FileError(error, path.to_path_buf())),
    }
}
