use crate::{photo::SortOrder, Error, Result};
use base64::{prelude::BASE64_STANDARD, Engine};
use itertools::Itertools;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::{env, fs, io::ErrorKind};
use std::path::{Path, PathBuf};


/// Name of the main config file in the app's folder
pub const FILENAME: &'static str = "contest.config";

/// Environment variable that can be used to read the config from another location
pub const PATH_VARIABLE: &'static str = "CONTEST_CONFIG";


/// The app's config
#[allow(non_snake_case)]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// IP address to serve on.
    /// Default : 127.0.0.1
    #[serde(default="config_default_address")]
    pub ADDRESS: String,

    /// Port to serve on.
    /// Default : 4080
    #[serde(default="config_default_port")]
    pub PORT: u16,

    /// Path to the directory holding `photos.json` and `votes.json`. Write access is required.
    /// Default : `data/` in the app's folder
    #[serde(default="config_default_data_dir")]
    pub DATA_DIR: String,

    /// Path to the directory where uploaded images are stored and served from `/uploads/`.
    /// Write access is required.
    /// Default : `uploads/` in the app's folder
    #[serde(default="config_default_uploads_dir")]
    pub UPLOADS_DIR: String,

    /// Passphrase giving access to the admin panel. Leave empty to disable the admin panel.
    /// Default : empty
    #[serde(default)]
    pub ADMIN_PASSWORD: String,

    /// Base64-encoded key (32 or 64 bytes) used to encrypt the session and voter cookies.
    /// Leave empty to generate a random key on every start, which logs out every admin
    /// and forgets every cookie-based voter identity on restart.
    /// Default : empty
    #[serde(default)]
    pub SECRET_KEY: String,

    /// Lifetime of an admin session, in hours, at most 87600 (10 years).
    /// Default : 24
    #[serde(default="config_default_session_ttl_hours")]
    pub SESSION_TTL_HOURS: u32,

    /// Max size of an uploaded image, in bytes.
    /// Default : 10485760 (10 MiB)
    #[serde(default="config_default_max_upload_size")]
    pub MAX_UPLOAD_SIZE: u64,

    /// How voters are told apart : `cookie` gives every browser a random identity kept in an
    /// encrypted cookie, `address` uses the client's IP address.
    /// Default : cookie
    #[serde(default)]
    pub VOTER_IDENTITY: VoterIdentityKind,

    /// If enabled, the client address is read from the `X-Real-IP` header set by the reverse
    /// proxy instead of the address of the connection. The header is trusted as is : only
    /// enable this when the server is reachable through the proxy alone, otherwise clients
    /// can pick their own address, and get as many votes as they want with
    /// `VOTER_IDENTITY = "address"`.
    /// Default : true
    #[serde(default="config_default_true")]
    pub BEHIND_REVERSE_PROXY: bool,

    /// Number of failed admin logins from the same address after which this address is
    /// locked out. 0 disables the lockout.
    /// Default : 0
    #[serde(default)]
    pub LOGIN_MAX_ATTEMPTS: u32,

    /// Duration of the lockout, in seconds, at most 86400 (1 day). Failed attempts older than
    /// this are forgotten.
    /// Default : 300
    #[serde(default="config_default_login_lockout_seconds")]
    pub LOGIN_LOCKOUT_SECONDS: u64,

    /// Fields(s) to use to sort the photos when the client doesn't ask for a specific order.
    /// This can be a single field or a comma-separated list of fields for multi-ordering.
    /// Available fields : `id`, `title`, `author`, `year`, `votes`
    /// Default : empty (insertion order)
    #[serde(default)]
    pub SORT_ORDER: String,

    /// If enabled, the default sort order of the photos will be reversed.
    /// Default : false
    #[serde(default)]
    pub REVERSE_SORT_ORDER: bool,

    /// Categories photos can be submitted in. Leave empty to accept any category key.
    #[serde(default="config_default_categories")]
    pub CATEGORIES: Vec<Category>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ADDRESS: config_default_address(),
            PORT: config_default_port(),
            DATA_DIR: config_default_data_dir(),
            UPLOADS_DIR: config_default_uploads_dir(),
            ADMIN_PASSWORD: String::new(),
            SECRET_KEY: String::new(),
            SESSION_TTL_HOURS: config_default_session_ttl_hours(),
            MAX_UPLOAD_SIZE: config_default_max_upload_size(),
            VOTER_IDENTITY: VoterIdentityKind::default(),
            BEHIND_REVERSE_PROXY: config_default_true(),
            LOGIN_MAX_ATTEMPTS: 0,
            LOGIN_LOCKOUT_SECONDS: config_default_login_lockout_seconds(),
            SORT_ORDER: String::new(),
            REVERSE_SORT_ORDER: false,
            CATEGORIES: config_default_categories(),
        }
    }
}

impl Config {

    /// Location of the main config file : `CONTEST_CONFIG` if set, `contest.config` otherwise
    pub fn path() -> PathBuf {
        env::var_os(PATH_VARIABLE)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(FILENAME))
    }

    /// Read the main config file and deserialize it into a Config struct
    pub fn read() -> Result<Self> {
        Self::read_path(Self::path())
    }

    /// Read the config file at the given location and deserialize it into a Config struct.
    /// A missing file is not an error : every setting takes its default value.
    pub fn read_path<P>(path: P) -> Result<Self>
        where P: AsRef<Path>
    {
        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                tracing::warn!("Config file \"{}\" not found, using default settings", path.as_ref().display());
                Ok(Self::default())
            }
            Err(error) => Err(Error::FileError(error, path.as_ref().to_path_buf())),
        }
    }

    /// Deserialize the content of a config file
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Try to read and parse the config file
    /// In case of error, print it to stderr and exit with a status code of -1
    pub fn read_or_exit() -> Self {
        Self::read()
            .and_then(|config| config.check().map(|_| config))
            .unwrap_or_else(|e| match e {
                Error::FileError(error, path) => {
                    eprintln!("Error, unable to open the config file \"{}\" : {}", path.display(), error);
                    std::process::exit(-1);
                }
                Error::ParseError(error) => {
                    eprintln!("Error, unable to parse the config file \"{}\" : {}", Self::path().display(), error);
                    std::process::exit(-1);
                }
                error => {
                    eprintln!("Error, invalid config file \"{}\" : {}", Self::path().display(), error);
                    std::process::exit(-1);
                }
            })
    }

    /// Check the consistency of the settings
    pub fn check(&self) -> Result<()> {
        if self.SESSION_TTL_HOURS == 0 || self.SESSION_TTL_HOURS > MAX_SESSION_TTL_HOURS {
            return Err(Error::ConfigError(format!("SESSION_TTL_HOURS must be between 1 and {MAX_SESSION_TTL_HOURS}")));
        }
        if self.LOGIN_LOCKOUT_SECONDS > MAX_LOGIN_LOCKOUT_SECONDS {
            return Err(Error::ConfigError(format!("LOGIN_LOCKOUT_SECONDS must be at most {MAX_LOGIN_LOCKOUT_SECONDS}")));
        }
        if self.MAX_UPLOAD_SIZE == 0 {
            return Err(Error::ConfigError("MAX_UPLOAD_SIZE must be greater than 0".to_string()));
        }
        if let Some(category) = self.CATEGORIES.iter().find(|c| c.id.trim().is_empty()) {
            return Err(Error::ConfigError(format!("category \"{}\" has an empty ID", category.name)));
        }
        let duplicates = self.CATEGORIES.iter().map(|c| c.id.as_str()).duplicates().collect::<Vec<&str>>();
        if !duplicates.is_empty() {
            return Err(Error::ConfigError(format!("duplicate category IDs : {}", duplicates.join(", "))));
        }
        self.default_sort_order()
            .map_err(|e| Error::ConfigError(format!("invalid SORT_ORDER : {e}")))?;
        Ok(())
    }

    /// Whether voters are told apart by an address read from a header the client can set
    /// itself, which only holds if the server is reachable through the proxy alone
    pub fn voter_address_from_header(&self) -> bool {
        self.VOTER_IDENTITY == VoterIdentityKind::Address && self.BEHIND_REVERSE_PROXY
    }

    /// Sort order applied when a client doesn't request one
    pub fn default_sort_order(&self) -> Result<SortOrder> {
        SortOrder::parse(&self.SORT_ORDER, self.REVERSE_SORT_ORDER)
    }

    /// Key used by Rocket to encrypt private cookies, as a base64 string. A random key is
    /// generated when none is configured.
    pub fn secret_key(&self) -> Result<String> {
        let key = self.SECRET_KEY.trim();
        if key.is_empty() {
            tracing::warn!("No SECRET_KEY configured, sessions will not survive a restart");
            let mut bytes = [0u8; 64];
            rand::thread_rng().fill_bytes(&mut bytes);
            return Ok(BASE64_STANDARD.encode(bytes));
        }

        // Rocket only accepts 32 or 64 bytes keys
        match BASE64_STANDARD.decode(key) {
            Ok(bytes) if bytes.len() == 32 || bytes.len() == 64 => Ok(key.to_string()),
            Ok(bytes) => Err(Error::ConfigError(format!("SECRET_KEY must be 32 or 64 bytes long, got {}", bytes.len()))),
            Err(error) => Err(Error::ConfigError(format!("SECRET_KEY is not valid base64 : {error}"))),
        }
    }

}


/// Supported ways of identifying a voter
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VoterIdentityKind {
    #[default]
    Cookie,
    Address,
}


/// A contest category, as listed in the config file under `[[CATEGORIES]]`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Category {
    #[serde(rename(deserialize = "ID"))]
    pub id: String,

    #[serde(rename(deserialize = "NAME"))]
    pub name: String,
}

impl Category {
    pub fn new(id: &str, name: &str) -> Self {
        Self { id: id.to_string(), name: name.to_string() }
    }
}


// Default values for config keys

fn config_default_address() -> String {
    "127.0.0.1".to_string()
}

fn config_default_port() -> u16 {
    4080
}

fn config_default_data_dir() -> String {
    "data".to_string()
}

fn config_default_uploads_dir() -> String {
    "uploads".to_string()
}

fn config_default_true() -> bool {
    true
}

fn config_default_session_ttl_hours() -> u32 {
    24
}

/// Upper bound of SESSION_TTL_HOURS, 10 years
pub const MAX_SESSION_TTL_HOURS: u32 = 10 * 365 * 24;

/// Upper bound of LOGIN_LOCKOUT_SECONDS, 1 day
pub const MAX_LOGIN_LOCKOUT_SECONDS: u64 = 24 * 60 * 60;

fn config_default_max_upload_size() -> u64 {
    10 * 1024 * 1024 // bytes
}

fn config_default_login_lockout_seconds() -> u64 {
    300
}

fn config_default_categories() -> Vec<Category> {
    vec![
        Category::new("city", "The city"),
        Category::new("emotions", "Emotions in motion"),
        Category::new("science", "Scientific discoveries"),
        Category::new("retro", "Retro and modern"),
        Category::new("family", "Family and traditions"),
        Category::new("animals", "Animal life"),
        Category::new("nature", "Nature around us"),
        Category::new("free", "Free theme"),
    ]
}
