use rand::{thread_rng, Rng};


/// Random opaque token, used as admin session id and as cookie-based voter identity
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Token {
    token: String,
}

impl Token {
    pub const LENGTH: usize = 32;

    // List of chars used when building a token
    pub const CHARS: &'static str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

    /// Generate a new random token
    pub fn generate() -> Self {
        let chars = Self::CHARS.as_bytes();
        let mut rng = thread_rng();
        let token = (0..Self::LENGTH)
            .map(|_| chars[rng.gen_range(0..chars.len())] as char)
            .collect::<String>();
        Self { token }
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }
}

/// Display this token as a String
impl std::fmt::Display for Token {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.token, f)
    }
}

/// Try to parse a valid token from the given string slice, typically the value of a cookie
impl TryFrom<&str> for Token {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.len() != Self::LENGTH {
            return Err("Invalid token length");
        }
        if !value.chars().all(|c| Self::CHARS.contains(c)) {
            return Err("Invalid char");
        }
        Ok(Self { token: value.to_string() })
    }
}
