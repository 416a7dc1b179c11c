use crate::{
    config::{Config, MAX_LOGIN_LOCKOUT_SECONDS, MAX_SESSION_TTL_HOURS},
    token::Token,
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use rocket::{
    http::{Cookie, SameSite, Status},
    request::{self, FromRequest},
    tokio::sync::Mutex,
    Request,
};
use std::collections::HashMap;


/// Capability checking the credentials presented by someone trying to log in as admin
pub trait CredentialCheck: Send + Sync {
    fn verify(&self, passphrase: &str) -> bool;
}

/// A single passphrase shared by every administrator. An empty passphrase never matches,
/// which disables the admin panel.
pub struct SharedPassphrase {
    secret: String,
}

impl SharedPassphrase {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

impl CredentialCheck for SharedPassphrase {
    fn verify(&self, passphrase: &str) -> bool {
        !self.secret.is_empty() && passphrase == self.secret
    }
}


/// Proof that the current request comes from a logged-in administrator. It can only be
/// obtained from the [`SessionGate`], either directly or as a request guard, and every
/// catalog mutation of the service requires one.
#[derive(Debug, Clone)]
pub struct AdminSession {
    token: Token,
    expires_at: DateTime<Utc>,
}

impl AdminSession {
    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Private cookie carrying this session to the client
    pub fn cookie(&self) -> Cookie<'static> {
        let max_age = (self.expires_at - Utc::now()).num_seconds().max(0);
        Cookie::build((SessionGate::COOKIE_NAME, self.token.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(rocket::time::Duration::seconds(max_age))
            .build()
    }
}


/// Admin authentication : checks the passphrase, issues session tokens, and tells whether
/// a token still designates a live session
pub struct SessionGate {
    credentials: Box<dyn CredentialCheck>,
    ttl: Duration,
    sessions: Mutex<HashMap<Token, DateTime<Utc>>>,
    throttle: Option<Mutex<LoginThrottle>>,
}

impl SessionGate {
    pub const COOKIE_NAME: &'static str = "contest_admin";

    pub fn new(credentials: Box<dyn CredentialCheck>, ttl: Duration) -> Self {
        Self {
            credentials,
            ttl,
            sessions: Mutex::new(HashMap::new()),
            throttle: None,
        }
    }

    /// Lock out a client address for `window` after `max_attempts` failed logins within
    /// the same `window`
    pub fn with_lockout(mut self, max_attempts: u32, window: Duration) -> Self {
        self.throttle = Some(Mutex::new(LoginThrottle {
            max_attempts,
            window,
            clients: HashMap::new(),
        }));
        self
    }

    pub fn from_config(config: &Config) -> Self {
        if config.ADMIN_PASSWORD.is_empty() {
            tracing::warn!("No ADMIN_PASSWORD configured, the admin panel is disabled");
        }
        let gate = Self::new(
            Box::new(SharedPassphrase::new(config.ADMIN_PASSWORD.as_str())),
            Duration::hours(config.SESSION_TTL_HOURS.min(MAX_SESSION_TTL_HOURS) as i64),
        );
        if config.LOGIN_MAX_ATTEMPTS > 0 {
            gate.with_lockout(config.LOGIN_MAX_ATTEMPTS, Duration::seconds(config.LOGIN_LOCKOUT_SECONDS.min(MAX_LOGIN_LOCKOUT_SECONDS) as i64))
        } else {
            gate
        }
    }

    /// Open a new session if the passphrase is correct. `client` identifies the caller
    /// for the lockout.
    pub async fn login(&self, passphrase: &str, client: &str) -> Result<AdminSession> {
        self.login_at(passphrase, client, Utc::now()).await
    }

    async fn login_at(&self, passphrase: &str, client: &str, now: DateTime<Utc>) -> Result<AdminSession> {
        // Keep the throttle locked for the whole attempt so that concurrent attempts are counted
        let mut throttle = match &self.throttle {
            Some(throttle) => Some(throttle.lock().await),
            None => None,
        };
        if let Some(throttle) = throttle.as_mut() {
            throttle.check(client, now)?;
        }

        if !self.credentials.verify(passphrase) {
            if let Some(throttle) = throttle.as_mut() {
                throttle.record_failure(client, now);
            }
            tracing::warn!(client, "Rejected admin login");
            return Err(Error::Unauthorized("Invalid credentials".to_string()));
        }
        if let Some(throttle) = throttle.as_mut() {
            throttle.record_success(client);
        }

        let expires_at = now.checked_add_signed(self.ttl)
            .ok_or_else(|| Error::ConfigError("session lifetime is out of range".to_string()))?;
        let session = AdminSession {
            token: Token::generate(),
            expires_at,
        };
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, expires_at| *expires_at > now);
        sessions.insert(session.token.clone(), session.expires_at);
        tracing::info!(client, "Admin logged in");
        Ok(session)
    }

    /// Return the session designated by the given token, if it is still alive
    pub async fn check(&self, token: &Token) -> Result<AdminSession> {
        self.check_at(token, Utc::now()).await
    }

    async fn check_at(&self, token: &Token, now: DateTime<Utc>) -> Result<AdminSession> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(token).copied() {
            Some(expires_at) if now < expires_at => Ok(AdminSession {
                token: token.clone(),
                expires_at,
            }),
            Some(_) => {
                sessions.remove(token);
                Err(Error::Unauthorized("Admin session expired".to_string()))
            }
            None => Err(Error::Unauthorized("Admin session required".to_string())),
        }
    }

    /// Close the session designated by the given token. Return false if there was none.
    pub async fn logout(&self, token: &Token) -> bool {
        let closed = self.sessions.lock().await.remove(token).is_some();
        if closed {
            tracing::info!("Admin logged out");
        }
        closed
    }
}


/// Failed login attempts per client address
struct LoginThrottle {
    max_attempts: u32,
    window: Duration,
    clients: HashMap<String, FailedLogins>,
}

struct FailedLogins {
    count: u32,
    since: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

impl LoginThrottle {
    /// Fail if this client is currently locked out, and forget failures that are too old
    fn check(&mut self, client: &str, now: DateTime<Utc>) -> Result<()> {
        let expired = match self.clients.get(client) {
            Some(FailedLogins { locked_until: Some(until), .. }) if now < *until => {
                tracing::warn!(client, "Admin login attempt during lockout");
                return Err(Error::Unauthorized("Too many failed login attempts, try again later".to_string()));
            }
            Some(FailedLogins { locked_until: Some(_), .. }) => true,
            Some(failed) => now - failed.since >= self.window,
            None => false,
        };
        if expired {
            self.clients.remove(client);
        }
        Ok(())
    }

    fn record_failure(&mut self, client: &str, now: DateTime<Utc>) {
        self.purge(now);
        let failed = self.clients.entry(client.to_string()).or_insert(FailedLogins {
            count: 0,
            since: now,
            locked_until: None,
        });
        failed.count += 1;
        if failed.count >= self.max_attempts {
            tracing::warn!(client, attempts = failed.count, "Locking out admin logins");
            failed.locked_until = Some(now + self.window);
        }
    }

    fn record_success(&mut self, client: &str) {
        self.clients.remove(client);
    }

    /// Forget the clients whose failures or lockout are over
    fn purge(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.clients.retain(|_, failed| match failed.locked_until {
            Some(until) => now < until,
            None => now - failed.since < window,
        });
    }
}


/// Implementation that tries to return an AdminSession from a Request, allowing this type
/// to be used as a request guard : the session token is read from the private cookie
#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminSession {
    type Error = Error;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let Some(gate) = request.rocket().state::<SessionGate>() else {
            return request::Outcome::Error((
                Status::InternalServerError,
                Error::ConfigError("no session gate is managed".to_string()),
            ));
        };

        let token = request.cookies()
            .get_private(SessionGate::COOKIE_NAME)
            .and_then(|cookie| Token::try_from(cookie.value()).ok());
        let result = match token {
            Some(token) => gate.check(&token).await,
            None => Err(Error::Unauthorized("Admin session required".to_string())),
        };
        match result {
            Ok(session) => request::Outcome::Success(session),
            Err(error) => request::Outcome::Error((error.status(), error)),
        }
    }
}
