use crate::{
    config::{Config, VoterIdentityKind},
    ledger::VoterId,
    token::Token,
    Error,
};
use rocket::{
    http::{Cookie, SameSite, Status},
    request::{self, FromRequest},
    Request,
};


/// Capability resolving the identity of the voter behind a request. The identity must be
/// stable for the same person during the contest and distinct for different people, to a
/// reasonable approximation.
pub trait VoterIdentity: Send + Sync {
    fn identify(&self, request: &Request<'_>) -> Option<VoterId>;
}


/// Identify voters by their IP address (the `X-Real-IP` header when behind a reverse
/// proxy). Weak : people sharing a network share a single vote.
pub struct ClientAddress;

impl VoterIdentity for ClientAddress {
    fn identify(&self, request: &Request<'_>) -> Option<VoterId> {
        request.client_ip().map(|ip| VoterId::new(ip.to_string()))
    }
}


/// Identify voters by a random token kept in a private (encrypted and authenticated)
/// cookie, handed out on the first vote
pub struct VoterCookie;

impl VoterCookie {
    pub const COOKIE_NAME: &'static str = "contest_voter";
}

impl VoterIdentity for VoterCookie {
    fn identify(&self, request: &Request<'_>) -> Option<VoterId> {
        let cookies = request.cookies();

        // Returning voter
        let known = cookies.get_private(Self::COOKIE_NAME)
            .and_then(|cookie| Token::try_from(cookie.value()).ok());
        if let Some(token) = known {
            return Some(VoterId::new(token.to_string()));
        }

        // New voter : the cookie is sent back with the response
        let token = Token::generate();
        cookies.add_private(
            Cookie::build((Self::COOKIE_NAME, token.to_string()))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .permanent()
                .build()
        );
        Some(VoterId::new(token.to_string()))
    }
}


/// The identity scheme selected in the config, managed by Rocket
pub struct IdentityProvider {
    inner: Box<dyn VoterIdentity>,
}

impl IdentityProvider {
    pub fn new(inner: Box<dyn VoterIdentity>) -> Self {
        Self { inner }
    }

    pub fn from_config(config: &Config) -> Self {
        if config.voter_address_from_header() {
            tracing::warn!("Voters are identified by the X-Real-IP header, make sure only the reverse proxy can reach the server");
        }
        match config.VOTER_IDENTITY {
            VoterIdentityKind::Cookie => Self::new(Box::new(VoterCookie)),
            VoterIdentityKind::Address => Self::new(Box::new(ClientAddress)),
        }
    }

    pub fn identify(&self, request: &Request<'_>) -> Option<VoterId> {
        self.inner.identify(request)
    }
}


/// Request guard resolving the voter behind the request
pub struct Voter(pub VoterId);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Voter {
    type Error = Error;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let Some(provider) = request.rocket().state::<IdentityProvider>() else {
            return request::Outcome::Error((
                Status::InternalServerError,
                Error::ConfigError("no voter identity provider is managed".to_string()),
            ));
        };
        match provider.identify(request) {
            Some(voter) => request::Outcome::Success(Voter(voter)),
            None => {
                tracing::warn!(uri = %request.uri(), "Unable to identify a voter");
                request::Outcome::Error((
                    Status::BadRequest,
                    Error::validation("Unable to identify the voter"),
                ))
            }
        }
    }
}
