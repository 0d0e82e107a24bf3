//! Caller identity taken from request headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use domain::{GuestId, Identity, UserId};

use crate::error::ApiError;

/// Header carrying the signed-in user's id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the guest session id.
pub const GUEST_ID_HEADER: &str = "x-guest-id";

/// Who is calling: a signed-in user, a guest, or both during login.
///
/// Rejects the request with 400 when neither header is present.
#[derive(Debug, Clone)]
pub struct Caller {
    /// The identity cart operations act on. A signed-in user wins.
    pub identity: Identity,
    /// The guest session id, if one was sent alongside.
    pub guest_id: Option<GuestId>,
}

impl Caller {
    pub fn user_id(&self) -> Option<UserId> {
        self.identity.user_id()
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)
            .map(|raw| {
                uuid::Uuid::parse_str(raw)
                    .map(UserId::from_uuid)
                    .map_err(|e| ApiError::BadRequest(format!("Invalid {USER_ID_HEADER}: {e}")))
            })
            .transpose()?;
        let guest_id = header(parts, GUEST_ID_HEADER).map(GuestId::new);

        let identity = match (user_id, &guest_id) {
            (Some(user_id), _) => Identity::User(user_id),
            (None, Some(guest_id)) => Identity::Guest(guest_id.clone()),
            (None, None) => {
                return Err(ApiError::BadRequest(format!(
                    "Missing {USER_ID_HEADER} or {GUEST_ID_HEADER} header"
                )));
            }
        };
        Ok(Self { identity, guest_id })
    }
}
