use jsonwebtoken::DecodingKey;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use jsonwebtoken::Validation;
use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

const TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iat: u64,
    exp: u64,
}

/// Gatekeeper of the controller's mutating routes: a master key buys a
/// one-hour HS256 bearer token.
pub struct CtrlAuth {
    master_key: String,
    jwt_secret: String,
}

impl CtrlAuth {
    pub fn new(master_key: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        CtrlAuth {
            master_key: master_key.into(),
            jwt_secret: jwt_secret.into(),
        }
    }

    /// Exchange the master key for a token; `None` for a wrong key.
    pub fn issue_token(&self, api_key: &str) -> Option<String> {
        if api_key != self.master_key {
            return None;
        }
        let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
        let claims = Claims {
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .ok()
    }

    pub fn verify(&self, token: &str) -> bool {
        match jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        ) {
            Ok(_) => true,
            Err(err) => {
                debug!("Token rejected: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_master_key_buys_a_valid_token() {
        let auth = CtrlAuth::new("CtrlMasterKey", "ControllerSecret");
        let token = auth.issue_token("CtrlMasterKey").unwrap();
        assert!(auth.verify(&token));
    }

    #[test]
    fn a_wrong_key_buys_nothing() {
        let auth = CtrlAuth::new("CtrlMasterKey", "ControllerSecret");
        assert!(auth.issue_token("guess").is_none());
    }

    #[test]
    fn foreign_tokens_are_rejected() {
        let auth = CtrlAuth::new("CtrlMasterKey", "ControllerSecret");
        let other = CtrlAuth::new("CtrlMasterKey", "OtherSecret");
        let token = other.issue_token("CtrlMasterKey").unwrap();
        assert!(!auth.verify(&token));
        assert!(!auth.verify("garbage"));
    }
}
