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

/// Issues and verifies the HS256 bearer tokens protecting the HTTP surface.
pub struct TokenAuthority {
    secret: String,
}

impl TokenAuthority {
    pub fn new(secret: impl Into<String>) -> Self {
        TokenAuthority {
            secret: secret.into(),
        }
    }

    /// A fresh one-hour token.
    pub fn issue(&self) -> Result<String, jsonwebtoken::errors::Error> {
        let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
        let claims = Claims {
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }

    pub fn verify(&self, token: &str) -> bool {
        match jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
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
    fn issued_tokens_verify() {
        let authority = TokenAuthority::new("EdgeOSDevSecret");
        let token = authority.issue().unwrap();
        assert!(authority.verify(&token));
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let authority = TokenAuthority::new("EdgeOSDevSecret");
        let other = TokenAuthority::new("SomethingElse");
        let token = other.issue().unwrap();
        assert!(!authority.verify(&token));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let authority = TokenAuthority::new("EdgeOSDevSecret");
        assert!(!authority.verify("not.a.token"));
    }
}
