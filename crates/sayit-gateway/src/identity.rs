use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use sayit_types::api::Claims;

/// Validate an HS256 token from the identity provider and return its user id.
pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(secret: &str, sub: Uuid, exp: usize) -> String {
        encode(
            &Header::default(),
            &Claims { sub, exp },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn in_an_hour() -> usize {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        (now + 3600) as usize
    }

    #[test]
    fn accepts_valid_token() {
        let user = Uuid::new_v4();
        assert_eq!(verify_token(&token("s3cret", user, in_an_hour()), "s3cret").unwrap(), user);
    }

    #[test]
    fn rejects_wrong_secret_and_expired() {
        let user = Uuid::new_v4();
        assert!(verify_token(&token("s3cret", user, in_an_hour()), "other").is_err());
        assert!(verify_token(&token("s3cret", user, 1_000), "s3cret").is_err());
        assert!(verify_token("not-a-jwt", "s3cret").is_err());
    }
}
