use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey,
                   Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{error::{bad, AppResult}, model::Tier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tier: Tier,
}

impl Claims {
    pub fn display_name(&self) -> String {
        self.name.clone().filter(|n| !n.is_empty()).unwrap_or_else(|| "anon".into())
    }
}

pub fn sign(uid:&str, name:Option<&str>, tier:Tier, secret:&str) -> AppResult<String> {
    let c = Claims { sub: uid.into(), exp: Utc::now().timestamp()+86_400,
                     name: name.map(String::from), tier };
    encode(&Header::default(), &c, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(bad)
}

pub fn verify(token:&str, secret:&str) -> Option<Claims> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()),
                     &Validation::new(Algorithm::HS256))
        .map(|d| d.claims).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_identity_and_tier() {
        let token = sign("u1", Some("Ada"), Tier::Pro, "s3cret").unwrap();
        let claims = verify(&token, "s3cret").unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.display_name(), "Ada");
        assert_eq!(claims.tier, Tier::Pro);
        assert!(verify(&token, "other").is_none());
    }
}
