//! Request signing with the master key or per-resource tokens.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use sha2::Sha256;

use crate::error::{ClientError, Result};
use crate::link::{trim_link, ResourcePath};
use crate::types::Permission;

type HmacSha256 = Hmac<Sha256>;

const MASTER_PREFIX: &str = "type=master&ver=1.0&sig=";

/// Current time in the RFC 1123 form expected by `x-ms-date`.
pub fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Payload covered by a master-key signature.
pub fn string_to_sign(verb: &str, resource_type: &str, resource_link: &str, date: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    )
}

/// Percent-encodes a token for the `authorization` header.
pub fn encode_header(token: &str) -> String {
    utf8_percent_encode(token, NON_ALPHANUMERIC).to_string()
}

/// Reverses [`encode_header`].
pub fn decode_header(value: &str) -> Result<String> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| ClientError::Unauthorized(format!("Malformed authorization header: {}", e)))
}

/// The account master key.
#[derive(Clone)]
pub struct MasterKey {
    key: Vec<u8>,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl MasterKey {
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ClientError::Unauthorized(format!("Master key is not base64: {}", e)))?;
        Ok(Self { key })
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| ClientError::Unauthorized(format!("Unusable master key: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    /// Builds the unencoded `type=master&ver=1.0&sig=...` token.
    pub fn sign(
        &self,
        verb: &str,
        resource_type: &str,
        resource_link: &str,
        date: &str,
    ) -> Result<String> {
        let payload = string_to_sign(verb, resource_type, resource_link, date);
        let signature = self.mac(&payload)?.finalize().into_bytes();
        Ok(format!("{}{}", MASTER_PREFIX, STANDARD.encode(signature)))
    }

    /// Checks a decoded master token against the request it claims to sign.
    pub fn verify(
        &self,
        token: &str,
        verb: &str,
        resource_type: &str,
        resource_link: &str,
        date: &str,
    ) -> bool {
        let Some(signature) = token.strip_prefix(MASTER_PREFIX) else {
            return false;
        };
        let Ok(signature) = STANDARD.decode(signature) else {
            return false;
        };
        let payload = string_to_sign(verb, resource_type, resource_link, date);
        match self.mac(&payload) {
            Ok(mac) => mac.verify_slice(&signature).is_ok(),
            Err(_) => false,
        }
    }
}

/// True when a decoded authorization token is a master-key signature.
pub fn is_master_token(token: &str) -> bool {
    token.starts_with(MASTER_PREFIX)
}

/// Resource tokens from a permission feed, indexed by the last segment of
/// each permission's resource link (an id or a rid).
#[derive(Debug, Clone, Default)]
pub struct ResourceTokens {
    by_segment: HashMap<String, String>,
}

impl ResourceTokens {
    pub fn from_permissions(permissions: &[Permission]) -> Self {
        let by_segment = permissions
            .iter()
            .filter(|p| !p.token.is_empty())
            .filter_map(|p| {
                trim_link(&p.resource)
                    .rsplit('/')
                    .next()
                    .filter(|segment| !segment.is_empty())
                    .map(|segment| (segment.to_string(), p.token.clone()))
            })
            .collect();
        Self { by_segment }
    }

    pub fn is_empty(&self) -> bool {
        self.by_segment.is_empty()
    }

    /// Token of the deepest resource on `path` covered by the feed.
    pub fn token_for(&self, path: &ResourcePath) -> Option<&str> {
        path.ids_deepest_first()
            .find_map(|id| self.by_segment.get(id))
            .map(String::as_str)
    }
}

/// How a client authenticates its requests.
#[derive(Debug, Clone)]
pub enum Credential {
    MasterKey(MasterKey),
    ResourceTokens(ResourceTokens),
}

impl Credential {
    /// Unencoded authorization token for a request.
    pub fn token(&self, verb: &str, path: &ResourcePath, date: &str) -> Result<String> {
        match self {
            Credential::MasterKey(key) => {
                key.sign(verb, path.resource_type(), &path.resource_link(), date)
            }
            Credential::ResourceTokens(tokens) => tokens
                .token_for(path)
                .map(str::to_string)
                .ok_or_else(|| {
                    ClientError::Unauthorized(format!(
                        "No resource token covers '{}'",
                        path.path()
                    ))
                }),
        }
    }

    /// Value for the `authorization` header.
    pub fn header(&self, verb: &str, path: &ResourcePath, date: &str) -> Result<String> {
        self.token(verb, path, date).map(|token| encode_header(&token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PermissionMode;

    const KEY: &str =
        "C2y6yDjf5/R+ob0N8A7Cgv30VRDJIWEHLM+4QDU5DE2nQ9nDuVTqobD4b8mGGyPMbIZnqyMsEcaGQy67XIw/Jw==";
    const DATE: &str = "Tue, 01 Oct 2024 10:00:00 GMT";

    #[test]
    fn payload_lowercases_everything_but_the_link() {
        assert_eq!(
            string_to_sign("GET", "Colls", "dbs/ToDoList/colls/Items", DATE),
            "get\ncolls\ndbs/ToDoList/colls/Items\ntue, 01 oct 2024 10:00:00 gmt\n\n"
        );
    }

    #[test]
    fn signatures_verify_only_for_the_signed_request() {
        let key = MasterKey::from_base64(KEY).unwrap();
        let token = key.sign("POST", "docs", "dbs/a/colls/b", DATE).unwrap();
        assert!(is_master_token(&token));
        assert!(key.verify(&token, "post", "docs", "dbs/a/colls/b", DATE));
        assert!(!key.verify(&token, "delete", "docs", "dbs/a/colls/b", DATE));
        assert!(!key.verify(&token, "post", "docs", "dbs/a/colls/c", DATE));

        let other = MasterKey::from_base64("c2VjcmV0").unwrap();
        assert!(!other.verify(&token, "post", "docs", "dbs/a/colls/b", DATE));
    }

    #[test]
    fn header_encoding_round_trips() {
        let token = "type=master&ver=1.0&sig=a+b/c==";
        let encoded = encode_header(token);
        assert!(!encoded.contains('&'));
        assert_eq!(decode_header(&encoded).unwrap(), token);
    }

    #[test]
    fn resource_tokens_pick_the_deepest_covered_resource() {
        let mut coll = Permission::new("coll", PermissionMode::All, "dbs/a/colls/b/");
        coll.token = "coll-token".to_string();
        let mut sproc = Permission::new("sproc", PermissionMode::All, "dbs/a/colls/b/sprocs/s");
        sproc.token = "sproc-token".to_string();
        let tokens = ResourceTokens::from_permissions(&[coll, sproc]);

        let doc_feed = ResourcePath::parse("dbs/a/colls/b/docs").unwrap();
        assert_eq!(tokens.token_for(&doc_feed), Some("coll-token"));

        let sproc_path = ResourcePath::parse("dbs/a/colls/b/sprocs/s").unwrap();
        assert_eq!(tokens.token_for(&sproc_path), Some("sproc-token"));

        let users = ResourcePath::parse("dbs/a/users").unwrap();
        assert_eq!(tokens.token_for(&users), None);

        let credential = Credential::ResourceTokens(tokens);
        assert!(matches!(
            credential.token("GET", &users, DATE),
            Err(ClientError::Unauthorized(_))
        ));
    }

    #[test]
    fn rejects_non_base64_master_key() {
        assert!(MasterKey::from_base64("not base64!").is_err());
    }

    #[test]
    fn service_self_links_sign_by_rid() {
        let collection: crate::types::Collection = serde_json::from_value(serde_json::json!({
            "id": "Items",
            "_rid": "XP0mAJ3H-AA=",
            "_self": "dbs/XP0mAA==/colls/XP0mAJ3H-AA=/",
            "_etag": "\"00000000-0000-0000-0000-000000000000\"",
            "_ts": 1700000000,
            "partitionKey": {"paths": ["/partition"], "kind": "Hash"}
        }))
        .unwrap();

        let docs = crate::link::feed_link(
            &collection.system.self_link,
            crate::link::ResourceKind::Document,
        );
        assert_eq!(docs, "dbs/XP0mAA==/colls/XP0mAJ3H-AA=/docs");
        let path = ResourcePath::parse(&docs).unwrap();
        assert_eq!(
            string_to_sign("POST", path.resource_type(), &path.resource_link(), "d"),
            "post\ndocs\nxp0maj3h-aa=\nd\n\n"
        );

        let key = MasterKey::from_base64(KEY).unwrap();
        let token = Credential::MasterKey(key.clone())
            .token("POST", &path, DATE)
            .unwrap();
        assert_eq!(
            token,
            key.sign("POST", "docs", "xp0maj3h-aa=", DATE).unwrap()
        );
    }
}
