//! HTTP Signatures (draft-cavage) for `ActivityPub` requests.
//!
//! The signing string is the `(request-target)` pseudo-header followed by the
//! listed header values, in exactly the order named by the `headers`
//! parameter. Any reordering or changed value breaks verification.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, NaiveDateTime, Utc};
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs1v15::{SigningKey, VerifyingKey},
};
use sha2::{Digest, Sha256};
use signature::{SignatureEncoding, Signer, Verifier};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use fedi_common::AppError;

/// Headers every outbound POST signs, in order.
pub const POST_SIGNED_HEADERS: &[&str] = &["(request-target)", "host", "date", "digest"];

/// Headers every outbound GET signs, in order.
pub const GET_SIGNED_HEADERS: &[&str] = &["(request-target)", "host", "date"];

/// HTTP date format (IMF-fixdate).
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// HTTP Signature error.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Signing failed: {0}")]
    SigningFailed(String),
    #[error("Verification failed: {0}")]
    VerificationFailed(String),
    #[error("Missing header: {0}")]
    MissingHeader(String),
    #[error("Invalid signature header: {0}")]
    InvalidSignatureHeader(String),
    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::InvalidPrivateKey(_) | SignatureError::SigningFailed(_) => {
                Self::Internal(err.to_string())
            }
            SignatureError::InvalidSignatureHeader(_) => Self::BadRequest(err.to_string()),
            _ => Self::Unauthorized(err.to_string()),
        }
    }
}

/// HTTP Signature signer for outgoing requests.
#[derive(Clone)]
pub struct HttpSigner {
    private_key: RsaPrivateKey,
    key_id: String,
}

impl std::fmt::Debug for HttpSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl HttpSigner {
    /// Create a new HTTP signer from a PKCS#8 PEM private key.
    pub fn new(private_key_pem: &str, key_id: impl Into<String>) -> Result<Self, SignatureError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .map_err(|e| SignatureError::InvalidPrivateKey(e.to_string()))?;

        Ok(Self {
            private_key,
            key_id: key_id.into(),
        })
    }

    /// The key id advertised in the `Signature` header.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Sign the given header values and return the `Signature` header value.
    ///
    /// `headers` holds lowercase header names; `signed_headers` picks which of
    /// them are signed and in what order.
    pub fn sign(
        &self,
        method: &str,
        url: &Url,
        headers: &HashMap<String, String>,
        signed_headers: &[&str],
    ) -> Result<String, SignatureError> {
        let names: Vec<String> = signed_headers.iter().map(|h| (*h).to_string()).collect();
        let signing_string = build_signing_string(method, &request_path(url), headers, &names)?;

        debug!(signing_string = %signing_string, "Signing string");

        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let signature_bytes = signing_key
            .try_sign(signing_string.as_bytes())
            .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;

        Ok(format!(
            "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            names.join(" "),
            BASE64.encode(signature_bytes.to_bytes())
        ))
    }

    /// Build `Host`, `Date`, `Digest` (when a body is present) and
    /// `Signature` headers for a request.
    pub fn sign_request(
        &self,
        method: &str,
        url: &Url,
        body: Option<&[u8]>,
    ) -> Result<HeaderMap, SignatureError> {
        let host = host_header(url)?;
        let date = Utc::now().format(HTTP_DATE_FORMAT).to_string();

        let mut values = HashMap::new();
        values.insert("host".to_string(), host);
        values.insert("date".to_string(), date);

        let signed: &[&str] = if let Some(body) = body {
            values.insert("digest".to_string(), calculate_digest(body));
            POST_SIGNED_HEADERS
        } else {
            GET_SIGNED_HEADERS
        };

        let signature = self.sign(method, url, &values, signed)?;
        values.insert("signature".to_string(), signature);

        let mut headers = HeaderMap::new();
        for (name, value) in values {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;
            headers.insert(name, value);
        }

        Ok(headers)
    }
}

/// Parsed signature header components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureComponents {
    pub key_id: String,
    pub algorithm: String,
    pub headers: Vec<String>,
    pub signature: String,
}

impl SignatureComponents {
    /// The actor URL the key belongs to: the key id without its fragment.
    #[must_use]
    pub fn actor_url(&self) -> String {
        actor_url_from_key_id(&self.key_id)
    }
}

/// Parse a `Signature` header into its components.
///
/// Values may be quoted; commas inside quotes are preserved. A header
/// without `keyId` or `signature` is a parse failure, which callers must
/// keep distinct from a cryptographic mismatch.
pub fn parse_signature_header(header: &str) -> Result<SignatureComponents, SignatureError> {
    let mut params: HashMap<String, String> = HashMap::new();
    let mut rest = header.trim();

    while !rest.is_empty() {
        let (key, after_key) = rest.split_once('=').ok_or_else(|| {
            SignatureError::InvalidSignatureHeader(format!("expected key=value near `{rest}`"))
        })?;
        let key = key.trim().trim_start_matches(',').trim();

        let (value, remainder) = if let Some(quoted) = after_key.strip_prefix('"') {
            let end = quoted.find('"').ok_or_else(|| {
                SignatureError::InvalidSignatureHeader(format!("unterminated value for `{key}`"))
            })?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            after_key.split_once(',').unwrap_or((after_key, ""))
        };

        params.insert(key.to_string(), value.to_string());
        rest = remainder.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
    }

    let key_id = params
        .remove("keyId")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SignatureError::InvalidSignatureHeader("missing keyId".to_string()))?;
    let signature = params
        .remove("signature")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SignatureError::InvalidSignatureHeader("missing signature".to_string()))?;

    Ok(SignatureComponents {
        key_id,
        algorithm: params
            .remove("algorithm")
            .unwrap_or_else(|| "rsa-sha256".to_string()),
        headers: params
            .remove("headers")
            .unwrap_or_else(|| "date".to_string())
            .split_whitespace()
            .map(str::to_lowercase)
            .collect(),
        signature,
    })
}

/// Reconstruct the signing string.
///
/// `path` includes the query string. Header names in `headers` must be
/// lowercase. A listed header that is absent fails the whole reconstruction.
pub fn build_signing_string(
    method: &str,
    path: &str,
    headers: &HashMap<String, String>,
    signed_headers: &[String],
) -> Result<String, SignatureError> {
    let mut parts = Vec::with_capacity(signed_headers.len());
    for header in signed_headers {
        let value = match header.as_str() {
            "(request-target)" => format!("{} {path}", method.to_lowercase()),
            h => headers
                .get(h)
                .ok_or_else(|| SignatureError::MissingHeader(h.to_string()))?
                .trim()
                .to_string(),
        };
        parts.push(format!("{header}: {value}"));
    }
    Ok(parts.join("\n"))
}

/// Verify a base64 signature over `signing_string`.
///
/// Returns `Ok(false)` on a cryptographic mismatch and `Err` when the key,
/// encoding or algorithm is unusable.
pub fn verify(
    public_key_pem: &str,
    signing_string: &str,
    signature_b64: &str,
    algorithm: &str,
) -> Result<bool, SignatureError> {
    match algorithm.to_lowercase().as_str() {
        "rsa-sha256" | "hs2019" => {}
        other => return Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
    }

    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| SignatureError::InvalidPublicKey(e.to_string()))?;

    let signature_bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| SignatureError::VerificationFailed(e.to_string()))?;
    let signature = rsa::pkcs1v15::Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| SignatureError::VerificationFailed(e.to_string()))?;

    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    match verifying_key.verify(signing_string.as_bytes(), &signature) {
        Ok(()) => Ok(true),
        Err(e) => {
            warn!(error = %e, "Signature verification failed");
            Ok(false)
        }
    }
}

/// Calculate the `Digest` header value of a body.
#[must_use]
pub fn calculate_digest(body: &[u8]) -> String {
    format!("SHA-256={}", BASE64.encode(Sha256::digest(body)))
}

/// Verify a `Digest` header against a body.
///
/// The header may list several algorithms; the SHA-256 entry must match.
#[must_use]
pub fn verify_digest(body: &[u8], digest_header: &str) -> bool {
    let expected = BASE64.encode(Sha256::digest(body));
    digest_header.split(',').any(|entry| {
        entry
            .trim()
            .split_once('=')
            .is_some_and(|(alg, value)| alg.eq_ignore_ascii_case("SHA-256") && value == expected)
    })
}

/// Whether a `Date` header lies within `tolerance` of now.
#[must_use]
pub fn verify_date_header(date_header: &str, tolerance: Duration) -> bool {
    verify_date_header_at(date_header, tolerance, Utc::now())
}

/// [`verify_date_header`] against an explicit clock.
#[must_use]
pub fn verify_date_header_at(date_header: &str, tolerance: Duration, now: DateTime<Utc>) -> bool {
    let Some(date) = parse_http_date(date_header) else {
        return false;
    };
    let skew = now.signed_duration_since(date).num_milliseconds().unsigned_abs();
    skew <= tolerance.as_millis() as u64
}

/// Parse an HTTP date in IMF-fixdate or RFC 2822 form.
#[must_use]
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Strip the fragment from a key id (`.../users/alice#main-key` → `.../users/alice`).
#[must_use]
pub fn actor_url_from_key_id(key_id: &str) -> String {
    key_id
        .split_once('#')
        .map_or(key_id, |(actor, _)| actor)
        .to_string()
}

/// Path plus query, as used in `(request-target)`.
#[must_use]
pub fn request_path(url: &Url) -> String {
    url.query()
        .map_or_else(|| url.path().to_string(), |q| format!("{}?{q}", url.path()))
}

fn host_header(url: &Url) -> Result<String, SignatureError> {
    let host = url
        .host_str()
        .ok_or_else(|| SignatureError::InvalidUrl(format!("No host in {url}")))?;
    Ok(url
        .port()
        .map_or_else(|| host.to_string(), |port| format!("{host}:{port}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fedi_common::crypto::generate_rsa_keypair_with_bits;

    fn keypair() -> (String, String) {
        let pair = generate_rsa_keypair_with_bits(1024).unwrap();
        (pair.private_key_pem, pair.public_key_pem)
    }

    fn lowercase(headers: &HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(k, v)| (k.as_str().to_lowercase(), v.to_str().unwrap().to_string()))
            .collect()
    }

    #[test]
    fn test_sign_and_verify() {
        let (private_pem, public_pem) = keypair();
        let signer =
            HttpSigner::new(&private_pem, "https://example.com/users/test#main-key").unwrap();
        let url = Url::parse("https://remote.example/inbox").unwrap();
        let body = br#"{"type":"Create"}"#;

        let headers = signer.sign_request("POST", &url, Some(body)).unwrap();
        let values = lowercase(&headers);
        let components = parse_signature_header(&values["signature"]).unwrap();

        let signing_string =
            build_signing_string("POST", "/inbox", &values, &components.headers).unwrap();
        assert!(
            verify(&public_pem, &signing_string, &components.signature, &components.algorithm)
                .unwrap()
        );
        assert!(verify_digest(body, &values["digest"]));
    }

    #[test]
    fn test_tampering_breaks_verification() {
        let (private_pem, public_pem) = keypair();
        let signer = HttpSigner::new(&private_pem, "https://example.com/users/t#k").unwrap();
        let url = Url::parse("https://remote.example/inbox").unwrap();
        let headers = signer.sign_request("POST", &url, Some(b"{}")).unwrap();
        let mut values = lowercase(&headers);
        let components = parse_signature_header(&values["signature"]).unwrap();

        // Flip one byte of the signature.
        let mut raw = BASE64.decode(&components.signature).unwrap();
        raw[0] ^= 0x01;
        let flipped = BASE64.encode(raw);
        let signing_string =
            build_signing_string("POST", "/inbox", &values, &components.headers).unwrap();
        assert!(!verify(&public_pem, &signing_string, &flipped, "rsa-sha256").unwrap());

        // Change one signed header value.
        values.insert("host".to_string(), "evil.example".to_string());
        let altered =
            build_signing_string("POST", "/inbox", &values, &components.headers).unwrap();
        assert!(!verify(&public_pem, &altered, &components.signature, "rsa-sha256").unwrap());

        // Reorder the signed headers.
        let mut reordered = components.headers.clone();
        reordered.swap(1, 2);
        let values = lowercase(&headers);
        let shuffled = build_signing_string("POST", "/inbox", &values, &reordered).unwrap();
        assert!(!verify(&public_pem, &shuffled, &components.signature, "rsa-sha256").unwrap());
    }

    #[test]
    fn test_parse_signature_header() {
        let header = r#"keyId="https://example.com/users/test#main-key",algorithm="rsa-sha256",headers="(request-target) host date digest",signature="abc123==""#;

        let components = parse_signature_header(header).unwrap();

        assert_eq!(components.key_id, "https://example.com/users/test#main-key");
        assert_eq!(components.actor_url(), "https://example.com/users/test");
        assert_eq!(components.algorithm, "rsa-sha256");
        assert_eq!(
            components.headers,
            vec!["(request-target)", "host", "date", "digest"]
        );
        assert_eq!(components.signature, "abc123==");
    }

    #[test]
    fn test_parse_rejects_malformed_header() {
        assert!(matches!(
            parse_signature_header(r#"algorithm="rsa-sha256",signature="abc""#),
            Err(SignatureError::InvalidSignatureHeader(_))
        ));
        assert!(matches!(
            parse_signature_header("garbage"),
            Err(SignatureError::InvalidSignatureHeader(_))
        ));
        assert!(matches!(
            parse_signature_header(r#"keyId="https://a.example/k,signature="x""#),
            Err(SignatureError::InvalidSignatureHeader(_))
        ));
    }

    #[test]
    fn test_missing_signed_header() {
        let headers = HashMap::from([("host".to_string(), "a.example".to_string())]);
        let listed = vec!["(request-target)".to_string(), "date".to_string()];
        assert!(matches!(
            build_signing_string("POST", "/inbox", &headers, &listed),
            Err(SignatureError::MissingHeader(h)) if h == "date"
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let (_, public_pem) = keypair();
        assert!(matches!(
            verify(&public_pem, "x", "AAAA", "ed25519"),
            Err(SignatureError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_verify_digest() {
        let body = b"hello world";
        let digest = calculate_digest(body);
        assert!(verify_digest(body, &digest));
        assert!(verify_digest(body, &format!("SHA-512=zzz,{digest}")));
        assert!(!verify_digest(b"wrong body", &digest));
    }

    #[test]
    fn test_date_tolerance() {
        let now = Utc::now();
        let fresh = now.format(HTTP_DATE_FORMAT).to_string();
        let stale = (now - chrono::Duration::seconds(120))
            .format(HTTP_DATE_FORMAT)
            .to_string();

        assert!(verify_date_header_at(&fresh, Duration::from_secs(30), now));
        assert!(!verify_date_header_at(&stale, Duration::from_secs(30), now));
        assert!(!verify_date_header_at("yesterday", Duration::from_secs(30), now));
    }

    #[test]
    fn test_request_path_keeps_query() {
        let url = Url::parse("https://a.example/users/x/inbox?page=2").unwrap();
        assert_eq!(request_path(&url), "/users/x/inbox?page=2");
    }
}
