//! Payload Extraction
//!
//! The payment provider's response schema is not a contract: the Pix
//! credential and the QR image move between fields, nest under `data`, or
//! arrive embedded in descriptive strings. Instead of guessing field names,
//! [`extract`] walks every string leaf of the response and applies two
//! predicates: one for the Pix "copia e cola" credential, one for a visual
//! code (inline base64 image or QR image URL). First match per slot wins, in
//! traversal order. If the structured walk finds nothing, the raw response
//! text is re-scanned with the same predicates.
//!
//! Extraction is pure and total: an unrecognizable response yields an empty
//! [`Extracted`], never an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal preamble of a Pix EMV payload.
pub const CREDENTIAL_PREFIX: &str = "000201";

/// Anything shorter cannot be a real Pix payload.
pub const MIN_CREDENTIAL_LEN: usize = 40;

const DATA_URI_MARKER: &str = "data:image/";
const BASE64_MARKER: &str = ";base64,";

/// Bare base64 blobs below this length are not worth treating as images.
const MIN_INLINE_LEN: usize = 200;

/// The base64 alphabet check samples a prefix instead of the whole blob.
const ALPHABET_SAMPLE: usize = 64;

const URL_IMAGE_KEYWORDS: &[&str] = &["qrcode", "qr", "image", ".png", ".jpg", ".jpeg"];

/// Keys the provider is known to use for its transaction id.
const TX_ID_KEYS: &[&str] = &["id", "transaction_id", "uuid"];

/// Best-effort extraction result
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Extracted {
    /// The Pix "copia e cola" credential, if one was recognized
    pub credential: Option<String>,

    /// A scannable representation of the credential, if one was recognized
    pub visual: Option<Visual>,
}

/// A visual code found in a provider response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Visual {
    /// Base64-encoded image bytes (any data-URI scheme prefix stripped)
    Inline(String),

    /// Absolute URL pointing at a hosted QR image
    Remote(String),
}

/// Locate the credential and visual code in a provider response.
///
/// `body` is the parsed response (or `Value::Null` when parsing failed) and
/// `raw` the same response as text, used as a fallback scan target.
pub fn extract(body: &Value, raw: &str) -> Extracted {
    let mut found = Extracted::default();
    walk(body, &mut found);

    if found.credential.is_none() {
        found.credential = scan_credential(raw);
    }
    if found.visual.is_none() {
        found.visual = scan_visual(raw);
    }

    found
}

/// Locate the provider's transaction id in a charge-creation response.
///
/// Checks the known id keys at the top level, then one level under `data`.
pub fn provider_tx_id(body: &Value) -> Option<String> {
    tx_id_in(body).or_else(|| body.get("data").and_then(tx_id_in))
}

/// Transaction id lookup within a single object.
pub(crate) fn tx_id_in(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    TX_ID_KEYS
        .iter()
        .filter_map(|key| map.get(*key))
        .find_map(scalar_string)
}

/// Stringify a scalar id the way providers are known to send them.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Depth-first traversal over the scalar leaves, object insertion order.
fn walk(value: &Value, found: &mut Extracted) {
    if found.credential.is_some() && found.visual.is_some() {
        return;
    }
    match value {
        Value::String(s) => {
            if found.credential.is_none() {
                found.credential = credential_candidate(s);
            }
            if found.visual.is_none() {
                found.visual = visual_candidate(s);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, found);
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                walk(value, found);
            }
        }
        _ => {}
    }
}

/// Credential predicate: starts with the EMV preamble, or contains it
/// embedded in a larger descriptive string (take the tail from there).
fn credential_candidate(leaf: &str) -> Option<String> {
    let candidate = if leaf.starts_with(CREDENTIAL_PREFIX) {
        leaf
    } else {
        &leaf[leaf.find(CREDENTIAL_PREFIX)?..]
    };
    (candidate.len() >= MIN_CREDENTIAL_LEN).then(|| candidate.to_string())
}

/// Visual predicate: data-URI image, long base64 blob, or QR-looking URL.
fn visual_candidate(leaf: &str) -> Option<Visual> {
    if leaf.starts_with(DATA_URI_MARKER) {
        if let Some(at) = leaf.find(BASE64_MARKER) {
            return Some(Visual::Inline(leaf[at + BASE64_MARKER.len()..].to_string()));
        }
    }
    if leaf.len() >= MIN_INLINE_LEN && looks_base64(leaf) {
        return Some(Visual::Inline(leaf.to_string()));
    }
    if (leaf.starts_with("http://") || leaf.starts_with("https://")) && url_mentions_image(leaf) {
        return Some(Visual::Remote(leaf.to_string()));
    }
    None
}

fn looks_base64(leaf: &str) -> bool {
    leaf.bytes()
        .take(ALPHABET_SAMPLE)
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

/// Keyword match over path and query only, never the host.
fn url_mentions_image(url: &str) -> bool {
    let Some(scheme_end) = url.find("://") else {
        return false;
    };
    let Some(path_start) = url[scheme_end + 3..].find('/') else {
        return false;
    };
    let tail = url[scheme_end + 3 + path_start..].to_lowercase();
    URL_IMAGE_KEYWORDS.iter().any(|kw| tail.contains(kw))
}

/// Raw-text fallback for the credential. The region is truncated at the
/// first quote or escape so trailing JSON syntax is never swallowed.
fn scan_credential(raw: &str) -> Option<String> {
    let tail = &raw[raw.find(CREDENTIAL_PREFIX)?..];
    let end = tail.find(['"', '\\']).unwrap_or(tail.len());
    let candidate = &tail[..end];
    (candidate.len() >= MIN_CREDENTIAL_LEN).then(|| candidate.to_string())
}

/// Raw-text fallback for an inline image: a data-URI somewhere in the text.
fn scan_visual(raw: &str) -> Option<Visual> {
    let tail = &raw[raw.find(DATA_URI_MARKER)?..];
    let payload = &tail[tail.find(BASE64_MARKER)? + BASE64_MARKER.len()..];
    let end = payload.find(['"', '\\']).unwrap_or(payload.len());
    (end > 0).then(|| Visual::Inline(payload[..end].to_string()))
}
