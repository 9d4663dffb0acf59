//! Magnet-style content locators.
//!
//! A locator names a payload by the SHA-256 of its bytes:
//!
//! ```text
//! magnet:?xt=urn:sha256:<hex digest>&dn=<file name>&xs=<source url>...
//! ```
//!
//! `dn` is optional and `xs` may repeat.  The string produced by the origin
//! is what every other pod stores and reports, byte for byte.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::error::{PodError, Result};

const SCHEME: &str = "magnet:?";
const URN_PREFIX: &str = "urn:sha256:";

/// Opaque locator string as stored in a video record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoded form of a [`Locator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Magnet {
    pub digest: [u8; 32],
    pub display_name: Option<String>,
    /// Exact sources (`xs`) a fetcher may download from.
    pub sources: Vec<String>,
}

impl Magnet {
    pub fn new(digest: [u8; 32], display_name: Option<&str>, sources: Vec<String>) -> Self {
        Self {
            digest,
            display_name: display_name.map(str::to_string),
            sources,
        }
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    pub fn to_locator(&self) -> Locator {
        let mut out = format!("{SCHEME}xt={URN_PREFIX}{}", self.digest_hex());
        if let Some(name) = &self.display_name {
            out.push_str("&dn=");
            out.extend(form_urlencoded::byte_serialize(name.as_bytes()));
        }
        for source in &self.sources {
            out.push_str("&xs=");
            out.extend(form_urlencoded::byte_serialize(source.as_bytes()));
        }
        Locator(out)
    }

    pub fn parse(locator: &Locator) -> Result<Self> {
        let query = locator
            .as_str()
            .strip_prefix(SCHEME)
            .ok_or_else(|| PodError::Validation(format!("not a magnet uri: {locator:?}")))?;

        let mut digest = None;
        let mut display_name = None;
        let mut sources = Vec::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "xt" => digest = Some(parse_exact_topic(&value)?),
                "dn" => display_name = Some(value.into_owned()),
                "xs" => sources.push(value.into_owned()),
                _ => {}
            }
        }

        let digest = digest
            .ok_or_else(|| PodError::Validation(format!("magnet uri has no xt: {locator:?}")))?;
        Ok(Self {
            digest,
            display_name,
            sources,
        })
    }
}

fn parse_exact_topic(value: &str) -> Result<[u8; 32]> {
    let hex_digest = value
        .strip_prefix(URN_PREFIX)
        .ok_or_else(|| PodError::Validation(format!("unsupported exact topic: {value}")))?;
    let bytes = hex::decode(hex_digest)
        .map_err(|e| PodError::Validation(format!("bad digest in exact topic: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| PodError::Validation("digest must be 32 bytes".into()))
}
