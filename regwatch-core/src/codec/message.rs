//! Values that cross the boundary.

use std::collections::BTreeMap;
use std::io;

use serde::{Deserialize, Serialize};

use super::reader::{Decoder, WireDecode};
use super::writer::{
    WireEncode, write_bin, write_bool, write_i32, write_map_len, write_str, write_string_map,
};
use crate::error::Result;

/// Header mapping. Names keep the casing they arrived with.
pub type Headers = BTreeMap<String, String>;

fn find_header<'a>(headers: Option<&'a Headers>, name: &str) -> Option<&'a str> {
    headers?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn decode_headers(decoder: &mut Decoder<'_>) -> Result<Headers> {
    let len = decoder.read_map_len()?;
    let mut headers = Headers::new();
    for _ in 0..len {
        let name = decoder.read_str()?;
        // Multi-valued headers such as set-cookie may arrive as arrays.
        if let Some(value) = decoder.read_str_or_skip()? {
            headers.insert(name.to_string(), value.to_string());
        }
    }
    Ok(headers)
}

/// An outgoing HTTP GET.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Request {
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

impl Request {
    /// A request with no headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: None,
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(self.headers.as_ref(), name)
    }
}

impl WireEncode for Request {
    fn encode<W: io::Write>(&self, wr: &mut W) -> Result<()> {
        write_map_len(wr, 1 + u32::from(self.headers.is_some()))?;
        write_str(wr, "url")?;
        write_str(wr, &self.url)?;
        if let Some(headers) = &self.headers {
            write_str(wr, "headers")?;
            write_string_map(wr, headers.len(), headers)?;
        }
        Ok(())
    }
}

impl WireDecode for Request {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let mut request = Request::default();
        for _ in 0..decoder.read_map_len()? {
            match decoder.read_str()? {
                "url" => request.url = decoder.read_str()?.to_string(),
                "headers" => request.headers = decoder.read_optional(decode_headers)?,
                _ => decoder.skip()?,
            }
        }
        Ok(request)
    }
}

/// A settled HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code.
    pub status: i32,
    /// Response headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    /// Response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
}

impl Response {
    /// A response with only a status.
    pub fn new(status: i32) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(self.headers.as_ref(), name)
    }

    /// Body bytes, empty when absent.
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }

    /// Check for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl WireEncode for Response {
    fn encode<W: io::Write>(&self, wr: &mut W) -> Result<()> {
        let len = 1 + u32::from(self.headers.is_some()) + u32::from(self.body.is_some());
        write_map_len(wr, len)?;
        write_str(wr, "status")?;
        write_i32(wr, self.status)?;
        if let Some(headers) = &self.headers {
            write_str(wr, "headers")?;
            write_string_map(wr, headers.len(), headers)?;
        }
        if let Some(body) = &self.body {
            write_str(wr, "body")?;
            write_bin(wr, body)?;
        }
        Ok(())
    }
}

impl WireDecode for Response {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let mut response = Response::default();
        for _ in 0..decoder.read_map_len()? {
            match decoder.read_str()? {
                "status" => response.status = decoder.read_i32()?,
                "headers" => response.headers = decoder.read_optional(decode_headers)?,
                "body" | "data" => {
                    response.body = decoder.read_optional(|d| d.read_bin().map(<[u8]>::to_vec))?
                }
                _ => decoder.skip()?,
            }
        }
        Ok(response)
    }
}

/// The answer to an image check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatus {
    /// Whether a digest was found.
    pub complete: bool,
    /// The digest, present exactly when `complete` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,
}

impl RegistryStatus {
    /// A check that found `digest`.
    pub fn found(digest: impl Into<String>) -> Self {
        Self {
            complete: true,
            latest_image: Some(digest.into()),
        }
    }

    /// A check that could not finish.
    pub fn incomplete() -> Self {
        Self::default()
    }
}

impl WireEncode for RegistryStatus {
    fn encode<W: io::Write>(&self, wr: &mut W) -> Result<()> {
        write_map_len(wr, 1 + u32::from(self.latest_image.is_some()))?;
        write_str(wr, "complete")?;
        write_bool(wr, self.complete)?;
        if let Some(digest) = &self.latest_image {
            write_str(wr, "latestImage")?;
            write_str(wr, digest)?;
        }
        Ok(())
    }
}

impl WireDecode for RegistryStatus {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let mut status = RegistryStatus::default();
        for _ in 0..decoder.read_map_len()? {
            match decoder.read_str()? {
                "complete" => status.complete = decoder.read_bool()?,
                "latestImage" | "latest_image" => {
                    status.latest_image = decoder
                        .read_optional(|d| d.read_str())?
                        .map(str::to_string)
                }
                _ => decoder.skip()?,
            }
        }
        Ok(status)
    }
}

/// What an external caller asks the guest to do.
///
/// On the wire this is `{spec: {image}}` for an image check or `{url}` for
/// a bare GET. Any other keys, including the rest of a resource object, are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallRequest {
    /// Image reference from `spec.image`.
    pub image: Option<String>,
    /// URL for a bare GET.
    pub url: Option<String>,
}

impl CallRequest {
    /// Ask for the digest of `image`.
    pub fn image(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            url: None,
        }
    }

    /// Ask for a bare GET of `url`.
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            image: None,
            url: Some(url.into()),
        }
    }
}

fn decode_spec(decoder: &mut Decoder<'_>) -> Result<Option<String>> {
    let mut image = None;
    for _ in 0..decoder.read_map_len()? {
        match decoder.read_str()? {
            "image" => image = decoder.read_optional(|d| d.read_str())?.map(str::to_string),
            _ => decoder.skip()?,
        }
    }
    Ok(image)
}

impl WireEncode for CallRequest {
    fn encode<W: io::Write>(&self, wr: &mut W) -> Result<()> {
        write_map_len(wr, u32::from(self.image.is_some()) + u32::from(self.url.is_some()))?;
        if let Some(image) = &self.image {
            write_str(wr, "spec")?;
            write_map_len(wr, 1)?;
            write_str(wr, "image")?;
            write_str(wr, image)?;
        }
        if let Some(url) = &self.url {
            write_str(wr, "url")?;
            write_str(wr, url)?;
        }
        Ok(())
    }
}

impl WireDecode for CallRequest {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let mut request = CallRequest::default();
        for _ in 0..decoder.read_map_len()? {
            match decoder.read_str()? {
                "spec" => request.image = decoder.read_optional(decode_spec)?.flatten(),
                "url" => request.url = decoder.read_optional(|d| d.read_str())?.map(str::to_string),
                _ => decoder.skip()?,
            }
        }
        Ok(request)
    }
}
