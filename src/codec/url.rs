//! Share URL wire format.
//!
//! Links are built in the current format only, but every format that was
//! ever handed out stays parseable. Parsing tries [`UrlFormat::ALL`] in
//! order; the first format whose parameters are present owns the result.

use crate::codec::compress::Compressor;
use crate::codec::path::{is_valid_filepath, normalize_filepath};
use crate::codec::payload::{decode_base64, CompressedPayload};
use crate::error::{Result, UnpakoError};
use crate::types::Timestamp;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Characters escaped by a browser's `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Characters escaped in `application/x-www-form-urlencoded` values.
const FORM_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'*')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_');

/// Generations of the share URL, newest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UrlFormat {
    /// `filepath`, `createdAt`, `modifiedAt`, `data`.
    Current,
    /// `filepath`, `timestamp`, `data`.
    LegacyTimestamp,
    /// `name`, `timestamp`, `data`.
    LegacyName,
    /// A lone `data` parameter holding a JSON object.
    EmbeddedJson,
}

impl UrlFormat {
    /// Parse order.
    pub const ALL: [UrlFormat; 4] = [
        UrlFormat::Current,
        UrlFormat::LegacyTimestamp,
        UrlFormat::LegacyName,
        UrlFormat::EmbeddedJson,
    ];

    /// Whether the query carries every parameter this format needs.
    pub fn matches(self, params: &QueryParams) -> bool {
        let has = |name: &str| params.get(name).is_some_and(|v| !v.is_empty());
        match self {
            UrlFormat::Current => {
                has("data") && has("filepath") && has("createdAt") && has("modifiedAt")
            }
            UrlFormat::LegacyTimestamp => has("data") && has("filepath") && has("timestamp"),
            UrlFormat::LegacyName => has("data") && has("name") && has("timestamp"),
            UrlFormat::EmbeddedJson => has("data"),
        }
    }

    /// Parse the query as this format. Returns `None` when the format does
    /// not apply.
    pub fn parse(
        self,
        params: &QueryParams,
        compressor: &dyn Compressor,
    ) -> Option<Result<CompressedPayload>> {
        if !self.matches(params) {
            return None;
        }

        let field = |name: &str| params.get(name).unwrap_or_default();
        let result = match self {
            UrlFormat::Current => parse_timestamp("createdAt", field("createdAt")).and_then(
                |created_at| {
                    let modified_at = parse_timestamp("modifiedAt", field("modifiedAt"))?;
                    from_params(field("filepath"), created_at, modified_at, field("data"), compressor)
                },
            ),
            UrlFormat::LegacyTimestamp => parse_timestamp("timestamp", field("timestamp"))
                .and_then(|ts| from_params(field("filepath"), ts, ts, field("data"), compressor)),
            UrlFormat::LegacyName => parse_timestamp("timestamp", field("timestamp"))
                .and_then(|ts| from_params(field("name"), ts, ts, field("data"), compressor)),
            UrlFormat::EmbeddedJson => from_embedded_json(field("data")),
        };
        Some(result)
    }
}

/// A parsed share URL and the format it was written in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedUrl {
    pub payload: CompressedPayload,
    pub format: UrlFormat,
}

/// Decoded query string parameters, in order of appearance.
#[derive(Clone, Debug, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Extract the query of a full URL, a `?query` fragment, or a bare query.
    pub fn from_url(url: &str) -> Self {
        let url = url.trim();
        let without_fragment = url.split_once('#').map_or(url, |(head, _)| head);
        let query = match without_fragment.split_once('?') {
            Some((_, query)) => query,
            None if without_fragment.contains("://") => "",
            None => without_fragment,
        };
        Self::parse(query)
    }

    /// Parse `a=1&b=2`, decoding the way a browser's URLSearchParams does.
    pub fn parse(query: &str) -> Self {
        let pairs = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                (form_decode(name), form_decode(value))
            })
            .collect();
        Self { pairs }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Build a share URL in the current format.
///
/// `data` is escaped as a URI component before being form-encoded, so it is
/// escaped twice on the wire. Parsing undoes both layers.
pub fn to_url(base_url: &str, payload: &CompressedPayload) -> String {
    let data = utf8_percent_encode(&payload.data_base64(), URI_COMPONENT).to_string();
    let query = [
        ("filepath", payload.filepath.clone()),
        ("createdAt", payload.created_at.as_millis().to_string()),
        ("modifiedAt", payload.modified_at.as_millis().to_string()),
        ("data", data),
    ]
    .iter()
    .map(|(name, value)| format!("{}={}", name, utf8_percent_encode(value, FORM_VALUE)))
    .collect::<Vec<_>>()
    .join("&");

    format!("{}?{}", base_url, query)
}

/// Parse a share URL of any generation.
pub fn parse_url(url: &str, compressor: &dyn Compressor) -> Result<ParsedUrl> {
    let params = QueryParams::from_url(url);
    if params.is_empty() {
        return Err(UnpakoError::InvalidUrl("no query parameters".into()));
    }

    for format in UrlFormat::ALL {
        if let Some(result) = format.parse(&params, compressor) {
            let payload = result?;
            debug!(?format, filepath = %payload.filepath, "Parsed share URL");
            return Ok(ParsedUrl { payload, format });
        }
    }

    Err(UnpakoError::InvalidUrl(
        "no recognized parameter combination".into(),
    ))
}

fn form_decode(text: &str) -> String {
    let spaced = text.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// `decodeURIComponent`, lenient about stray `%`.
fn uri_component_decode(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

/// Leading integer of `text`, ignoring whatever trails it (`"17abc"` is 17).
fn parse_timestamp(name: &str, text: &str) -> Result<Timestamp> {
    let text = text.trim_start();
    let unsigned = text.strip_prefix(&['-', '+'][..]).unwrap_or(text);
    let digits = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    let sign_len = text.len() - unsigned.len();

    if digits == 0 {
        return Err(UnpakoError::InvalidUrl(format!(
            "{} is not a number: {:?}",
            name, text
        )));
    }
    text[..sign_len + digits]
        .parse::<i64>()
        .map(Timestamp)
        .map_err(|e| UnpakoError::InvalidUrl(format!("{} is out of range: {}", name, e)))
}

fn checked_filepath(raw: &str) -> Result<String> {
    let filepath = normalize_filepath(raw);
    if is_valid_filepath(&filepath) {
        Ok(filepath)
    } else {
        Err(UnpakoError::InvalidUrl(format!("invalid file path {:?}", raw)))
    }
}

fn from_params(
    filepath: &str,
    created_at: Timestamp,
    modified_at: Timestamp,
    data: &str,
    compressor: &dyn Compressor,
) -> Result<CompressedPayload> {
    let filepath = checked_filepath(filepath)?;
    let compressed = decode_base64(&uri_component_decode(data))?;

    // A payload that fails to inflate is still carried; only its size is unknown.
    let original_size = match compressor.inflate(&compressed) {
        Ok(inflated) => inflated.len() as u64,
        Err(e) => {
            warn!(filepath = %filepath, error = %e, "Share URL payload did not inflate");
            0
        }
    };

    Ok(CompressedPayload {
        compressed_size: compressed.len() as u64,
        data: compressed,
        filepath,
        original_size,
        created_at,
        modified_at,
    })
}

fn from_embedded_json(data: &str) -> Result<CompressedPayload> {
    let decoded = uri_component_decode(data);
    let value: Value = serde_json::from_str(&decoded)
        .map_err(|e| UnpakoError::InvalidUrl(format!("embedded data is not JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| UnpakoError::InvalidUrl("embedded data is not an object".into()))?;

    let (raw_path, created_at, modified_at) =
        if object.contains_key("createdAt") && object.contains_key("modifiedAt") {
            (
                required_str(object, "filepath")?,
                required_timestamp(object, "createdAt")?,
                required_timestamp(object, "modifiedAt")?,
            )
        } else if object.contains_key("filepath") && object.contains_key("timestamp") {
            let ts = required_timestamp(object, "timestamp")?;
            (required_str(object, "filepath")?, ts, ts)
        } else if object.contains_key("name") {
            let ts = match object.get("timestamp") {
                Some(_) => required_timestamp(object, "timestamp")?,
                None => Timestamp::now(),
            };
            (required_str(object, "name")?, ts, ts)
        } else {
            return Err(UnpakoError::InvalidUrl(
                "embedded data has no recognized shape".into(),
            ));
        };

    let encoded = required_str(object, "data")?;
    let original_size = object
        .get("size")
        .and_then(Value::as_u64)
        .ok_or_else(|| UnpakoError::InvalidUrl("embedded data is missing size".into()))?;
    let compressed = decode_base64(encoded)?;

    Ok(CompressedPayload {
        compressed_size: compressed.len() as u64,
        data: compressed,
        filepath: checked_filepath(raw_path)?,
        original_size,
        created_at,
        modified_at,
    })
}

fn required_str<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| UnpakoError::InvalidUrl(format!("embedded data is missing {}", key)))
}

fn required_timestamp(object: &Map<String, Value>, key: &str) -> Result<Timestamp> {
    match object.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|v| v as i64))
            .map(Timestamp)
            .ok_or_else(|| UnpakoError::InvalidUrl(format!("{} is out of range", key))),
        Some(Value::String(s)) => parse_timestamp(key, s),
        _ => Err(UnpakoError::InvalidUrl(format!("embedded data is missing {}", key))),
    }
}
