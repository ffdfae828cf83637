//! Message content validation.
//!
//! Each content kind carries its own rules. Outbound drafts are checked
//! before anything leaves the client; inbound messages are checked at the
//! decode boundary so malformed events never reach the store.

use parley_proto::payloads::chat::{ChatMessage, MessageKind};

use crate::ValidationError;

/// Default maximum content length in chars.
pub const MAX_CONTENT_LEN: usize = 4096;

/// Mean Earth radius used by [`Coordinates::distance_km`].
const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Validate `content` for a message of `kind`.
pub fn validate_content(kind: MessageKind, content: &str, max_len: usize) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }

    let len = content.chars().count();
    if len > max_len {
        return Err(ValidationError::ContentTooLong { len, max: max_len });
    }

    match kind {
        MessageKind::Text => Ok(()),
        MessageKind::Image => validate_image_url(content),
        MessageKind::Location => Coordinates::parse(content).map(|_| ()),
    }
}

/// Validate an inbound wire message: envelope fields plus content.
pub fn validate_inbound(message: &ChatMessage, max_len: usize) -> Result<(), ValidationError> {
    if message.id.is_empty() {
        return Err(ValidationError::MissingField("id"));
    }
    if message.conversation_id.is_empty() {
        return Err(ValidationError::MissingField("conversationId"));
    }
    if message.sender_id.is_empty() {
        return Err(ValidationError::MissingField("senderId"));
    }

    validate_content(message.kind, &message.content, max_len)
}

fn validate_image_url(content: &str) -> Result<(), ValidationError> {
    if content.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidImageUrl);
    }

    let rest = content
        .strip_prefix("https://")
        .or_else(|| content.strip_prefix("http://"))
        .ok_or(ValidationError::InvalidImageUrl)?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || host.starts_with(':') {
        return Err(ValidationError::InvalidImageUrl);
    }

    Ok(())
}

/// Geographic point carried by location messages as `"<lat>,<lng>"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    /// Latitude in degrees, [-90, 90]
    pub lat: f64,
    /// Longitude in degrees, [-180, 180]
    pub lng: f64,
}

impl Coordinates {
    /// Build from degrees, checking ranges.
    pub fn new(lat: f64, lng: f64) -> Result<Self, ValidationError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ValidationError::InvalidLocation(format!("latitude {lat} out of range")));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(ValidationError::InvalidLocation(format!("longitude {lng} out of range")));
        }
        Ok(Self { lat, lng })
    }

    /// Parse `"<lat>,<lng>"`.
    pub fn parse(content: &str) -> Result<Self, ValidationError> {
        let (lat, lng) = content
            .split_once(',')
            .ok_or_else(|| ValidationError::InvalidLocation("expected \"<lat>,<lng>\"".to_string()))?;

        let lat: f64 = lat
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidLocation(format!("bad latitude {lat:?}")))?;
        let lng: f64 = lng
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidLocation(format!("bad longitude {lng:?}")))?;

        Self::new(lat, lng)
    }

    /// Great-circle distance to `other` in kilometres (haversine).
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lng = (other.lng - self.lng).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}
