//! # Hub Messages
//!
//! The message exchanged with the hub: an immutable byte payload plus an
//! ordered bag of application properties. Property names and values are
//! restricted to a printable US-ASCII subset so they survive every wire
//! format unescaped, and a handful of system property names are reserved
//! for the hub itself.
//!
//! The delivery engine never mutates a message after construction. When a
//! transport has to transform properties, such as adding its application
//! property prefix, it works on a copy.

use serde::{Deserialize, Serialize};

use crate::error::{HublineError, Result};

/// System property names the hub owns. These cannot be set as application
/// properties; comparison is case-insensitive.
pub const RESERVED_PROPERTY_NAMES: [&str; 6] = [
    "message-id",
    "to",
    "absolute-expiry-time",
    "correlation-id",
    "user-id",
    "ack",
];

/// Punctuation excluded from property names and values, on top of the
/// printable US-ASCII restriction.
const EXCLUDED_PROPERTY_CHARS: &str = "()<>@,;:\\\"/[]?={}";

/// A validated name/value application property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperty {
    name: String,
    value: String,
}

impl MessageProperty {
    /// Validates and constructs a property.
    ///
    /// The name must not collide with a reserved system property, and both
    /// components must consist of printable US-ASCII characters outside the
    /// excluded punctuation set. Whitespace of any kind is rejected.
    pub fn new(name: &str, value: &str) -> Result<Self> {
        if is_reserved_property_name(name) {
            return Err(HublineError::Configuration(format!(
                "property name '{name}' is reserved for the hub"
            )));
        }
        if !uses_valid_chars(name) {
            return Err(HublineError::Configuration(format!(
                "property name '{name}' contains characters outside the allowed set"
            )));
        }
        if !uses_valid_chars(value) {
            return Err(HublineError::Configuration(format!(
                "property value '{value}' contains characters outside the allowed set"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Case-insensitive name match.
    pub fn has_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// True if the name is claimed by the hub, compared case-insensitively.
pub fn is_reserved_property_name(name: &str) -> bool {
    RESERVED_PROPERTY_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

fn uses_valid_chars(component: &str) -> bool {
    !component.is_empty()
        && component
            .chars()
            .all(|c| ('!'..='~').contains(&c) && !EXCLUDED_PROPERTY_CHARS.contains(c))
}

/// A service-bound or device-bound hub message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Raw message payload.
    body: Vec<u8>,
    /// Whether the payload is UTF-8 text. Text bodies can cross text-based
    /// wire formats verbatim; binary bodies need an encoding layer there.
    text: bool,
    /// Application properties in insertion order. Order is preserved only
    /// for serialization; lookup is by case-insensitive name.
    properties: Vec<MessageProperty>,
}

impl Message {
    /// Creates a message from a raw byte payload.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            text: false,
            properties: Vec::new(),
        }
    }

    /// Creates a message from UTF-8 text.
    pub fn from_text(text: &str) -> Self {
        Self {
            body: text.as_bytes().to_vec(),
            text: true,
            properties: Vec::new(),
        }
    }

    /// True when the payload was constructed from UTF-8 text.
    pub fn is_text(&self) -> bool {
        self.text
    }

    /// Sets an application property, replacing an existing property with
    /// the same case-insensitive name in place.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        let property = MessageProperty::new(name, value)?;
        match self.properties.iter_mut().find(|p| p.has_name(name)) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
        Ok(())
    }

    /// Looks up a property value by case-insensitive name.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.has_name(name))
            .map(MessageProperty::value)
    }

    /// All application properties in insertion order.
    pub fn properties(&self) -> &[MessageProperty] {
        &self.properties
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The payload decoded as UTF-8, with invalid sequences replaced.
    pub fn body_as_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}
