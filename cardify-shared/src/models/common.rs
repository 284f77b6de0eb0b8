//! Value types shared by users and cards
//!
//! These are stored as JSONB columns and validated on the way in.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::OnceLock;
use validator::{Validate, ValidationError};

/// Placeholder shown when a user or card has no picture
pub const DEFAULT_IMAGE_URL: &str =
    "https://cdn.pixabay.com/photo/2016/04/01/10/11/avatar-1299805_960_720.png";

/// Person's name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Name {
    #[validate(length(min = 2, max = 256))]
    pub first: String,

    #[validate(length(max = 256))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle: Option<String>,

    #[validate(length(min = 2, max = 256))]
    pub last: String,
}

impl Name {
    /// "First Last", skipping the middle name
    pub fn display(&self) -> String {
        format!("{} {}", self.first, self.last)
    }
}

/// Picture reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Image {
    #[validate(length(min = 10, max = 1024))]
    #[serde(default = "default_image_url")]
    pub url: String,

    #[validate(length(max = 256))]
    #[serde(default)]
    pub alt: String,
}

fn default_image_url() -> String {
    DEFAULT_IMAGE_URL.to_string()
}

impl Default for Image {
    fn default() -> Self {
        Self {
            url: default_image_url(),
            alt: String::new(),
        }
    }
}

/// Postal address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[validate(length(max = 256))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[validate(length(min = 2, max = 256))]
    pub country: String,

    #[validate(length(min = 2, max = 256))]
    pub city: String,

    #[validate(length(min = 2, max = 256))]
    pub street: String,

    #[validate(range(min = 1))]
    pub house_number: i32,

    #[validate(range(min = 0))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip: Option<i32>,
}

fn phone_regex() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    // Local numbers: 0 + 1-2 digit area code, then 7 digits with optional separators
    PHONE.get_or_init(|| Regex::new(r"^0[0-9]{1,2}-?\s?[0-9]{3}\s?[0-9]{4}$").expect("valid regex"))
}

/// Validator hook for phone fields
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if phone_regex().is_match(phone) {
        Ok(())
    } else {
        let mut err = ValidationError::new("phone");
        err.message = Some(Cow::Borrowed("Phone must be a valid local number, e.g. 050-1234567"));
        Err(err)
    }
}

/// Lowercases and trims an email for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address {
            state: None,
            country: "Israel".to_string(),
            city: "Tel Aviv".to_string(),
            street: "Dizengoff".to_string(),
            house_number: 12,
            zip: Some(6433222),
        }
    }

    #[test]
    fn test_phone_validation() {
        for ok in ["050-1234567", "0501234567", "03-123 4567", "050 123 4567"] {
            assert!(validate_phone(ok).is_ok(), "{} should be valid", ok);
        }
        for bad in ["1234567", "050-12345", "phone", ""] {
            assert!(validate_phone(bad).is_err(), "{} should be invalid", bad);
        }
    }

    #[test]
    fn test_address_validation() {
        assert!(address().validate().is_ok());

        let bad = Address {
            house_number: 0,
            city: "X".to_string(),
            ..address()
        };
        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert_eq!(fields.len(), 2);
        assert!(fields.contains_key("city"));
    }

    #[test]
    fn test_address_serializes_camel_case() {
        let json = serde_json::to_value(address()).unwrap();
        assert_eq!(json["houseNumber"], 12);
        assert!(json.get("state").is_none());
    }

    #[test]
    fn test_image_defaults() {
        let image: Image = serde_json::from_str("{}").unwrap();
        assert_eq!(image.url, DEFAULT_IMAGE_URL);
        assert_eq!(image, Image::default());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Foo@Example.COM "), "foo@example.com");
    }

    #[test]
    fn test_name_display() {
        let name = Name {
            first: "Ada".to_string(),
            middle: Some("K".to_string()),
            last: "Lovelace".to_string(),
        };
        assert_eq!(name.display(), "Ada Lovelace");
    }
}
