//! Client-side request validation.
//!
//! Limits match the server's validators. String lengths are counted in
//! UTF-8 bytes, so one CJK character uses three.

use crate::checkin::CreateCheckinRequest;
use crate::error::ValidationError;
use crate::group::CreateGroupRequest;
use crate::message::kinds;
use crate::page::MAX_PAGE_LIMIT;
use crate::types::Coordinates;

/// Largest accepted search radius, in meters.
pub const MAX_RADIUS_METERS: f64 = 50_000.0;

/// Default radius for nearby user searches, in meters.
pub const DEFAULT_USER_RADIUS_METERS: f64 = 1_000.0;

pub const MAX_TAGS: usize = 10;

type Result<T> = std::result::Result<T, ValidationError>;

fn check_len(field: &'static str, value: &str, min: usize, max: usize) -> Result<()> {
    let got = value.len();
    if got < min || got > max {
        return Err(ValidationError::LengthOutOfRange {
            field,
            min,
            max,
            got,
        });
    }
    Ok(())
}

fn check_chars(field: &'static str, value: &str, extra: impl Fn(char) -> bool) -> Result<()> {
    if value.chars().all(|c| c.is_alphanumeric() || extra(c)) {
        return Ok(());
    }
    Err(ValidationError::InvalidCharacters { field })
}

pub fn validate_coordinates(at: Coordinates) -> Result<()> {
    if !(-90.0..=90.0).contains(&at.latitude) {
        return Err(ValidationError::LatitudeOutOfRange(at.latitude));
    }
    if !(-180.0..=180.0).contains(&at.longitude) {
        return Err(ValidationError::LongitudeOutOfRange(at.longitude));
    }
    Ok(())
}

pub fn validate_limit(limit: usize) -> Result<()> {
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(ValidationError::LimitOutOfRange {
            got: limit,
            max: MAX_PAGE_LIMIT,
        });
    }
    Ok(())
}

pub fn validate_radius(radius: f64) -> Result<()> {
    // NaN fails both comparisons, so test for acceptance
    if radius > 0.0 && radius <= MAX_RADIUS_METERS {
        return Ok(());
    }
    Err(ValidationError::RadiusOutOfRange {
        got: radius,
        max: MAX_RADIUS_METERS,
    })
}

pub fn validate_location_name(name: &str) -> Result<()> {
    check_len("location_name", name, 1, 100)
}

pub fn validate_checkin(req: &CreateCheckinRequest) -> Result<()> {
    check_len("description", &req.description, 1, 1000)?;
    validate_coordinates(Coordinates::new(req.latitude, req.longitude))?;
    validate_location_name(&req.location_name)?;
    if req.tags.len() > MAX_TAGS {
        return Err(ValidationError::TooManyTags {
            got: req.tags.len(),
            max: MAX_TAGS,
        });
    }
    for tag in &req.tags {
        check_len("tag", tag, 1, 20)?;
        check_chars("tag", tag, |c| c.is_whitespace() || matches!(c, '_' | '-' | '#'))?;
    }
    Ok(())
}

pub fn validate_message(message_type: &str, content: &str) -> Result<()> {
    match message_type {
        kinds::TEXT => check_len("content", content, 1, 2000),
        kinds::IMAGE => {
            if !content.starts_with("http") {
                return Err(ValidationError::ImageNotUrl);
            }
            check_len("content", content, 1, 500)
        }
        kinds::LOCATION => check_len("content", content, 1, 500),
        other => Err(ValidationError::UnsupportedMessageType(other.to_string())),
    }
}

pub fn validate_group(req: &CreateGroupRequest) -> Result<()> {
    check_len("name", &req.name, 2, 50)?;
    if let Some(description) = &req.description {
        check_len("description", description, 0, 1000)?;
    }
    if let Some(password) = &req.password {
        check_len("password", password, 4, 20)?;
    }
    validate_coordinates(Coordinates::new(req.latitude, req.longitude))?;
    validate_location_name(&req.location_name)
}

pub fn validate_group_name_query(keyword: &str) -> Result<()> {
    check_len("keyword", keyword, 1, 50)
}

pub fn validate_login(login_id: &str, password: &str) -> Result<()> {
    check_len("login_id", login_id, 1, 50)?;
    check_chars("login_id", login_id, |c| matches!(c, '_' | '-' | '.'))?;
    check_len("password", password, 6, 20)
}

/// Registration input, including the password confirmation the user typed.
pub fn validate_registration(
    login_id: &str,
    password: &str,
    confirm_password: &str,
    nickname: &str,
) -> Result<()> {
    validate_login(login_id, password)?;
    if password != confirm_password {
        return Err(ValidationError::PasswordMismatch);
    }
    check_len("nickname", nickname, 1, 50)
}

pub fn validate_nickname(nickname: &str) -> Result<()> {
    check_len("nickname", nickname, 1, 50)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkin_request() -> CreateCheckinRequest {
        CreateCheckinRequest {
            description: "sunrise".into(),
            latitude: 35.16,
            longitude: 112.68,
            location_name: "南天门".into(),
            tags: vec!["view".into()],
        }
    }

    #[test]
    fn test_coordinates_bounds() {
        assert!(validate_coordinates(Coordinates::new(90.0, -180.0)).is_ok());
        assert_eq!(
            validate_coordinates(Coordinates::new(90.5, 0.0)),
            Err(ValidationError::LatitudeOutOfRange(90.5))
        );
        assert_eq!(
            validate_coordinates(Coordinates::new(0.0, 181.0)),
            Err(ValidationError::LongitudeOutOfRange(181.0))
        );
    }

    #[test]
    fn test_limit_and_radius() {
        assert!(validate_limit(50).is_ok());
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(51).is_err());
        assert!(validate_radius(MAX_RADIUS_METERS).is_ok());
        assert!(validate_radius(0.0).is_err());
        assert!(validate_radius(f64::NAN).is_err());
    }

    #[test]
    fn test_checkin_tags() {
        assert!(validate_checkin(&checkin_request()).is_ok());

        let mut req = checkin_request();
        req.tags = (0..11).map(|i| format!("t{i}")).collect();
        assert_eq!(
            validate_checkin(&req),
            Err(ValidationError::TooManyTags { got: 11, max: 10 })
        );

        let mut req = checkin_request();
        req.tags = vec![String::new()];
        assert!(matches!(
            validate_checkin(&req),
            Err(ValidationError::LengthOutOfRange { field: "tag", .. })
        ));
    }

    #[test]
    fn test_lengths_count_bytes() {
        let mut req = checkin_request();
        req.description = "山".repeat(333);
        assert!(validate_checkin(&req).is_ok());

        req.description = "山".repeat(1000);
        assert_eq!(
            validate_checkin(&req),
            Err(ValidationError::LengthOutOfRange {
                field: "description",
                min: 1,
                max: 1000,
                got: 3000,
            })
        );

        assert!(validate_nickname(&"张".repeat(16)).is_ok());
        assert!(validate_nickname(&"张".repeat(17)).is_err());
    }

    #[test]
    fn test_group_description_limit() {
        let mut req = CreateGroupRequest {
            name: "hikers".into(),
            description: Some("d".repeat(1000)),
            password: None,
            latitude: 35.16,
            longitude: 112.68,
            location_name: "南天门".into(),
        };
        assert!(validate_group(&req).is_ok());

        req.description = Some("d".repeat(1001));
        assert!(matches!(
            validate_group(&req),
            Err(ValidationError::LengthOutOfRange {
                field: "description",
                got: 1001,
                ..
            })
        ));
    }

    #[test]
    fn test_charsets() {
        assert!(validate_login("ann.lee-2_x", "secret1").is_ok());
        assert!(validate_login("山顶", "secret1").is_ok());
        assert_eq!(
            validate_login("ann lee", "secret1"),
            Err(ValidationError::InvalidCharacters { field: "login_id" })
        );
        assert_eq!(
            validate_login("ann@x", "secret1"),
            Err(ValidationError::InvalidCharacters { field: "login_id" })
        );

        let mut req = checkin_request();
        req.tags = vec!["#日出 view".into(), "a_b-c".into()];
        assert!(validate_checkin(&req).is_ok());
        req.tags = vec!["view!".into()];
        assert_eq!(
            validate_checkin(&req),
            Err(ValidationError::InvalidCharacters { field: "tag" })
        );
    }

    #[test]
    fn test_message_kinds() {
        assert!(validate_message("text", "hi").is_ok());
        assert!(validate_message("text", "").is_err());
        assert_eq!(
            validate_message("image", "file:///x.png"),
            Err(ValidationError::ImageNotUrl)
        );
        assert!(validate_message("image", "https://cdn/x.png").is_ok());
        assert_eq!(
            validate_message("sticker", "x"),
            Err(ValidationError::UnsupportedMessageType("sticker".into()))
        );
    }

    #[test]
    fn test_registration() {
        assert!(validate_registration("alice", "secret1", "secret1", "Alice").is_ok());
        assert_eq!(
            validate_registration("alice", "secret1", "secret2", "Alice"),
            Err(ValidationError::PasswordMismatch)
        );
        assert!(validate_registration("alice", "short", "short", "Alice").is_err());
    }
}
