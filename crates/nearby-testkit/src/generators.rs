//! Proptest generators for property-based testing.

use proptest::prelude::*;

use nearby_core::{CheckIn, Coordinates, Cursor, Page, UserId};

use crate::fixtures::sample_checkin;

/// Generate a valid coordinate pair.
pub fn coordinates() -> impl Strategy<Value = Coordinates> {
    (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lng)| Coordinates::new(lat, lng))
}

/// Generate a coordinate pair with at least one component out of range.
pub fn bad_coordinates() -> impl Strategy<Value = Coordinates> {
    prop_oneof![
        (90.001f64..1_000.0, -180.0f64..=180.0).prop_map(|(lat, lng)| Coordinates::new(lat, lng)),
        (-1_000.0f64..-90.001, -180.0f64..=180.0).prop_map(|(lat, lng)| Coordinates::new(lat, lng)),
        (-90.0f64..=90.0, 180.001f64..1_000.0).prop_map(|(lat, lng)| Coordinates::new(lat, lng)),
    ]
}

pub fn user_id() -> impl Strategy<Value = UserId> {
    (1i64..=1_000_000).prop_map(UserId)
}

/// Generate an opaque cursor in any of the shapes servers use.
pub fn cursor() -> impl Strategy<Value = Cursor> {
    prop_oneof![
        any::<u32>().prop_map(|n| Cursor::from_wire(serde_json::json!(n))),
        "[A-Za-z0-9+/=]{1,24}".prop_map(|s| Cursor::from_wire(serde_json::json!(s))),
        (any::<u32>(), "[a-z]{1,8}")
            .prop_map(|(n, s)| Cursor::from_wire(serde_json::json!({ "offset": n, "key": s }))),
    ]
}

/// Generate a nickname that passes client-side validation.
pub fn nickname() -> impl Strategy<Value = String> {
    "[\\p{Han}a-zA-Z0-9_]{1,16}"
}

/// Generate a check-in with an id drawn from a small pool, so collections
/// of them contain duplicates.
pub fn checkin() -> impl Strategy<Value = CheckIn> {
    (0u8..16, 1i64..=8, 0i64..100, any::<bool>()).prop_map(|(n, author, likes, liked)| {
        let mut checkin = sample_checkin(&format!("ck-{n}"), author);
        checkin.likes_count = likes;
        checkin.liked_by_me = liked;
        checkin
    })
}

/// Generate a page of check-ins, last or not.
pub fn checkin_page() -> impl Strategy<Value = Page<CheckIn>> {
    (prop::collection::vec(checkin(), 0..12), prop::option::of(cursor())).prop_map(
        |(items, next)| match next {
            Some(cursor) => Page::with_more(items, cursor),
            None => Page::last(items),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearby_core::validation::{validate_coordinates, validate_nickname};

    proptest! {
        #[test]
        fn test_generated_coordinates_validate(at in coordinates()) {
            prop_assert!(validate_coordinates(at).is_ok());
        }

        #[test]
        fn test_bad_coordinates_rejected(at in bad_coordinates()) {
            prop_assert!(validate_coordinates(at).is_err());
        }

        #[test]
        fn test_generated_nicknames_validate(name in nickname()) {
            prop_assert!(validate_nickname(&name).is_ok());
        }

        #[test]
        fn test_page_continuation_matches_has_more(page in checkin_page()) {
            prop_assert_eq!(page.continuation().is_some(), page.has_more);
        }
    }
}
