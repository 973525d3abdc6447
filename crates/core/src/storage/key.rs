//! Object key generation.
//!
//! Keys follow the prefix convention
//! `assets/<type>/<year>/<month>/<owner>_<timestamp_ms>_<random6>_<sanitized_name>`,
//! which keeps them unique, lexically time-sortable, and traceable back to a
//! human-readable filename. Variant keys for rendered derivatives swap the
//! `assets/<type>` prefix for a role folder.

use chrono::{Datelike, Utc};
use rand::Rng;
use uuid::Uuid;

use super::error::StorageError;

/// Classification of an uploaded asset, used as the second key segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// Still images.
    Image,
    /// Video files.
    Video,
    /// Audio files.
    Audio,
    /// Documents (PDF, office formats, text).
    Document,
    /// Compressed archives.
    Archive,
    /// Anything else.
    Other,
}

impl AssetKind {
    /// Key segment for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Archive => "archive",
            Self::Other => "other",
        }
    }

    /// Classify from a MIME type.
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.to_ascii_lowercase();
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("video/") {
            Self::Video
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else if mime.starts_with("text/")
            || mime == "application/pdf"
            || mime.contains("msword")
            || mime.contains("officedocument")
            || mime.contains("spreadsheet")
        {
            Self::Document
        } else if mime.contains("zip") || mime.contains("tar") || mime.contains("compressed") {
            Self::Archive
        } else {
            Self::Other
        }
    }
}

/// Keys for the rendered variants of one original asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantKeySet {
    /// Small thumbnail rendition.
    pub thumbnail: String,
    /// Medium preview rendition.
    pub preview: String,
    /// Web-optimized rendition.
    pub web_optimized: String,
    /// Mobile rendition.
    pub mobile: String,
}

/// Top-level folder for original assets.
pub const ASSETS_PREFIX: &str = "assets";

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SUFFIX_LEN: usize = 6;

/// Generate a storage key for a new upload.
///
/// Structure is deterministic; the value is not: the key embeds the current
/// millisecond timestamp and a 6-character random suffix, so two uploads of
/// the same file in the same millisecond still get distinct keys.
#[must_use]
pub fn generate_key(original_filename: &str, kind: AssetKind, owner_id: Uuid) -> String {
    let now = Utc::now();
    format!(
        "{}/{}/{}/{:02}/{}_{}_{}_{}",
        ASSETS_PREFIX,
        kind.as_str(),
        now.year(),
        now.month(),
        owner_id,
        now.timestamp_millis(),
        random_suffix(),
        sanitize_filename(original_filename),
    )
}

/// Derive the variant keys for an original asset key.
///
/// Pure string transform: `assets/<type>/rest` becomes `<role>/rest` for each
/// role folder. Stripping the role folder yields back the original key's
/// directory structure.
///
/// # Errors
///
/// Returns `InvalidKey` when `original` does not carry the
/// `assets/<type>/` prefix.
pub fn variant_keys(original: &str) -> Result<VariantKeySet, StorageError> {
    let rest = original
        .strip_prefix("assets/")
        .ok_or_else(|| StorageError::invalid_key(format!("not under assets/: {original}")))?;
    let (_kind, tail) = rest
        .split_once('/')
        .ok_or_else(|| StorageError::invalid_key(format!("missing type segment: {original}")))?;
    if tail.is_empty() {
        return Err(StorageError::invalid_key(format!(
            "empty path after type segment: {original}"
        )));
    }

    Ok(VariantKeySet {
        thumbnail: format!("thumbnails/{tail}"),
        preview: format!("previews/{tail}"),
        web_optimized: format!("web/{tail}"),
        mobile: format!("mobile/{tail}"),
    })
}

/// Sanitize filename for storage key.
///
/// Only ASCII alphanumeric characters, dots, hyphens, and underscores
/// survive; everything else becomes `_`.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| {
            let idx = rng.random_range(0..SUFFIX_ALPHABET.len());
            char::from(SUFFIX_ALPHABET[idx])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("sunset.jpg"), "sunset.jpg");
        assert_eq!(sanitize_filename("my photo (1).jpg"), "my_photo__1_.jpg");
        assert_eq!(sanitize_filename("clip@#$%.mov"), "clip____.mov");
        assert_eq!(sanitize_filename("日本語.png"), "___.png");
    }

    #[test]
    fn test_generate_key_grammar() {
        let owner = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").expect("valid uuid");
        let key = generate_key("sunset.jpg", AssetKind::Image, owner);

        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], "assets");
        assert_eq!(parts[1], "image");
        assert_eq!(parts[2].len(), 4, "four-digit year");
        assert_eq!(parts[3].len(), 2, "zero-padded month");
        assert!((1..=12).contains(&parts[3].parse::<u32>().expect("numeric month")));

        // <owner>_<timestamp_ms>_<random6>_<filename>
        let leaf: Vec<&str> = parts[4].splitn(4, '_').collect();
        assert_eq!(leaf.len(), 4);
        assert_eq!(leaf[0], owner.to_string());
        assert!(leaf[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(leaf[2].len(), 6);
        assert_eq!(leaf[3], "sunset.jpg");
    }

    #[test]
    fn test_generate_key_unique_for_identical_inputs() {
        let owner = Uuid::new_v4();
        let a = generate_key("same.png", AssetKind::Image, owner);
        let b = generate_key("same.png", AssetKind::Image, owner);
        assert_ne!(a, b);
    }

    #[test]
    fn test_variant_keys_swap_only_the_role_folder() {
        let owner = Uuid::new_v4();
        let original = generate_key("sunset.jpg", AssetKind::Image, owner);
        let variants = variant_keys(&original).expect("valid asset key");

        let tail = original
            .strip_prefix("assets/image/")
            .expect("generated key starts with assets/image/");
        assert_eq!(variants.thumbnail, format!("thumbnails/{tail}"));
        assert_eq!(variants.preview, format!("previews/{tail}"));
        assert_eq!(variants.web_optimized, format!("web/{tail}"));
        assert_eq!(variants.mobile, format!("mobile/{tail}"));
    }

    #[test]
    fn test_variant_keys_reject_foreign_keys() {
        assert!(variant_keys("thumbnails/2026/08/x.jpg").is_err());
        assert!(variant_keys("assets/image").is_err());
        assert!(variant_keys("assets/image/").is_err());
    }

    #[rstest::rstest]
    #[case("image/png", AssetKind::Image)]
    #[case("VIDEO/mp4", AssetKind::Video)]
    #[case("audio/flac", AssetKind::Audio)]
    #[case("application/pdf", AssetKind::Document)]
    #[case("text/plain", AssetKind::Document)]
    #[case("application/zip", AssetKind::Archive)]
    #[case("application/octet-stream", AssetKind::Other)]
    fn test_asset_kind_from_mime(#[case] mime: &str, #[case] expected: AssetKind) {
        assert_eq!(AssetKind::from_mime(mime), expected);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    // Property: sanitized filenames only contain the safe character set.
    proptest! {
        #[test]
        fn prop_sanitized_filename_safe_chars(filename in ".*") {
            let sanitized = sanitize_filename(&filename);

            for c in sanitized.chars() {
                let is_safe = c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_';
                prop_assert!(is_safe, "Unexpected character in sanitized filename: {}", c);
            }
        }
    }

    // Property: every generated key matches the required path grammar and
    // its filename segment is fully sanitized.
    proptest! {
        #[test]
        fn prop_generated_key_grammar(filename in ".{0,64}") {
            let key = generate_key(&filename, AssetKind::Video, Uuid::new_v4());

            let parts: Vec<&str> = key.split('/').collect();
            prop_assert_eq!(parts.len(), 5);
            prop_assert_eq!(parts[0], "assets");
            prop_assert_eq!(parts[1], "video");
            prop_assert!(parts[2].parse::<i32>().is_ok());
            prop_assert!(parts[3].parse::<u32>().is_ok());

            let leaf: Vec<&str> = parts[4].splitn(4, '_').collect();
            prop_assert_eq!(leaf.len(), 4);
            for c in leaf[3].chars() {
                prop_assert!(c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
            }
        }
    }

    // Property: variant derivation keeps the directory tail byte-identical.
    proptest! {
        #[test]
        fn prop_variant_roundtrip(name in "[a-z0-9]{1,20}\\.[a-z]{2,4}") {
            let original = generate_key(&name, AssetKind::Image, Uuid::new_v4());
            let variants = variant_keys(&original).expect("generated keys are valid");

            let tail = original.strip_prefix("assets/image/").expect("prefix");
            prop_assert_eq!(variants.thumbnail.strip_prefix("thumbnails/"), Some(tail));
            prop_assert_eq!(variants.preview.strip_prefix("previews/"), Some(tail));
            prop_assert_eq!(variants.web_optimized.strip_prefix("web/"), Some(tail));
            prop_assert_eq!(variants.mobile.strip_prefix("mobile/"), Some(tail));
        }
    }
}
