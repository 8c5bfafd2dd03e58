//! Common types used throughout driveocr.

use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// A filename that is safe to join onto a local directory.
///
/// Built from an untrusted client-supplied name: accented letters fold to
/// their ASCII base (NFKD, so `Äpfel.jpg` becomes `Apfel.jpg`), path
/// separators and whitespace collapse into `_`, anything outside
/// `[A-Za-z0-9._-]` is dropped, and leading/trailing dots and underscores
/// are trimmed, so the result can never escape its directory or name a
/// hidden file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SafeFileName(String);

impl SafeFileName {
    /// Sanitize `name`, returning `None` when nothing usable remains.
    pub fn sanitize(name: &str) -> Option<Self> {
        let spaced: String = name
            .nfkd()
            .filter(char::is_ascii)
            .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
            .collect();

        let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

        let filtered: String = joined
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .collect();

        let trimmed = filtered.trim_matches(|c| c == '.' || c == '_');
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Sanitize `name`, substituting a generated name when nothing usable remains.
    pub fn sanitize_or_generate(name: &str) -> Self {
        Self::sanitize(name)
            .unwrap_or_else(|| Self(format!("upload_{}", uuid::Uuid::new_v4().simple())))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased extension without the dot, if any.
    pub fn extension(&self) -> Option<String> {
        self.0
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

impl fmt::Display for SafeFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SafeFileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_name_unchanged() {
        let name = SafeFileName::sanitize("scan-01.jpg").unwrap();
        assert_eq!(name.as_str(), "scan-01.jpg");
    }

    #[test]
    fn test_whitespace_collapses() {
        let name = SafeFileName::sanitize("my  holiday photo.png").unwrap();
        assert_eq!(name.as_str(), "my_holiday_photo.png");
    }

    #[test]
    fn test_traversal_is_flattened() {
        let name = SafeFileName::sanitize("../../etc/passwd").unwrap();
        assert_eq!(name.as_str(), "etc_passwd");

        let name = SafeFileName::sanitize(r"C:\Users\me\receipt.jpg").unwrap();
        assert_eq!(name.as_str(), "C_Users_me_receipt.jpg");
    }

    #[test]
    fn test_hidden_prefix_trimmed() {
        let name = SafeFileName::sanitize(".bashrc").unwrap();
        assert_eq!(name.as_str(), "bashrc");
    }

    #[test]
    fn test_unusable_names() {
        assert!(SafeFileName::sanitize("").is_none());
        assert!(SafeFileName::sanitize("..").is_none());
        assert!(SafeFileName::sanitize("日本語").is_none());

        let generated = SafeFileName::sanitize_or_generate("日本語");
        assert!(generated.as_str().starts_with("upload_"));
    }

    #[test]
    fn test_accents_fold_to_ascii() {
        let name = SafeFileName::sanitize("Äpfel.jpg").unwrap();
        assert_eq!(name.as_str(), "Apfel.jpg");

        let name = SafeFileName::sanitize("Crème Brûlée ＃1.png").unwrap();
        assert_eq!(name.as_str(), "Creme_Brulee_1.png");

        // Fullwidth solidus decomposes to '/', which must still flatten.
        let name = SafeFileName::sanitize("..／secret.txt").unwrap();
        assert_eq!(name.as_str(), "secret.txt");
    }

    #[test]
    fn test_extension() {
        let name = SafeFileName::sanitize("Scan.JPG").unwrap();
        assert_eq!(name.extension().as_deref(), Some("jpg"));

        let name = SafeFileName::sanitize("README").unwrap();
        assert_eq!(name.extension(), None);
    }

    proptest! {
        #[test]
        fn sanitized_names_stay_in_directory(input in ".*") {
            if let Some(name) = SafeFileName::sanitize(&input) {
                let s = name.as_str();
                prop_assert!(!s.is_empty());
                prop_assert!(!s.contains('/'));
                prop_assert!(!s.contains('\\'));
                prop_assert!(!s.starts_with('.'));
                prop_assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
            }
        }
    }
}
