//! Input validation for fragments
//! Ensures data integrity before anything reaches the store

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;

/// Maximum lengths
pub const MAX_CONTENT_LENGTH: usize = 1_000_000; // 1MB
pub const MAX_TAG_LENGTH: usize = 128;
pub const MAX_TAGS_PER_FRAGMENT: usize = 64;
pub const MAX_METADATA_ENTRIES: usize = 256;

/// Validate content
pub fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(anyhow!("content cannot be empty"));
    }

    if content.len() > MAX_CONTENT_LENGTH {
        return Err(anyhow!(
            "content too long: {} bytes (max: {})",
            content.len(),
            MAX_CONTENT_LENGTH
        ));
    }

    Ok(())
}

/// Validate confidence is a finite value in [0, 1]
pub fn validate_confidence(confidence: f32) -> Result<()> {
    if !confidence.is_finite() {
        return Err(anyhow!("confidence must be finite, got {confidence}"));
    }
    if !(0.0..=1.0).contains(&confidence) {
        return Err(anyhow!("confidence must be in [0, 1], got {confidence}"));
    }
    Ok(())
}

/// Normalize a single tag: trimmed and lowercase. Empty tags yield `None`.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let normalized = tag.trim().to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Normalize a collection of tags into an ordered, de-duplicated set
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .filter_map(|t| normalize_tag(t.as_ref()))
        .collect()
}

/// Validate an already-normalized tag set
pub fn validate_tags(tags: &BTreeSet<String>) -> Result<()> {
    if tags.len() > MAX_TAGS_PER_FRAGMENT {
        return Err(anyhow!(
            "too many tags: {} (max: {})",
            tags.len(),
            MAX_TAGS_PER_FRAGMENT
        ));
    }

    for tag in tags {
        if tag.len() > MAX_TAG_LENGTH {
            return Err(anyhow!(
                "tag too long: {} chars (max: {})",
                tag.len(),
                MAX_TAG_LENGTH
            ));
        }
    }

    Ok(())
}

/// Validate embeddings vector
pub fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(anyhow!("embedding cannot be empty"));
    }

    if embedding.iter().any(|&v| !v.is_finite()) {
        return Err(anyhow!("embedding contains NaN or Inf values"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_content() {
        assert!(validate_content("the sky is blue").is_ok());
        assert!(validate_content("").is_err());
        assert!(validate_content("   \n\t").is_err());
        assert!(validate_content(&"x".repeat(MAX_CONTENT_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_confidence() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert!(validate_confidence(-0.01).is_err());
        assert!(validate_confidence(1.01).is_err());
        assert!(validate_confidence(f32::NAN).is_err());
    }

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags(["Work", " work ", "", "Rust"]);
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("work"));
        assert!(tags.contains("rust"));
    }

    #[test]
    fn test_validate_embedding() {
        assert!(validate_embedding(&[0.1, 0.2]).is_ok());
        assert!(validate_embedding(&[]).is_err());
        assert!(validate_embedding(&[0.1, f32::INFINITY]).is_err());
    }
}
