//! Argument checks shared by every sub-cache. Each one fails before any SQL runs.

use crate::error::{Result, ThemisError};

/// One year, the longest TTL any cache accepts
pub const MAX_TTL_HOURS: i64 = 8760;
/// Longest key accepted by the key-value cache
pub const MAX_KEY_LENGTH: usize = 255;

/// A query hash must be exactly 32 lowercase hex characters.
pub fn validate_query_hash(hash: &str) -> Result<()> {
    if hash.len() == 32
        && hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        Ok(())
    } else {
        Err(ThemisError::validation(format!(
            "Invalid query hash '{}': expected 32 lowercase hex characters",
            hash
        )))
    }
}

pub fn validate_cache_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(ThemisError::validation("Cache key must not be blank"));
    }
    if key.chars().count() > MAX_KEY_LENGTH {
        return Err(ThemisError::validation(format!(
            "Cache key exceeds {} characters",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

pub fn validate_ttl_hours(ttl_hours: i64) -> Result<()> {
    if ttl_hours <= 0 {
        return Err(ThemisError::validation(format!(
            "TTL must be a positive number of hours, got {}",
            ttl_hours
        )));
    }
    if ttl_hours > MAX_TTL_HOURS {
        return Err(ThemisError::validation(format!(
            "TTL must not exceed {} hours, got {}",
            MAX_TTL_HOURS, ttl_hours
        )));
    }
    Ok(())
}

/// Validated TTL turned into an absolute expiry timestamp.
pub(crate) fn expiry_from_ttl(now: i64, ttl_hours: i64) -> Result<i64> {
    validate_ttl_hours(ttl_hours)?;
    Ok(now + ttl_hours * 3600)
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(ThemisError::validation(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_hash_format() {
        assert!(validate_query_hash("0123456789abcdef0123456789abcdef").is_ok());
        assert!(validate_query_hash("0123456789ABCDEF0123456789abcdef").is_err());
        assert!(validate_query_hash("0123456789abcdef0123456789abcde").is_err());
        assert!(validate_query_hash("0123456789abcdef0123456789abcdef0").is_err());
        assert!(validate_query_hash("g123456789abcdef0123456789abcdef").is_err());
        assert!(validate_query_hash("").is_err());
    }

    #[test]
    fn test_ttl_bounds() {
        assert!(validate_ttl_hours(1).is_ok());
        assert!(validate_ttl_hours(MAX_TTL_HOURS).is_ok());
        assert!(validate_ttl_hours(0).unwrap_err().is_validation());
        assert!(validate_ttl_hours(-5).unwrap_err().is_validation());
        assert!(validate_ttl_hours(MAX_TTL_HOURS + 1).unwrap_err().is_validation());
        assert_eq!(expiry_from_ttl(1000, 2).unwrap(), 1000 + 7200);
    }

    #[test]
    fn test_cache_key_bounds() {
        assert!(validate_cache_key("backend:doaj:abc").is_ok());
        assert!(validate_cache_key("   ").is_err());
        assert!(validate_cache_key(&"k".repeat(255)).is_ok());
        assert!(validate_cache_key(&"k".repeat(256)).is_err());
    }
}
