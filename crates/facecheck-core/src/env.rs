//! Typed lookups for `FACECHECK_*` environment variables.

use std::path::PathBuf;

/// String variable with a default.
pub fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Path variable, `None` when unset.
pub fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

pub fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn env_u8(key: &str, default: u8) -> u8 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_variables_fall_back() {
        assert_eq!(env_string("FACECHECK_TEST_UNSET_STRING", "x"), "x");
        assert_eq!(env_path("FACECHECK_TEST_UNSET_PATH"), None);
        assert_eq!(env_f32("FACECHECK_TEST_UNSET_F32", 0.4), 0.4);
        assert_eq!(env_u64("FACECHECK_TEST_UNSET_U64", 30), 30);
        assert_eq!(env_u16("FACECHECK_TEST_UNSET_U16", 5000), 5000);
        assert_eq!(env_u8("FACECHECK_TEST_UNSET_U8", 75), 75);
    }
}
