//! Build-time metadata embedded by the build script.
//!
//! Reported by the health endpoint and `pigate --version`.

/// The git commit hash at build time (short form).
pub const GIT_HASH: &str = env!("PIGATE_GIT_HASH");

/// The build timestamp as a Unix epoch string.
pub const BUILD_TIMESTAMP: &str = env!("PIGATE_BUILD_TIMESTAMP");

/// The build profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("PIGATE_BUILD_PROFILE");

/// The crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version, git hash and profile as one static string, for `--version`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("PIGATE_GIT_HASH"),
    ", ",
    env!("PIGATE_BUILD_PROFILE"),
    ")"
);

/// Return a formatted version string including git hash and profile.
///
/// Example: `"0.1.0 (abc1234, debug)"`
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_not_empty() {
        let v = version_string();
        assert!(!v.is_empty());
        assert!(v.contains(VERSION));
    }

    #[test]
    fn test_long_version_matches_version_string() {
        assert_eq!(LONG_VERSION, version_string());
    }

    #[test]
    fn test_git_hash_not_empty() {
        assert!(!GIT_HASH.is_empty());
    }

    #[test]
    fn test_build_timestamp_is_numeric() {
        assert!(BUILD_TIMESTAMP.parse::<u64>().is_ok());
    }
}
