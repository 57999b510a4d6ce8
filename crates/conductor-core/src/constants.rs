//! Package-level constants.

/// Current version of the conductor (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "conductor";

/// Characters per token used by the token estimator.
pub const CHARS_PER_TOKEN: usize = 4;

/// Fixed per-turn overhead (role markers, separators) in tokens.
pub const TURN_OVERHEAD_TOKENS: usize = 4;

/// Prefix of the turn that replaces compacted history.
pub const SUMMARY_PREFIX: &str = "[Context from earlier in this conversation]";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_semver() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION must be semver (MAJOR.MINOR.PATCH)");
        for part in parts {
            let _: u32 = part.parse().expect("each semver segment must be a number");
        }
    }

    #[test]
    fn name_is_lowercase() {
        assert_eq!(NAME, NAME.to_lowercase());
    }
}
