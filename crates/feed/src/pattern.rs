use models::ConfigError;

/// A filename glob supporting `*` and `?`, matched case-insensitively
/// against the filename only (never the path).
#[derive(Debug, Clone)]
pub struct FilePattern {
    pattern: glob::Pattern,
}

impl FilePattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let compiled =
            glob::Pattern::new(pattern).map_err(|err| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                detail: err.to_string(),
            })?;
        Ok(Self { pattern: compiled })
    }

    pub fn matches(&self, name: &str) -> bool {
        // Strip any directory prefix a listing may have included.
        let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        self.pattern.matches_with(
            file_name,
            glob::MatchOptions {
                case_sensitive: false,
                require_literal_separator: false,
                require_literal_leading_dot: false,
            },
        )
    }
}
