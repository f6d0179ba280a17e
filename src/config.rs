//! Startup configuration from a `.env`-style file.
//!
//! Supplies OAuth client ids/secrets to the provider config factories.
//! Lookup order: the loaded file first, then the process environment.

use std::collections::HashMap;
use std::path::PathBuf;

/// Key/value pairs loaded from the first `.env` file found.
#[derive(Debug, Clone, Default)]
pub struct Env {
    loaded: HashMap<String, String>,
}

impl Env {
    /// Load from the known locations, first found wins:
    /// 1. `./.env` (development)
    /// 2. `~/.config/workbar/.env` (production)
    pub fn load() -> Self {
        for path in Self::search_paths() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                log::info!("Loaded environment file from {}", path.display());
                return Self::parse(&contents);
            }
        }
        Self::default()
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(".env"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("workbar").join(".env"));
        }
        paths
    }

    /// Get a value by key, checking the loaded file first, then the
    /// process environment.
    pub fn get(&self, key: &str) -> Option<String> {
        self.loaded
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }

    /// Get a value or return a fallback.
    pub fn get_or(&self, key: &str, fallback: &str) -> String {
        self.get(key).unwrap_or_else(|| fallback.to_string())
    }

    fn parse(contents: &str) -> Self {
        let mut loaded = HashMap::new();
        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                continue;
            };
            let key = key.trim().to_string();
            let mut value = value.trim();
            // Strip surrounding quotes
            if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
                || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
            {
                value = &value[1..value.len() - 1];
            }
            loaded.insert(key, value.to_string());
        }
        Self { loaded }
    }

    #[cfg(test)]
    pub(crate) fn from_str(contents: &str) -> Self {
        Self::parse(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let env = Env::from_str(
            "# comment\n\nGITHUB_CLIENT_ID=abc123\nGITHUB_CLIENT_SECRET = s3cret \n",
        );
        assert_eq!(env.get("GITHUB_CLIENT_ID").as_deref(), Some("abc123"));
        assert_eq!(env.get("GITHUB_CLIENT_SECRET").as_deref(), Some("s3cret"));
        assert_eq!(env.get("# comment"), None);
    }

    #[test]
    fn parse_strips_surrounding_quotes() {
        let env = Env::from_str("A=\"quoted value\"\nB='single'\nC=un\"touched\n");
        assert_eq!(env.get("A").as_deref(), Some("quoted value"));
        assert_eq!(env.get("B").as_deref(), Some("single"));
        assert_eq!(env.get("C").as_deref(), Some("un\"touched"));
    }

    #[test]
    fn file_value_wins_over_process_environment() {
        std::env::set_var("WORKBAR_TEST_PRECEDENCE", "from-process");
        let env = Env::from_str("WORKBAR_TEST_PRECEDENCE=from-file\n");
        assert_eq!(
            env.get("WORKBAR_TEST_PRECEDENCE").as_deref(),
            Some("from-file")
        );

        let empty = Env::from_str("");
        assert_eq!(
            empty.get("WORKBAR_TEST_PRECEDENCE").as_deref(),
            Some("from-process")
        );
        std::env::remove_var("WORKBAR_TEST_PRECEDENCE");
    }

    #[test]
    fn get_or_falls_back() {
        let env = Env::from_str("");
        assert_eq!(env.get_or("WORKBAR_TEST_MISSING", "fallback"), "fallback");
    }
}
