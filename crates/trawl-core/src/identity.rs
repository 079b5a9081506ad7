//! Rotating client identities.
//!
//! The orchestrator owns the pool and picks one identity per request; the
//! transport only ever sees the identity it is handed.

use std::path::Path;

use rand::Rng;

use crate::error::AppError;

const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

const DEFAULT_USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// A set of client-identifying request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    user_agent: String,
    headers: Vec<(String, String)>,
}

impl Identity {
    /// Identity with the given User-Agent and a default Accept-Language.
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            headers: vec![("Accept-Language".into(), DEFAULT_ACCEPT_LANGUAGE.into())],
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Extra headers beyond User-Agent.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// Pool of identities, sampled uniformly at random per request.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    identities: Vec<Identity>,
}

impl IdentityPool {
    pub fn new(identities: Vec<Identity>) -> Result<Self, AppError> {
        if identities.is_empty() {
            return Err(AppError::ConfigError(
                "Identity pool must contain at least one identity".into(),
            ));
        }
        Ok(Self { identities })
    }

    /// Build a pool from User-Agent strings, skipping blanks.
    pub fn from_user_agents<I, S>(user_agents: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(
            user_agents
                .into_iter()
                .map(|ua| ua.as_ref().trim().to_string())
                .filter(|ua| !ua.is_empty())
                .map(Identity::new)
                .collect(),
        )
    }

    /// Load one User-Agent per line. Lines starting with `#` are comments.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!(
                "Failed to read identity file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_user_agents(contents.lines().filter(|l| !l.trim_start().starts_with('#')))
    }

    /// Uniform random pick.
    pub fn choose(&self) -> &Identity {
        let i = rand::thread_rng().gen_range(0..self.identities.len());
        &self.identities[i]
    }
}

impl Default for IdentityPool {
    /// A handful of current desktop browsers.
    fn default() -> Self {
        Self {
            identities: DEFAULT_USER_AGENTS.iter().map(|ua| Identity::new(*ua)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_is_rejected() {
        let err = IdentityPool::from_user_agents(["", "  "]).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn choose_stays_within_pool() {
        let pool = IdentityPool::from_user_agents(["a", "b", "c"]).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let id = pool.choose();
            assert!(["a", "b", "c"].contains(&id.user_agent()));
            seen.insert(id.user_agent().to_string());
        }
        // 200 uniform draws over 3 items miss one with negligible probability.
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn identity_carries_default_headers() {
        let id = Identity::new("bot/1.0").with_header("Referer", "https://example.com/");
        assert_eq!(id.user_agent(), "bot/1.0");
        assert_eq!(id.headers().len(), 2);
        assert_eq!(id.headers()[0].0, "Accept-Language");
    }

    #[test]
    fn from_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.txt");
        std::fs::write(&path, "# browsers\nagent-one\n\nagent-two\n").unwrap();
        let pool = IdentityPool::from_file(&path).unwrap();
        assert_eq!(pool.identities.len(), 2);
    }

    #[test]
    fn default_pool_is_not_empty() {
        assert_eq!(IdentityPool::default().identities.len(), 4);
    }
}
