use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

fn name_rgx() -> &'static Regex {
    static RGX: OnceLock<Regex> = OnceLock::new();
    RGX.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap())
}

fn path_rgx() -> &'static Regex {
    static RGX: OnceLock<Regex> = OnceLock::new();
    RGX.get_or_init(|| Regex::new(r"^[a-zA-Z0-9/#*._-]+$").unwrap())
}

/// Validates actor ids, kinds and node names.
///
/// Names become address segments, so the character set is restricted
/// to keep paths unambiguous.
pub fn validate_name(name: &str) -> Result<(), InvalidName> {
    if name.is_empty() || !name_rgx().is_match(name) {
        Err(InvalidName { name: name.into() })
    } else {
        Ok(())
    }
}

#[derive(Clone, Error)]
#[error("\"{name}\". Invalid name. Must contain only a-Z, 0-9, _ or -")]
pub struct InvalidName {
    pub name: String,
}

impl std::fmt::Debug for InvalidName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.to_string())
    }
}

pub fn validate_path(path: &str) -> Result<(), InvalidPath> {
    if path.is_empty() || !path_rgx().is_match(path) {
        Err(InvalidPath { path: path.into() })
    } else {
        Ok(())
    }
}

#[derive(Clone, Error)]
#[error("\"{path}\". Invalid path. Must contain only a-Z, 0-9, /, #, _, ., - or *")]
pub struct InvalidPath {
    pub path: String,
}

impl std::fmt::Debug for InvalidPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert!(validate_name("counter-1").is_ok());
        assert!(validate_name("Counter_B2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("abc*").is_err());
        assert!(validate_name("@#$").is_err());
    }

    #[test]
    fn paths() {
        assert!(validate_path("/user/counter-1").is_ok());
        assert!(validate_path("/virtual/user/u1#p0").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("/user/a b").is_err());
    }
}
