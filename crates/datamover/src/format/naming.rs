//! Response-name extension bookkeeping.
//!
//! Each buffered stage that changes the byte format strips or appends exactly
//! one extension token, so the delivered name reflects the real content.

/// Extension of the last path segment, dot included, or `""`.
pub fn extension(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    match base.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &base[idx..],
    }
}

/// Name a payload will be delivered under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseName(String);

impl ResponseName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Drop one trailing extension token, if any.
    pub fn strip_extension(&mut self) {
        let ext_len = extension(&self.0).len();
        self.0.truncate(self.0.len() - ext_len);
    }

    pub fn push_extension(&mut self, ext: &str) {
        self.0.push_str(ext);
    }

    pub fn has_extension(&self, ext: &str) -> bool {
        extension(&self.0) == ext
    }
}

impl std::fmt::Display for ResponseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(extension("a.csv.gz"), ".gz");
        assert_eq!(extension("dir.v2/file"), "");
        assert_eq!(extension(".hidden"), "");
        assert_eq!(extension("plain"), "");
    }

    #[test]
    fn test_strip_and_push() {
        let mut name = ResponseName::new("orders.csv.gz.gpg");
        name.strip_extension();
        name.strip_extension();
        assert_eq!(name.as_str(), "orders.csv");
        name.strip_extension();
        name.push_extension(".tsv");
        name.push_extension(".gz");
        assert_eq!(name.to_string(), "orders.tsv.gz");
        assert!(name.has_extension(".gz"));
    }

    #[test]
    fn test_strip_without_extension_is_noop() {
        let mut name = ResponseName::new("README");
        name.strip_extension();
        assert_eq!(name.as_str(), "README");
    }
}
