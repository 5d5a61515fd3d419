//! FindFirst-style wildcard matching over pack entry names
//!
//! Only whole-component wildcards are understood: `*`, `*.*`, `*.ext`,
//! `name.*` and the literal `name.ext`. Partial patterns such as `foo*bar`
//! match nothing beyond their literal spelling.

use crate::path::normalize_name;

/// A parsed wildcard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wildcard {
    directory: String,
    base: String,
    extension: Option<String>,
    base_any: bool,
    extension_any: bool,
}

/// Result of matching one entry name against a wildcard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WildcardMatch {
    /// The entry itself matched
    File(String),
    /// A directory on the way to the entry matched, with trailing component
    Directory(String),
}

impl Wildcard {
    /// Parse a wildcard such as `materials/*.vmt`
    pub fn parse(raw: &str) -> Self {
        let trailing_slash = raw.ends_with(['/', '\\']);
        let cleaned = normalize_name(raw).unwrap_or_default();

        let (directory, file) = if trailing_slash {
            (format!("{cleaned}/"), String::new())
        } else {
            match cleaned.rfind('/') {
                Some(slash) => (
                    cleaned[..=slash].to_string(),
                    cleaned[slash + 1..].to_string(),
                ),
                None => (String::new(), cleaned),
            }
        };
        let directory = if directory == "/" {
            String::new()
        } else {
            directory
        };

        let (base, extension) = match file.rfind('.') {
            Some(dot) => (file[..dot].to_string(), Some(file[dot + 1..].to_string())),
            None => (file, None),
        };

        let base_any = base == "*";
        // a bare `*` behaves like `*.*`
        let extension_any =
            extension.as_deref() == Some("*") || (extension.is_none() && base_any);

        Self {
            directory,
            base,
            extension,
            base_any,
            extension_any,
        }
    }

    /// Directory prefix of the wildcard, with trailing `/` (empty at the root)
    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// Match an entry name, returning the file or the sub-directory it implies
    pub fn matches(&self, candidate: &str) -> Option<WildcardMatch> {
        if candidate.is_empty() {
            return None;
        }
        let prefix = candidate.get(..self.directory.len())?;
        if !prefix.eq_ignore_ascii_case(&self.directory) {
            return None;
        }

        let rest = &candidate[self.directory.len()..];
        let (component, is_directory) = match rest.find('/') {
            Some(slash) => (&rest[..slash], true),
            None => (rest, false),
        };

        let (base, extension) = match component.find('.') {
            Some(dot) => (&component[..dot], Some(&component[dot + 1..])),
            None => (component, None),
        };

        let base_match = self.base_any || base.eq_ignore_ascii_case(&self.base);
        let extension_match = match (extension, self.extension.as_deref()) {
            (Some(_), _) if self.extension_any => true,
            (None, None) => true,
            (Some(ext), Some(wanted)) => ext.eq_ignore_ascii_case(wanted),
            _ => false,
        };

        if !(base_match && extension_match) {
            return None;
        }

        let matched_len = self.directory.len() + component.len();
        if is_directory {
            Some(WildcardMatch::Directory(candidate[..matched_len].to_string()))
        } else {
            Some(WildcardMatch::File(candidate.to_string()))
        }
    }
}
