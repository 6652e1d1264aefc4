//! Page title normalization.
//!
//! Titles arrive from query strings and path segments in whatever form the
//! browser used (`special:userlogout`, `Main Page`). They are normalized the
//! way the host site does it: spaces become underscores, and the first
//! letter of both the namespace and the page name is uppercased.

use std::fmt;

/// Characters that can never appear in a page title.
const ILLEGAL_TITLE_CHARS: &[char] = &['#', '<', '>', '[', ']', '|', '{', '}'];

/// A normalized page title, optionally namespaced (`Namespace:Name`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTitle {
    namespace: Option<String>,
    name: String,
}

impl PageTitle {
    /// Parse and normalize a title. Returns `None` for empty or illegal titles.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.chars().any(|c| c.is_control() || ILLEGAL_TITLE_CHARS.contains(&c)) {
            return None;
        }

        let collapsed = raw
            .replace(' ', "_")
            .split('_')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_");
        let text = collapsed.strip_prefix(':').unwrap_or(&collapsed);

        let (namespace, name) = match text.split_once(':') {
            Some((ns, name)) if !ns.is_empty() && !name.trim_matches('_').is_empty() => {
                (Some(ucfirst(ns.trim_matches('_'))), ucfirst(name.trim_matches('_')))
            }
            _ => (None, ucfirst(text)),
        };

        if name.is_empty() {
            return None;
        }
        Some(Self { namespace, name })
    }

    /// The namespace prefix, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The page name without its namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the title lives in `namespace` (case-insensitive).
    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.namespace
            .as_deref()
            .is_some_and(|ns| ns.eq_ignore_ascii_case(namespace))
    }

    /// Same page, comparing namespaces case-insensitively.
    pub fn matches(&self, other: &PageTitle) -> bool {
        let same_namespace = match (&self.namespace, &other.namespace) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        };
        same_namespace && self.name == other.name
    }
}

impl fmt::Display for PageTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}:{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Uppercase the first character.
pub(crate) fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
