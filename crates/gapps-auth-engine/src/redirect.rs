//! Post-login destination selection.

use url::Url;

use crate::config::SiteConfig;
use crate::error::{AuthError, Result};
use crate::title::PageTitle;

/// Resolves the page a user returns to after logging in.
#[derive(Debug, Clone)]
pub struct RedirectGuard {
    site: SiteConfig,
}

impl RedirectGuard {
    /// A guard for the given site layout.
    pub fn new(site: SiteConfig) -> Self {
        Self { site }
    }

    /// The URL to send a freshly logged-in user to.
    ///
    /// Unparsable titles, the logout page and pages in reserved namespaces
    /// resolve to the main page. The result always carries `action=purge` so
    /// the page is not served from a cache holding the logged-out view.
    pub fn safe_return_url(&self, requested: &str) -> Result<Url> {
        let target = PageTitle::parse(requested)
            .filter(|title| self.is_content_page(title))
            .map_or_else(|| self.main_page(), Ok)?;
        self.purge_url(&target)
    }

    /// The main page URL, with `action=purge`.
    pub fn main_page_url(&self) -> Result<Url> {
        self.purge_url(&self.main_page()?)
    }

    fn is_content_page(&self, title: &PageTitle) -> bool {
        let is_logout = PageTitle::parse(&self.site.logout_page).is_some_and(|l| l.matches(title));
        let reserved = self
            .site
            .reserved_namespaces
            .iter()
            .any(|ns| title.in_namespace(ns));
        !is_logout && !reserved
    }

    fn main_page(&self) -> Result<PageTitle> {
        PageTitle::parse(&self.site.main_page).ok_or_else(|| AuthError::Config {
            reason: format!("main_page {:?} is not a valid page title", self.site.main_page),
        })
    }

    fn purge_url(&self, title: &PageTitle) -> Result<Url> {
        let mut url = self.site.article_url(title)?;
        url.query_pairs_mut().append_pair("action", "purge");
        Ok(url)
    }
}
