#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Index,
    Login,
    Register,
    Dashboard,
    Counter,
    Profile,
    History,
}

impl Page {
    /// Resolves the last path segment, ignoring any query string.
    pub fn from_path(path: &str) -> Option<Self> {
        let without_query = path.split(['?', '#']).next().unwrap_or_default();
        let name = without_query.rsplit('/').next().unwrap_or_default();
        match name {
            "" | "index.html" => Some(Page::Index),
            "login.html" => Some(Page::Login),
            "register.html" => Some(Page::Register),
            "dashboard.html" => Some(Page::Dashboard),
            "counter.html" => Some(Page::Counter),
            "profile.html" => Some(Page::Profile),
            "history.html" => Some(Page::History),
            _ => None,
        }
    }

    pub fn is_public(self) -> bool {
        matches!(self, Page::Index | Page::Login | Page::Register)
    }
}

/// Where the user should be sent instead of `page`, if anywhere.
pub fn guard(page: Page, authenticated: bool) -> Option<Page> {
    if !page.is_public() && !authenticated {
        return Some(Page::Index);
    }
    if matches!(page, Page::Login | Page::Register) && authenticated {
        return Some(Page::Dashboard);
    }
    None
}
