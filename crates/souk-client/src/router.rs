//! Route table and the navigation guard.
//!
//! Every transition goes through [`Router::guard`], which waits for the
//! session store to finish initializing and then decides whether the target
//! is reachable. Protected routes bounce unauthenticated users to `login`
//! and remember where they were heading; `login` bounces authenticated
//! users to `home`.

use std::collections::BTreeMap;
use std::sync::Arc;

use souk_shared::constants::{REDIRECT_QUERY_PARAM, STORAGE_KEY_REDIRECT};
use souk_store::KeyValueStorage;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::session::SessionStore;

/// Redirect hops followed by [`Router::navigate`] before giving up.
const MAX_REDIRECTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteName {
    Home,
    Login,
    AddReview,
    RestaurantDetail,
    Profile,
    NotFound,
}

impl RouteName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Login => "login",
            Self::AddReview => "add-review",
            Self::RestaurantDetail => "restaurant-detail",
            Self::Profile => "profile",
            Self::NotFound => "not-found",
        }
    }
}

impl std::fmt::Display for RouteName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RouteDef {
    pub name: RouteName,
    /// Path pattern; `:name` segments capture a parameter.
    pub pattern: &'static str,
    pub requires_auth: bool,
}

/// Routes in match order. Anything unmatched resolves to
/// [`RouteName::NotFound`].
pub const ROUTES: &[RouteDef] = &[
    RouteDef {
        name: RouteName::Home,
        pattern: "/",
        requires_auth: false,
    },
    RouteDef {
        name: RouteName::Login,
        pattern: "/login",
        requires_auth: false,
    },
    RouteDef {
        name: RouteName::AddReview,
        pattern: "/add",
        requires_auth: true,
    },
    RouteDef {
        name: RouteName::RestaurantDetail,
        pattern: "/restaurant/:id",
        requires_auth: false,
    },
    RouteDef {
        name: RouteName::Profile,
        pattern: "/profile",
        requires_auth: true,
    },
];

pub fn route_def(name: RouteName) -> Option<&'static RouteDef> {
    ROUTES.iter().find(|r| r.name == name)
}

/// A resolved navigation target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub route: RouteName,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
}

impl Location {
    /// Resolve `target` (path plus optional query string) against [`ROUTES`].
    pub fn resolve(target: &str) -> Self {
        let (raw_path, raw_query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (target, None),
        };
        let path = normalize_path(raw_path);
        let query = raw_query.map(parse_query).unwrap_or_default();

        for def in ROUTES {
            if let Some(params) = match_pattern(def.pattern, &path) {
                return Self {
                    route: def.name,
                    path,
                    params,
                    query,
                };
            }
        }

        Self {
            route: RouteName::NotFound,
            path,
            params: BTreeMap::new(),
            query,
        }
    }

    pub fn requires_auth(&self) -> bool {
        route_def(self.route).is_some_and(|d| d.requires_auth)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Path with the query string re-attached.
    pub fn full_path(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        format!("{}?{}", self.path, query.join("&"))
    }
}

/// Absolute path inside the app. Browsers read `//host` and `/\host` as
/// protocol-relative URLs, so any backslash is refused.
fn is_in_app_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}

fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

fn parse_query(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(k), decode_component(v))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

fn match_pattern(pattern: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let pattern_segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = BTreeMap::new();
    for (expected, actual) in pattern_segments.iter().zip(&path_segments) {
        match expected.strip_prefix(':') {
            Some(name) => {
                params.insert(name.to_string(), decode_component(actual));
            }
            None if expected == actual => {}
            None => return None,
        }
    }
    Some(params)
}

/// Where the page to resume after login is kept.
pub enum RedirectMemory {
    /// `/login?redirect=/add`
    Query,
    /// Local storage under `redirect_after_login`.
    Storage(Arc<dyn KeyValueStorage>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow(Location),
    Redirect { from: Location, to: String },
}

pub struct Router {
    session: Arc<SessionStore>,
    memory: RedirectMemory,
    current: watch::Sender<Option<Location>>,
}

impl Router {
    pub fn new(session: Arc<SessionStore>, memory: RedirectMemory) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            session,
            memory,
            current,
        }
    }

    /// Decide a single transition to `target`.
    pub async fn guard(&self, target: &str) -> GuardDecision {
        if !self.session.is_initialized() {
            debug!("waiting for session initialization");
            self.session.initialize().await;
        }

        let location = Location::resolve(target);
        let authenticated = self.session.is_authenticated();
        debug!(
            route = %location.route,
            path = %location.path,
            authenticated,
            "guarding navigation"
        );

        if location.requires_auth() && !authenticated {
            let requested = location.full_path();
            info!(requested = %requested, "authentication required, redirecting to login");
            let to = self.remember(&requested);
            return GuardDecision::Redirect { from: location, to };
        }

        if location.route == RouteName::Login && authenticated {
            debug!("already authenticated, redirecting to home");
            return GuardDecision::Redirect {
                from: location,
                to: "/".to_string(),
            };
        }

        GuardDecision::Allow(location)
    }

    /// Navigate to `target`, following guard redirects, and return where
    /// the navigation landed.
    pub async fn navigate(&self, target: &str) -> Result<Location> {
        let mut next = target.to_string();
        for _ in 0..=MAX_REDIRECTS {
            match self.guard(&next).await {
                GuardDecision::Allow(location) => {
                    self.current.send_replace(Some(location.clone()));
                    return Ok(location);
                }
                GuardDecision::Redirect { to, .. } => next = to,
            }
        }
        warn!(path = target, "redirect limit exceeded");
        Err(ClientError::RedirectLoop(target.to_string()))
    }

    /// The remembered post-login destination, cleared once read.
    ///
    /// Only in-app paths (starting with `/`) are returned.
    pub fn take_post_login_redirect(&self) -> Option<String> {
        let remembered = match &self.memory {
            RedirectMemory::Query => self
                .current()
                .filter(|loc| loc.route == RouteName::Login)
                .and_then(|loc| loc.query.get(REDIRECT_QUERY_PARAM).cloned()),
            RedirectMemory::Storage(storage) => {
                let value = storage.get(STORAGE_KEY_REDIRECT).unwrap_or_else(|e| {
                    warn!(error = %e, "failed to read post-login redirect");
                    None
                });
                if let Err(e) = storage.remove(STORAGE_KEY_REDIRECT) {
                    warn!(error = %e, "failed to clear post-login redirect");
                }
                value
            }
        };
        remembered.filter(|path| is_in_app_path(path))
    }

    pub fn current(&self) -> Option<Location> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Location>> {
        self.current.subscribe()
    }

    /// Record `requested` and return the login location to redirect to.
    fn remember(&self, requested: &str) -> String {
        match &self.memory {
            RedirectMemory::Query => format!(
                "/login?{}={}",
                REDIRECT_QUERY_PARAM,
                urlencoding::encode(requested)
            ),
            RedirectMemory::Storage(storage) => {
                if let Err(e) = storage.set(STORAGE_KEY_REDIRECT, requested) {
                    warn!(error = %e, "failed to remember post-login redirect");
                }
                "/login".to_string()
            }
        }
    }
}
