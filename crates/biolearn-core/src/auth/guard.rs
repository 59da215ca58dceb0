//! Navigation guards.
//!
//! Guards read the session synchronously and never modify it. Anything that
//! is not allowed is redirected to the login route, including logged-in
//! users without the admin role.

use super::session::SessionStore;

pub const LOGIN_ROUTE: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Allow,
    Redirect(&'static str),
}

impl GuardOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardOutcome::Allow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Authenticated,
    Admin,
}

impl Gate {
    pub fn check(&self, session: &SessionStore) -> GuardOutcome {
        match self {
            Gate::Authenticated => auth_guard(session),
            Gate::Admin => admin_guard(session),
        }
    }
}

pub fn auth_guard(session: &SessionStore) -> GuardOutcome {
    if session.is_logged_in() {
        GuardOutcome::Allow
    } else {
        GuardOutcome::Redirect(LOGIN_ROUTE)
    }
}

pub fn admin_guard(session: &SessionStore) -> GuardOutcome {
    if session.is_admin() {
        GuardOutcome::Allow
    } else {
        GuardOutcome::Redirect(LOGIN_ROUTE)
    }
}

/// Route prefixes and the gates they add, outermost first.
const GUARDED_ROUTES: &[(&[&str], Gate)] = &[
    (&["dashboard"], Gate::Authenticated),
    (&["dashboard", "category"], Gate::Admin),
    (&["dashboard", "videos"], Gate::Admin),
];

/// Gates that apply to `path`, matched segment by segment.
pub fn gates_for(path: &str) -> Vec<Gate> {
    let path = path.split(['?', '#']).next().unwrap_or("");
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    GUARDED_ROUTES
        .iter()
        .filter(|(prefix, _)| segments.starts_with(prefix))
        .map(|(_, gate)| *gate)
        .collect()
}

/// Evaluate every gate for `path`; the first redirect wins.
pub fn check_route(session: &SessionStore, path: &str) -> GuardOutcome {
    gates_for(path)
        .iter()
        .map(|gate| gate.check(session))
        .find(|outcome| !outcome.is_allowed())
        .unwrap_or(GuardOutcome::Allow)
}
