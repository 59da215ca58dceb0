use tracing::info;

/// Something that can move the user to another screen.
///
/// The session lifecycle only ever forces navigation to the login route;
/// front ends decide what that means for them.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

/// Navigator for headless front ends: records the request in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn navigate(&self, route: &str) {
        info!(route, "Navigation requested");
    }
}
