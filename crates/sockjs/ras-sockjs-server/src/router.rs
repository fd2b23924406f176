//! Application routing and URL classification

use crate::app::Application;
use crate::{ServerError, ServerResult};
use ras_sockjs_types::{SessionId, TransportKind, is_valid_segment};
use std::sync::Arc;

/// Maps request paths to installed applications by longest prefix
#[derive(Debug, Default)]
pub struct AppRouter {
    apps: Vec<Arc<Application>>,
}

impl AppRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an application; prefixes must be unique
    pub fn install(&mut self, app: Application) -> ServerResult<Arc<Application>> {
        if self.apps.iter().any(|existing| existing.prefix() == app.prefix()) {
            return Err(ServerError::DuplicatePrefix(app.config().prefix.clone()));
        }

        let app = Arc::new(app);
        self.apps.push(Arc::clone(&app));
        // Longest prefix first so nested prefixes win over their parents
        self.apps
            .sort_by(|a, b| b.prefix().len().cmp(&a.prefix().len()));
        Ok(app)
    }

    /// Find the application owning `path` and the remaining suffix
    pub fn resolve<'p>(&self, path: &'p str) -> Option<(Arc<Application>, &'p str)> {
        self.apps.iter().find_map(|app| {
            let rest = path.strip_prefix(app.prefix())?;
            if rest.is_empty() || rest.starts_with('/') {
                Some((Arc::clone(app), rest))
            } else {
                None
            }
        })
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.apps.iter().map(|app| app.prefix().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

/// What a path suffix below an application prefix addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Greeting,
    Info,
    Iframe,
    RawWebSocket,
    Session {
        server: String,
        session: SessionId,
        transport: TransportKind,
    },
    NotFound,
}

impl Route {
    pub fn parse(suffix: &str) -> Route {
        match suffix {
            "" | "/" => return Route::Greeting,
            "/info" => return Route::Info,
            "/websocket" => return Route::RawWebSocket,
            _ => {}
        }

        let Some(rest) = suffix.strip_prefix('/') else {
            return Route::NotFound;
        };

        if is_iframe_page(rest) {
            return Route::Iframe;
        }

        let segments: Vec<&str> = rest.split('/').collect();
        let [server, session, transport] = segments.as_slice() else {
            return Route::NotFound;
        };
        if !is_valid_segment(server) {
            return Route::NotFound;
        }
        match (SessionId::parse(session), TransportKind::from_segment(transport)) {
            (Some(session), Some(transport)) => Route::Session {
                server: server.to_string(),
                session,
                transport,
            },
            _ => Route::NotFound,
        }
    }
}

// iframe.html, iframe-0.3.4.html, iframe-abc_1.html ...
fn is_iframe_page(name: &str) -> bool {
    name.strip_prefix("iframe")
        .and_then(|rest| rest.strip_suffix(".html"))
        .map(|middle| {
            middle.chars().all(|c| {
                c.is_ascii_digit() || c.is_ascii_lowercase() || matches!(c, '-' | '.' | '_')
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SockJsConfig;
    use crate::handler::handler_fn;

    fn app(prefix: &str) -> Application {
        let handler = Arc::new(handler_fn(|_socket| async {}));
        Application::new(SockJsConfig::builder().prefix(prefix).build(), handler).unwrap()
    }

    #[test]
    fn test_route_parsing() {
        assert_eq!(Route::parse(""), Route::Greeting);
        assert_eq!(Route::parse("/"), Route::Greeting);
        assert_eq!(Route::parse("/info"), Route::Info);
        assert_eq!(Route::parse("/iframe.html"), Route::Iframe);
        assert_eq!(Route::parse("/iframe-0.3.4.html"), Route::Iframe);
        assert_eq!(Route::parse("/websocket"), Route::RawWebSocket);
        assert_eq!(
            Route::parse("/000/abc123/xhr"),
            Route::Session {
                server: "000".to_string(),
                session: SessionId::parse("abc123").unwrap(),
                transport: TransportKind::XhrPolling,
            }
        );
    }

    #[test]
    fn test_invalid_session_paths() {
        assert_eq!(Route::parse("/000/abc/nope"), Route::NotFound);
        assert_eq!(Route::parse("/000/a.b/xhr"), Route::NotFound);
        assert_eq!(Route::parse("/0.0/abc/xhr"), Route::NotFound);
        assert_eq!(Route::parse("//abc/xhr"), Route::NotFound);
        assert_eq!(Route::parse("/000/abc/xhr/extra"), Route::NotFound);
        assert_eq!(Route::parse("/iframe.htm"), Route::NotFound);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut router = AppRouter::new();
        router.install(app("/")).unwrap();
        router.install(app("/echo")).unwrap();
        router.install(app("/echo/nested")).unwrap();

        let (found, rest) = router.resolve("/echo/info").unwrap();
        assert_eq!(found.prefix(), "/echo");
        assert_eq!(rest, "/info");

        let (found, rest) = router.resolve("/echo/nested").unwrap();
        assert_eq!(found.prefix(), "/echo/nested");
        assert_eq!(rest, "");

        // Prefix boundaries are whole segments
        let (found, rest) = router.resolve("/echoes/info").unwrap();
        assert_eq!(found.prefix(), "");
        assert_eq!(rest, "/echoes/info");
    }

    #[test]
    fn test_duplicate_prefix_rejected() {
        let mut router = AppRouter::new();
        router.install(app("/echo")).unwrap();
        let err = router.install(app("/echo/")).unwrap_err();
        assert!(matches!(err, ServerError::DuplicatePrefix(_)));
        assert_eq!(router.len(), 1);
    }
}
