//! Caller session resolution.
//!
//! The execution backend authenticates every call with the caller's Wind
//! session id. Callers either hand it over explicitly or it is picked up from
//! the ambient [`RequestContext`] of the inbound request.

use std::future::Future;

use crate::error::ToolTestError;

/// Preferred session header / parameter / cookie name.
pub const SESSION_ID_KEY: &str = "windsessionid";
/// Legacy spelling, accepted as a fallback.
pub const LEGACY_SESSION_ID_KEY: &str = "wind.sessionid";
/// Generic header some front-ends send instead of the Wind names.
pub const GENERIC_SESSION_HEADER: &str = "x-session-id";

const MISSING_SESSION: &str = "sessionId 不能为空";

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Session-bearing parts of an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header names are matched case-insensitively.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    /// Raw (still percent-encoded) query string, without the leading `?`.
    pub fn with_query(mut self, raw_query: &str) -> Self {
        self.query.extend(
            url::form_urlencoded::parse(raw_query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
        self
    }

    /// Raw `Cookie` header value (`a=b; c=d`). Values are URL-decoded.
    pub fn with_cookie_header(mut self, raw: &str) -> Self {
        for pair in raw.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            let decoded = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            self.cookies.push((name.trim().to_string(), decoded));
        }
        self
    }

    fn header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name)
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        lookup(&self.query, name)
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        lookup(&self.cookies, name)
    }

    /// Session id carried by this request, in priority order: headers, query
    /// parameters, cookies (each `windsessionid` before `wind.sessionid`), then
    /// the generic `X-Session-Id` header.
    pub fn session_id(&self) -> Option<String> {
        [
            self.header(SESSION_ID_KEY),
            self.header(LEGACY_SESSION_ID_KEY),
            self.query_param(SESSION_ID_KEY),
            self.query_param(LEGACY_SESSION_ID_KEY),
            self.cookie(SESSION_ID_KEY),
            self.cookie(LEGACY_SESSION_ID_KEY),
            self.header(GENERIC_SESSION_HEADER),
        ]
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
        .map(str::to_string)
    }
}

fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
        .find(|value| !value.trim().is_empty())
}

/// Run `fut` with `ctx` as the ambient request context.
pub async fn with_request_context<F: Future>(ctx: RequestContext, fut: F) -> F::Output {
    REQUEST_CONTEXT.scope(ctx, fut).await
}

/// Session id of the ambient request, or `None` when there is no request
/// context (background jobs, tests) or it carries no session.
pub fn current_session_id_from_context() -> Option<String> {
    REQUEST_CONTEXT
        .try_with(RequestContext::session_id)
        .ok()
        .flatten()
}

/// Validates the session id a caller supplied for a tool test.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionResolver;

impl SessionResolver {
    pub fn resolve(&self, explicit_session_id: Option<&str>) -> Result<String, ToolTestError> {
        match explicit_session_id {
            Some(session_id) if !session_id.trim().is_empty() => Ok(session_id.to_string()),
            _ => Err(ToolTestError::validation(MISSING_SESSION)),
        }
    }

    pub fn current_session_id_from_context(&self) -> Option<String> {
        current_session_id_from_context()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_or_missing_session_is_rejected() {
        let resolver = SessionResolver;
        for input in [None, Some(""), Some("   ")] {
            let err = resolver.resolve(input).unwrap_err();
            assert_eq!(err, ToolTestError::validation("sessionId 不能为空"));
        }
    }

    #[test]
    fn explicit_session_is_accepted() {
        assert_eq!(
            SessionResolver.resolve(Some("test-session")).unwrap(),
            "test-session"
        );
    }

    #[test]
    fn new_header_wins_over_legacy_header() {
        let ctx = RequestContext::new()
            .with_header("Wind.SessionId", "legacy")
            .with_header("WindSessionId", "current");
        assert_eq!(ctx.session_id().as_deref(), Some("current"));
    }

    #[test]
    fn legacy_header_used_when_new_one_is_blank() {
        let ctx = RequestContext::new()
            .with_header("windsessionid", "  ")
            .with_header("wind.sessionid", "legacy");
        assert_eq!(ctx.session_id().as_deref(), Some("legacy"));
    }

    #[test]
    fn query_then_cookie_fallbacks() {
        let from_query = RequestContext::new().with_query("foo=1&wind.sessionid=q%20id");
        assert_eq!(from_query.session_id().as_deref(), Some("q id"));

        let from_cookie = RequestContext::new()
            .with_query("foo=1")
            .with_cookie_header("theme=dark; wind.sessionid=abc%3D%3D; other=x");
        assert_eq!(from_cookie.session_id().as_deref(), Some("abc=="));

        let both = RequestContext::new()
            .with_query("windsessionid=from-query")
            .with_cookie_header("windsessionid=from-cookie");
        assert_eq!(both.session_id().as_deref(), Some("from-query"));
    }

    #[test]
    fn generic_header_is_last_resort() {
        let ctx = RequestContext::new()
            .with_header("X-Session-Id", "generic")
            .with_cookie_header("windsessionid=cookie");
        assert_eq!(ctx.session_id().as_deref(), Some("cookie"));

        let only_generic = RequestContext::new().with_header("X-Session-Id", "generic");
        assert_eq!(only_generic.session_id().as_deref(), Some("generic"));
    }

    #[test]
    fn no_ambient_context_yields_none() {
        assert_eq!(current_session_id_from_context(), None);
        assert_eq!(SessionResolver.current_session_id_from_context(), None);
    }

    #[tokio::test]
    async fn ambient_context_is_visible_inside_scope_only() {
        let ctx = RequestContext::new().with_header("windsessionid", "ambient");
        let inside = with_request_context(ctx, async { current_session_id_from_context() }).await;
        assert_eq!(inside.as_deref(), Some("ambient"));
        assert_eq!(current_session_id_from_context(), None);
    }
}
