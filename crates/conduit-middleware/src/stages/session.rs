//! Cookie sessions backed by the session store.
//!
//! Before the inner chain runs, the session named by the session cookie is
//! loaded from the [`SessionStore`] and placed on the context as a
//! [`Session`] extension; unknown or missing cookies start a fresh session.
//! Afterwards a modified session is saved and, if it is new, the cookie is
//! set. Handlers end a session with [`end_session`].
//!
//! ```text
//! load(cookie) → handler mutates ctx.get_mut::<Session>() → save if dirty → Set-Cookie
//! ```

use std::sync::Arc;

use conduit_core::managers::{Session, SessionStore};
use conduit_core::{BoxFuture, Context, Error, Result};
use http::header::{COOKIE, SET_COOKIE};
use http::HeaderValue;

use crate::middleware::{Middleware, Next};

/// Default session cookie name.
pub const SESSION_COOKIE: &str = "conduit_session";

/// Marker placed by [`end_session`].
#[derive(Debug, Clone, Copy)]
struct EndSession;

/// Destroys the current session once the chain finishes and clears the cookie.
pub fn end_session(ctx: &mut Context) {
    ctx.insert(EndSession);
}

/// Loads and persists the cookie session.
#[derive(Debug, Clone)]
pub struct Sessions {
    cookie: String,
    secure: bool,
}

impl Default for Sessions {
    fn default() -> Self {
        Self {
            cookie: SESSION_COOKIE.to_string(),
            secure: false,
        }
    }
}

impl Sessions {
    /// Uses the `conduit_session` cookie.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a different cookie name.
    #[must_use]
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie = name.into();
        self
    }

    /// Adds the `Secure` attribute to the cookie.
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    fn presented_id(&self, ctx: &Context) -> Option<String> {
        ctx.headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie)
            .map(|(_, value)| value.trim_matches('"').to_string())
            .filter(|value| !value.is_empty())
    }

    fn cookie_header(&self, value: &str, max_age: Option<u64>) -> Option<HeaderValue> {
        let mut cookie = format!("{}={value}; Path=/; HttpOnly; SameSite=Lax", self.cookie);
        if let Some(max_age) = max_age {
            cookie.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).ok()
    }

    async fn finish(
        &self,
        ctx: &mut Context,
        store: &dyn SessionStore,
        presented: Option<&str>,
    ) -> Result<()> {
        let Some(mut session) = ctx.remove::<Session>() else {
            return Ok(());
        };

        if ctx.remove::<EndSession>().is_some() {
            store.destroy(session.id()).await?;
            if presented.is_some() {
                if let Some(header) = self.cookie_header("", Some(0)) {
                    ctx.response_mut().headers_mut().append(SET_COOKIE, header);
                }
            }
            return Ok(());
        }

        if !session.is_dirty() {
            return Ok(());
        }
        store.save(&session).await?;
        session.mark_clean();

        if presented != Some(session.id()) {
            if let Some(header) = self.cookie_header(session.id(), None) {
                ctx.response_mut().headers_mut().append(SET_COOKIE, header);
            }
        }
        Ok(())
    }
}

impl Middleware for Sessions {
    fn name(&self) -> &'static str {
        "sessions"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let store: Arc<dyn SessionStore> = ctx
                .managers()
                .sessions()
                .cloned()
                .ok_or_else(|| Error::resource("sessions", "not configured"))?;

            let presented = self.presented_id(ctx);
            let loaded = match presented.as_deref() {
                Some(id) => store.load(id).await?,
                None => None,
            };
            let mut session = loaded.unwrap_or_default();
            session.mark_clean();
            ctx.insert(session);

            let result = next.run(ctx).await;
            if result.is_err() {
                ctx.remove::<Session>();
                return result;
            }

            self.finish(ctx, store.as_ref(), presented.as_deref()).await?;
            result
        })
    }
}
