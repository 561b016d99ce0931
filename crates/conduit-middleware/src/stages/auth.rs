//! Authentication and authorization through the security manager.
//!
//! [`Authenticate`] resolves the caller from the request headers and stores
//! the [`Principal`](conduit_core::managers::Principal) on the context.
//! [`Authorize`] checks that principal against a named action. Both fail with
//! a resource error when no security manager is configured.
//!
//! ```text
//! Authenticate → Authorize("orders.write") → handler
//! ```

use std::sync::Arc;

use conduit_core::managers::Security;
use conduit_core::{BoxFuture, Context, Error, Result};

use crate::middleware::{Middleware, Next};

fn security(ctx: &Context) -> Result<Arc<dyn Security>> {
    ctx.managers()
        .security()
        .cloned()
        .ok_or_else(|| Error::resource("security", "not configured"))
}

/// Resolves the caller through [`Security::authenticate`].
///
/// In the default, required mode, a request without valid credentials is
/// rejected with [`Error::Unauthorized`] before the rest of the chain runs.
/// In optional mode the chain continues anonymously.
#[derive(Debug, Clone, Copy)]
pub struct Authenticate {
    required: bool,
}

impl Default for Authenticate {
    fn default() -> Self {
        Self::required()
    }
}

impl Authenticate {
    /// Rejects anonymous requests.
    #[must_use]
    pub const fn required() -> Self {
        Self { required: true }
    }

    /// Lets anonymous requests through without a principal.
    #[must_use]
    pub const fn optional() -> Self {
        Self { required: false }
    }
}

impl Middleware for Authenticate {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let security = security(ctx)?;
            let principal = ctx
                .until_cancelled(security.authenticate(ctx.headers()))
                .await??;

            match principal {
                Some(principal) => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        principal = %principal.log_id(),
                        "caller authenticated"
                    );
                    ctx.set_principal(principal);
                }
                None if self.required => return Err(Error::Unauthorized),
                None => {}
            }

            next.run(ctx).await
        })
    }
}

/// Checks the authenticated caller against one action.
///
/// Must run after [`Authenticate`]. Without a principal the request fails with
/// [`Error::Unauthorized`]; a principal the security manager refuses fails
/// with [`Error::Forbidden`].
#[derive(Debug, Clone)]
pub struct Authorize {
    action: String,
}

impl Authorize {
    /// Requires permission for `action`.
    #[must_use]
    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
        }
    }
}

impl Middleware for Authorize {
    fn name(&self) -> &'static str {
        "authorize"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let security = security(ctx)?;
            let principal = ctx.principal().cloned().ok_or(Error::Unauthorized)?;

            let allowed = ctx
                .until_cancelled(security.authorize(&principal, &self.action))
                .await??;
            if !allowed {
                return Err(Error::forbidden(self.action.as_str()));
            }

            next.run(ctx).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::middleware::{handler_fn, BoxedMiddleware};
    use bytes::Bytes;
    use conduit_core::managers::{Managers, Principal, StaticSecurity};
    use conduit_core::ContextFactory;
    use http::StatusCode;

    fn factory() -> ContextFactory {
        let security = StaticSecurity::new()
            .with_credential("alice-token", Principal::user("alice", ["admin"]))
            .with_credential("bob-token", Principal::user("bob", ["viewer"]))
            .with_grant("admin", "orders.delete")
            .with_grant("viewer", "orders.read");
        ContextFactory::new(Arc::new(Managers::builder().security(security).build()))
    }

    fn request(token: Option<&str>) -> http::Request<Bytes> {
        let mut builder = http::Request::delete("/orders/1");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Bytes::new()).unwrap()
    }

    fn chain(layers: Vec<BoxedMiddleware>) -> Chain {
        let handler = handler_fn(|ctx| {
            Box::pin(async move {
                let who = ctx.principal().map(Principal::log_id).unwrap_or_default();
                ctx.text(StatusCode::OK, who);
                Ok(())
            })
        });
        Chain::new(&layers, &[], Arc::new(handler))
    }

    #[tokio::test]
    async fn test_required_rejects_anonymous() {
        let chain = chain(vec![Arc::new(Authenticate::required())]);
        let mut ctx = factory().build(request(None), None);
        let err = chain.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
        assert!(!ctx.is_written());
    }

    #[tokio::test]
    async fn test_optional_continues_anonymously() {
        let chain = chain(vec![Arc::new(Authenticate::optional())]);
        let mut ctx = factory().build(request(None), None);
        chain.run(&mut ctx).await.unwrap();
        assert!(ctx.principal().is_none());
        assert_eq!(ctx.response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_authorize_by_role() {
        let chain = chain(vec![
            Arc::new(Authenticate::required()),
            Arc::new(Authorize::action("orders.delete")),
        ]);

        let mut admin = factory().build(request(Some("alice-token")), None);
        chain.run(&mut admin).await.unwrap();
        assert_eq!(admin.principal().map(Principal::log_id).as_deref(), Some("user:alice"));

        let mut viewer = factory().build(request(Some("bob-token")), None);
        let err = chain.run(&mut viewer).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_authorize_without_principal() {
        let chain = chain(vec![Arc::new(Authorize::action("orders.read"))]);
        let mut ctx = factory().build(request(Some("bob-token")), None);
        assert!(matches!(chain.run(&mut ctx).await, Err(Error::Unauthorized)));
    }

    #[tokio::test]
    async fn test_missing_security_manager() {
        let chain = chain(vec![Arc::new(Authenticate::required())]);
        let mut ctx = ContextFactory::new(Arc::new(Managers::default())).build(request(None), None);
        assert!(matches!(
            chain.run(&mut ctx).await,
            Err(Error::Resource { manager: "security", .. })
        ));
    }
}
