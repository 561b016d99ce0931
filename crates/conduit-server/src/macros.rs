// Registration shorthands shared by `Framework`, `Group` and `PluginHost`.
// The implementing type provides
// `fn add(&mut self, MethodFilter, &str, Arc<dyn Handler>, RouteOptions) -> &mut Self`.
macro_rules! route_methods {
    () => {
        /// Registers `handler` for `method` requests matching `pattern`.
        ///
        /// # Panics
        ///
        /// Panics if `pattern` is invalid or the route name is taken.
        pub fn route(
            &mut self,
            method: impl Into<::conduit_router::MethodFilter>,
            pattern: &str,
            handler: impl ::conduit_middleware::Handler,
        ) -> &mut Self {
            self.add(
                method.into(),
                pattern,
                ::std::sync::Arc::new(handler),
                $crate::RouteOptions::default(),
            )
        }

        /// Like `route`, with route-level middleware or a route name.
        pub fn route_with(
            &mut self,
            method: impl Into<::conduit_router::MethodFilter>,
            pattern: &str,
            handler: impl ::conduit_middleware::Handler,
            options: impl Into<$crate::RouteOptions>,
        ) -> &mut Self {
            self.add(
                method.into(),
                pattern,
                ::std::sync::Arc::new(handler),
                options.into(),
            )
        }

        /// Registers a `GET` route.
        pub fn get(&mut self, pattern: &str, handler: impl ::conduit_middleware::Handler) -> &mut Self {
            self.route(::http::Method::GET, pattern, handler)
        }

        /// Registers a `POST` route.
        pub fn post(&mut self, pattern: &str, handler: impl ::conduit_middleware::Handler) -> &mut Self {
            self.route(::http::Method::POST, pattern, handler)
        }

        /// Registers a `PUT` route.
        pub fn put(&mut self, pattern: &str, handler: impl ::conduit_middleware::Handler) -> &mut Self {
            self.route(::http::Method::PUT, pattern, handler)
        }

        /// Registers a `PATCH` route.
        pub fn patch(&mut self, pattern: &str, handler: impl ::conduit_middleware::Handler) -> &mut Self {
            self.route(::http::Method::PATCH, pattern, handler)
        }

        /// Registers a `DELETE` route.
        pub fn delete(&mut self, pattern: &str, handler: impl ::conduit_middleware::Handler) -> &mut Self {
            self.route(::http::Method::DELETE, pattern, handler)
        }

        /// Registers a route that accepts every method.
        pub fn any(&mut self, pattern: &str, handler: impl ::conduit_middleware::Handler) -> &mut Self {
            self.route(::conduit_router::MethodFilter::Any, pattern, handler)
        }
    };
}
