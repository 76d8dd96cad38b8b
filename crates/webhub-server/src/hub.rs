//! The hub: registry, options and the HTTP entry point.

use crate::config::Config;
use crate::error::HubError;
use crate::handlers;
use crate::metrics;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use webhub_core::{DescriptionError, Registry, RegistryError, Thing};

/// Checks a bearer token for a request URL.
pub trait TokenValidator: Send + Sync + 'static {
    /// Whether `token` grants access to `url`.
    fn validate(&self, token: &str, url: &str) -> bool;
}

impl<F> TokenValidator for F
where
    F: Fn(&str, &str) -> bool + Send + Sync + 'static,
{
    fn validate(&self, token: &str, url: &str) -> bool {
        self(token, url)
    }
}

/// Accepts a fixed set of tokens for every URL.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens(HashSet<String>);

impl StaticTokens {
    /// Create a validator accepting the given tokens.
    #[must_use]
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tokens.into_iter().map(Into::into).collect())
    }
}

impl TokenValidator for StaticTokens {
    fn validate(&self, token: &str, _url: &str) -> bool {
        self.0.contains(token)
    }
}

/// What the application injects into the hub.
#[derive(Default)]
pub struct HubOptions {
    /// Server configuration.
    pub config: Config,
    /// Validator for bearer tokens; without one every token is rejected.
    pub token_validator: Option<Arc<dyn TokenValidator>>,
    /// Handles every request under the account path.
    pub account_manager: Option<axum::Router>,
}

impl HubOptions {
    /// Options with the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Install a token validator.
    #[must_use]
    pub fn with_token_validator(mut self, validator: impl TokenValidator) -> Self {
        self.token_validator = Some(Arc::new(validator));
        self
    }

    /// Install an account manager.
    #[must_use]
    pub fn with_account_manager(mut self, manager: axum::Router) -> Self {
        self.account_manager = Some(manager);
        self
    }
}

struct HubInner {
    registry: Arc<Registry>,
    config: Config,
    token_validator: Option<Arc<dyn TokenValidator>>,
    account_manager: Option<axum::Router>,
    account_pattern: Regex,
}

/// A hub exposing things to HTTP and WebSocket clients.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create a hub.
    ///
    /// # Errors
    ///
    /// Returns an error if the account path cannot be turned into a
    /// pattern.
    pub fn new(options: HubOptions) -> Result<Self, regex::Error> {
        let account_pattern = Regex::new(&format!(
            r"^{}(/\S*)?$",
            regex::escape(&options.config.account_path)
        ))?;
        Ok(Self {
            inner: Arc::new(HubInner {
                registry: Arc::new(Registry::new()),
                config: options.config,
                token_validator: options.token_validator,
                account_manager: options.account_manager,
                account_pattern,
            }),
        })
    }

    /// Produce a thing from a description document. The thing is not
    /// reachable until it is exposed.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid description.
    pub fn produce(&self, document: Value) -> Result<Arc<Thing>, DescriptionError> {
        Ok(Arc::new(Thing::from_document(document)?))
    }

    /// Expose a thing to clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already exposed.
    pub fn expose(&self, thing: Arc<Thing>) -> Result<(), RegistryError> {
        self.inner.registry.expose(thing)?;
        metrics::set_things_exposed(self.inner.registry.len());
        Ok(())
    }

    /// Withdraw a thing, closing every client attached to it.
    pub fn withdraw(&self, name: &str) -> Option<Arc<Thing>> {
        let thing = self.inner.registry.withdraw(name);
        metrics::set_things_exposed(self.inner.registry.len());
        thing
    }

    /// The registry of exposed things.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// The hub configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Look up an exposed thing for a request.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownThing`] if nothing is exposed under `name`.
    pub fn thing(&self, name: &str) -> Result<Arc<Thing>, HubError> {
        self.inner
            .registry
            .get(name)
            .ok_or_else(|| HubError::UnknownThing(name.to_string()))
    }

    /// Whether a request may proceed. Requests without a token pass unless
    /// the configuration requires one.
    #[must_use]
    pub fn authorize(&self, token: Option<&str>, url: &str) -> bool {
        match token {
            None | Some("") => !self.inner.config.auth.require_token,
            Some(token) => match &self.inner.token_validator {
                Some(validator) => validator.validate(token, url),
                None => {
                    warn!("Token presented but no token validator is installed");
                    false
                }
            },
        }
    }

    /// Whether a path belongs to the account manager.
    #[must_use]
    pub fn is_account_path(&self, path: &str) -> bool {
        self.inner.account_pattern.is_match(path)
    }

    /// The injected account manager.
    #[must_use]
    pub fn account_manager(&self) -> Option<&axum::Router> {
        self.inner.account_manager.as_ref()
    }

    /// Build the HTTP router.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        handlers::router(self.clone())
    }

    /// Serve HTTP and WebSocket clients until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("WebHub listening on {}", addr);
        }
        axum::serve(listener, self.router()).await
    }
}
