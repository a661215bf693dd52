//! Remote configuration provider contract.
//!
//! Concrete providers (Redis, Consul, etcd, HTTP, ...) live outside the
//! core; this module defines the capability they implement and the
//! process-wide `scheme → provider` registry they register into at init.
//!
//! # Example
//!
//! ```rust,ignore
//! use argus::remote::{self, RemoteProvider};
//!
//! struct ConsulProvider { /* ... */ }
//!
//! impl RemoteProvider for ConsulProvider {
//!     fn name(&self) -> &str { "consul" }
//!     fn scheme(&self) -> &str { "consul" }
//!     // ...
//! }
//!
//! remote::register_provider(std::sync::Arc::new(ConsulProvider { /* ... */ }))?;
//! let config = remote::load("consul://localhost/app/config")?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crossbeam_channel::Receiver;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::parser::ConfigMap;

/// Capability contract for remote configuration sources.
///
/// Implementations must be safe for concurrent use.
pub trait RemoteProvider: Send + Sync {
    /// Provider name for error messages and audit records.
    fn name(&self) -> &str;

    /// URL scheme this provider claims, without the `://`.
    fn scheme(&self) -> &str;

    /// Checks that a URL is well-formed for this provider without
    /// contacting the remote.
    ///
    /// # Errors
    ///
    /// Provider-specific validation failure.
    fn validate(&self, url: &str) -> Result<()>;

    /// Fetches the configuration at `url`.
    ///
    /// # Errors
    ///
    /// Provider-specific load failure.
    fn load(&self, url: &str) -> Result<ConfigMap>;

    /// Subscribes to configuration updates at `url`.
    ///
    /// The receiver yields a full configuration per update until the
    /// provider drops the sender.
    ///
    /// # Errors
    ///
    /// Provider-specific subscription failure.
    fn watch(&self, url: &str) -> Result<Receiver<ConfigMap>>;

    /// Checks that the remote behind `url` is reachable and healthy.
    ///
    /// # Errors
    ///
    /// Provider-specific health failure.
    fn health_check(&self, url: &str) -> Result<()>;
}

type ProviderMap = HashMap<String, Arc<dyn RemoteProvider>>;

fn registry_slot() -> &'static RwLock<Arc<ProviderMap>> {
    static REGISTRY: OnceLock<RwLock<Arc<ProviderMap>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(Arc::new(HashMap::new())))
}

/// Registers a provider under its scheme.
///
/// Expected at process init; mutation snapshots and swaps the map, so
/// in-flight lookups keep their snapshot.
///
/// # Errors
///
/// [`Error::AlreadyRegistered`] when the scheme is taken.
pub fn register_provider(provider: Arc<dyn RemoteProvider>) -> Result<()> {
    let scheme = provider.scheme().to_ascii_lowercase();
    let slot = registry_slot();
    let mut guard = slot.write();

    if guard.contains_key(&scheme) {
        return Err(Error::already_registered(scheme));
    }

    let mut next = (**guard).clone();
    next.insert(scheme, provider);
    *guard = Arc::new(next);
    Ok(())
}

/// Looks up the provider registered for a URL's scheme.
#[must_use]
pub fn provider_for(url: &str) -> Option<Arc<dyn RemoteProvider>> {
    let scheme = url.split("://").next()?.to_ascii_lowercase();
    registry_slot().read().get(&scheme).cloned()
}

/// Validates and loads a remote configuration in one call.
///
/// # Errors
///
/// [`Error::InvalidConfig`] when no provider claims the URL's scheme,
/// otherwise whatever the provider returns.
pub fn load(url: &str) -> Result<ConfigMap> {
    let provider = provider_for(url).ok_or_else(|| {
        Error::invalid_config(
            "ARGUS_UNKNOWN_SCHEME",
            format!("no remote provider registered for '{url}'"),
        )
    })?;
    provider.validate(url)?;
    provider.load(url)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use serde_json::Value;

    struct StubProvider {
        scheme: &'static str,
    }

    impl RemoteProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn scheme(&self) -> &str {
            self.scheme
        }

        fn validate(&self, url: &str) -> Result<()> {
            if url.starts_with(&format!("{}://", self.scheme)) {
                Ok(())
            } else {
                Err(Error::invalid_config("ARGUS_UNKNOWN_SCHEME", "bad url"))
            }
        }

        fn load(&self, _url: &str) -> Result<ConfigMap> {
            let mut map = ConfigMap::new();
            map.insert("source".to_string(), Value::String(self.scheme.to_string()));
            Ok(map)
        }

        fn watch(&self, _url: &str) -> Result<Receiver<ConfigMap>> {
            let (_tx, rx) = bounded(0);
            Ok(rx)
        }

        fn health_check(&self, _url: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_load_and_collision() {
        register_provider(Arc::new(StubProvider { scheme: "stub" })).unwrap();

        let map = load("stub://anywhere/key").unwrap();
        assert_eq!(map.get("source"), Some(&Value::String("stub".to_string())));

        // Scheme collision is rejected; case does not matter.
        let err = register_provider(Arc::new(StubProvider { scheme: "STUB" })).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered { .. }));
    }

    #[test]
    fn test_unknown_scheme() {
        assert!(provider_for("nothing://x").is_none());
        assert!(load("nothing://x").is_err());
    }
}
