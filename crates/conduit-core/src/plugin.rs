//! Plugin permissions and restricted manager views.
//!
//! A plugin declares the capabilities it needs as a [`PermissionSet`]. At
//! install time the framework builds a [`ScopedManagers`] holding only the
//! granted handles; anything else is simply not there to be reached.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::managers::{
    Cache, Database, FileManager, Managers, Metrics, Security, SessionStore, Translator,
};

/// One manager capability a plugin may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// [`Database`] access.
    Database,
    /// [`Cache`] access.
    Cache,
    /// [`SessionStore`] access.
    Sessions,
    /// [`Security`] access.
    Security,
    /// [`Translator`] access.
    Translator,
    /// [`FileManager`] access.
    Files,
    /// [`Metrics`] access.
    Metrics,
}

impl Permission {
    /// Every permission.
    pub const ALL: [Self; 7] = [
        Self::Database,
        Self::Cache,
        Self::Sessions,
        Self::Security,
        Self::Translator,
        Self::Files,
        Self::Metrics,
    ];

    /// The permission's name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Cache => "cache",
            Self::Sessions => "sessions",
            Self::Security => "security",
            Self::Translator => "translator",
            Self::Files => "files",
            Self::Metrics => "metrics",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::bad_request(format!("unknown permission `{s}`")))
    }
}

/// A set of [`Permission`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    /// The empty set.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Every permission.
    #[must_use]
    pub fn all() -> Self {
        Permission::ALL.into_iter().collect()
    }

    /// Adds `permission`.
    #[must_use]
    pub fn with(mut self, permission: Permission) -> Self {
        self.0.insert(permission);
        self
    }

    /// Returns true if `permission` is in the set.
    #[must_use]
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    /// Iterates in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The managers a plugin was granted.
///
/// Built once per plugin; handles the plugin did not declare are never copied
/// in, so asking for one yields [`Error::PermissionDenied`].
///
/// # Example
///
/// ```
/// use conduit_core::managers::{Managers, MemoryCache};
/// use conduit_core::plugin::{Permission, PermissionSet, ScopedManagers};
/// use conduit_core::Error;
///
/// let managers = Managers::builder().cache(MemoryCache::new()).build();
/// let granted = PermissionSet::none().with(Permission::Metrics);
/// let view = ScopedManagers::new(&managers, &granted);
///
/// assert!(view.metrics().is_ok());
/// assert!(matches!(view.cache(), Err(Error::PermissionDenied(Permission::Cache))));
/// ```
#[derive(Clone)]
pub struct ScopedManagers {
    granted: PermissionSet,
    database: Option<Arc<dyn Database>>,
    cache: Option<Arc<dyn Cache>>,
    sessions: Option<Arc<dyn SessionStore>>,
    security: Option<Arc<dyn Security>>,
    translator: Option<Arc<dyn Translator>>,
    files: Option<Arc<FileManager>>,
    metrics: Option<Arc<dyn Metrics>>,
}

impl ScopedManagers {
    /// Copies the handles `granted` allows out of `managers`.
    #[must_use]
    pub fn new(managers: &Managers, granted: &PermissionSet) -> Self {
        let pick = |p: Permission| granted.contains(p);
        Self {
            granted: granted.clone(),
            database: managers
                .database()
                .filter(|_| pick(Permission::Database))
                .cloned(),
            cache: managers.cache().filter(|_| pick(Permission::Cache)).cloned(),
            sessions: managers
                .sessions()
                .filter(|_| pick(Permission::Sessions))
                .cloned(),
            security: managers
                .security()
                .filter(|_| pick(Permission::Security))
                .cloned(),
            translator: managers
                .translator()
                .filter(|_| pick(Permission::Translator))
                .cloned(),
            files: managers.files().filter(|_| pick(Permission::Files)).cloned(),
            metrics: pick(Permission::Metrics).then(|| Arc::clone(managers.metrics())),
        }
    }

    /// The permissions this view was built from.
    #[must_use]
    pub fn granted(&self) -> &PermissionSet {
        &self.granted
    }

    fn get<'a, T: ?Sized>(
        &self,
        permission: Permission,
        handle: Option<&'a Arc<T>>,
    ) -> Result<&'a Arc<T>> {
        if !self.granted.contains(permission) {
            return Err(Error::PermissionDenied(permission));
        }
        handle.ok_or_else(|| Error::resource(permission.as_str(), "not configured"))
    }

    /// The database.
    pub fn database(&self) -> Result<&Arc<dyn Database>> {
        self.get(Permission::Database, self.database.as_ref())
    }

    /// The cache.
    pub fn cache(&self) -> Result<&Arc<dyn Cache>> {
        self.get(Permission::Cache, self.cache.as_ref())
    }

    /// The session store.
    pub fn sessions(&self) -> Result<&Arc<dyn SessionStore>> {
        self.get(Permission::Sessions, self.sessions.as_ref())
    }

    /// The security manager.
    pub fn security(&self) -> Result<&Arc<dyn Security>> {
        self.get(Permission::Security, self.security.as_ref())
    }

    /// The translator.
    pub fn translator(&self) -> Result<&Arc<dyn Translator>> {
        self.get(Permission::Translator, self.translator.as_ref())
    }

    /// The file manager.
    pub fn files(&self) -> Result<&Arc<FileManager>> {
        self.get(Permission::Files, self.files.as_ref())
    }

    /// The metrics sink.
    pub fn metrics(&self) -> Result<&Arc<dyn Metrics>> {
        self.get(Permission::Metrics, self.metrics.as_ref())
    }
}

impl fmt::Debug for ScopedManagers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedManagers")
            .field("granted", &self.granted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::{MemoryCache, StaticTranslator};

    #[test]
    fn test_undeclared_handles_are_absent() {
        let managers = Managers::builder()
            .cache(MemoryCache::new())
            .translator(StaticTranslator::new("en"))
            .build();
        let view = ScopedManagers::new(&managers, &PermissionSet::none());

        assert!(view.cache.is_none());
        assert!(view.translator.is_none());
        assert!(view.metrics.is_none());
    }

    #[test]
    fn test_granted_but_unconfigured_is_resource_error() {
        let managers = Managers::default();
        let view = ScopedManagers::new(&managers, &PermissionSet::all());
        assert!(matches!(view.database(), Err(Error::Resource { .. })));
        assert!(view.metrics().is_ok());
    }

    #[test]
    fn test_permission_parse() {
        assert_eq!("sessions".parse::<Permission>().unwrap(), Permission::Sessions);
        assert!("root".parse::<Permission>().is_err());
    }

    #[test]
    fn test_permission_set_serde() {
        let set: PermissionSet = serde_json::from_str(r#"["cache","metrics"]"#).unwrap();
        assert!(set.contains(Permission::Cache));
        assert!(!set.contains(Permission::Database));
        assert_eq!(set.iter().count(), 2);
    }
}
