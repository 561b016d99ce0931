//! Translation capability.

use std::collections::HashMap;

/// Looks up localized messages.
pub trait Translator: Send + Sync {
    /// Returns the message for `key` in `locale`, falling back as the
    /// implementation sees fit. `None` means no catalog has the key.
    fn translate(&self, locale: &str, key: &str) -> Option<String>;

    /// Locale used when the request does not state one.
    fn default_locale(&self) -> &str;
}

/// A [`Translator`] over in-memory catalogs.
///
/// Lookup tries the exact locale (`pt-BR`), then its language (`pt`), then
/// the fallback locale.
///
/// ```
/// use conduit_core::managers::{StaticTranslator, Translator};
///
/// let t = StaticTranslator::new("en")
///     .with_message("en", "greeting", "Hello")
///     .with_message("pt", "greeting", "Olá");
///
/// assert_eq!(t.translate("pt-BR", "greeting").as_deref(), Some("Olá"));
/// assert_eq!(t.translate("fr", "greeting").as_deref(), Some("Hello"));
/// assert_eq!(t.translate("fr", "farewell"), None);
/// ```
#[derive(Debug, Clone)]
pub struct StaticTranslator {
    fallback: String,
    catalogs: HashMap<String, HashMap<String, String>>,
}

impl StaticTranslator {
    /// Creates a translator with `fallback` as the default locale.
    #[must_use]
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            fallback: normalize(&fallback.into()),
            catalogs: HashMap::new(),
        }
    }

    /// Adds one message.
    #[must_use]
    pub fn with_message(
        mut self,
        locale: &str,
        key: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.catalogs
            .entry(normalize(locale))
            .or_default()
            .insert(key.into(), text.into());
        self
    }

    /// Adds a whole catalog for `locale`.
    #[must_use]
    pub fn with_catalog(mut self, locale: &str, messages: HashMap<String, String>) -> Self {
        self.catalogs
            .entry(normalize(locale))
            .or_default()
            .extend(messages);
        self
    }

    fn lookup(&self, locale: &str, key: &str) -> Option<String> {
        self.catalogs.get(locale)?.get(key).cloned()
    }
}

impl Translator for StaticTranslator {
    fn translate(&self, locale: &str, key: &str) -> Option<String> {
        let locale = normalize(locale);
        let language = locale.split('-').next().unwrap_or(&locale);
        self.lookup(&locale, key)
            .or_else(|| self.lookup(language, key))
            .or_else(|| self.lookup(&self.fallback, key))
    }

    fn default_locale(&self) -> &str {
        &self.fallback
    }
}

fn normalize(locale: &str) -> String {
    locale.trim().replace('_', "-").to_ascii_lowercase()
}

/// Picks the highest-weighted language tag from an `Accept-Language` value.
///
/// ```
/// use conduit_core::managers::preferred_locale;
///
/// assert_eq!(preferred_locale("fr-CH, fr;q=0.9, en;q=0.8").as_deref(), Some("fr-ch"));
/// assert_eq!(preferred_locale("en;q=0.5, de;q=0.9").as_deref(), Some("de"));
/// assert_eq!(preferred_locale("*"), None);
/// ```
#[must_use]
pub fn preferred_locale(accept_language: &str) -> Option<String> {
    accept_language
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let tag = pieces.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let quality = pieces
                .find_map(|p| p.trim().strip_prefix("q="))
                .and_then(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            Some((tag, quality))
        })
        .filter(|(_, q)| *q > 0.0)
        .fold(None::<(&str, f32)>, |best, (tag, q)| match best {
            Some((_, best_q)) if best_q >= q => best,
            _ => Some((tag, q)),
        })
        .map(|(tag, _)| normalize(tag))
}
