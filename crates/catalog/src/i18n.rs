use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use tracing::debug;

/// Locale-keyed message tables. Lookup falls back to the key itself, so an
/// untranslated entry shows up as its English source text rather than an
/// error.
#[derive(Debug, Clone, Default)]
pub struct Translations {
    domains: HashMap<String, HashMap<String, String>>,
}

impl Translations {
    /// Load every `<locale>.toml` table found in a directory.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut translations = Self::default();
        let listing = fs::read_dir(dir)
            .with_context(|| format!("failed to read locales directory {}", dir.display()))?;
        for entry in listing {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let Some(locale) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read message table {}", path.display()))?;
            let table: HashMap<String, String> = toml::from_str(&raw)
                .with_context(|| format!("invalid message table {}", path.display()))?;
            debug!(locale, entries = table.len(), "i18n: loaded message table");
            translations.insert_domain(locale, table);
        }
        Ok(translations)
    }

    pub fn insert_domain(&mut self, locale: impl Into<String>, table: HashMap<String, String>) {
        self.domains.insert(locale.into(), table);
    }

    /// Resolve `key` in `locale`, falling back to the key itself.
    pub fn text(&self, locale: &str, key: &str) -> String {
        self.domains
            .get(locale)
            .and_then(|table| table.get(key))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Translations {
        let mut translations = Translations::default();
        translations.insert_domain(
            "it-IT",
            HashMap::from([("Play?".to_string(), "Giocare?".to_string())]),
        );
        translations
    }

    #[test]
    fn lookup_resolves_in_the_requested_locale() {
        assert_eq!(sample().text("it-IT", "Play?"), "Giocare?");
    }

    #[test]
    fn missing_locale_or_key_falls_back_to_the_key() {
        let translations = sample();
        assert_eq!(translations.text("en-GB", "Play?"), "Play?");
        assert_eq!(translations.text("it-IT", "mario"), "mario");
    }

    #[test]
    fn load_dir_reads_per_locale_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("it-IT.toml"),
            "\"Play?\" = \"Giocare?\"\n",
        )
        .expect("write");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let translations = Translations::load_dir(dir.path()).expect("load");
        assert_eq!(translations.text("it-IT", "Play?"), "Giocare?");
    }
}
