//! Static data sources for the launcher: the game catalog scanned from disk
//! and the per-locale message tables. Both are loaded once at startup and
//! never change afterwards.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use url::Url;

pub mod i18n;

pub use i18n::Translations;

/// File suffix a stored entry must carry to be launchable.
const GAME_FILE_SUFFIX: &str = ".swf";

/// One launchable item: the stored file name plus the stem used in menu
/// actions and translation keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub file_name: String,
    pub stem: String,
}

impl CatalogEntry {
    fn from_file_name(file_name: String) -> Self {
        let stem = match file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => file_name.clone(),
        };
        Self { file_name, stem }
    }
}

/// The immutable list of launchable items.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Scan a directory, keeping regular files only.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        let listing = fs::read_dir(dir)
            .with_context(|| format!("failed to read games directory {}", dir.display()))?;
        for entry in listing {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            entries.push(CatalogEntry::from_file_name(file_name));
        }
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(Self { entries })
    }

    pub fn from_file_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: names
                .into_iter()
                .map(|name| CatalogEntry::from_file_name(name.into()))
                .collect(),
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn contains_file(&self, file_name: &str) -> bool {
        self.entries.iter().any(|e| e.file_name == file_name)
    }

    /// Resolve a menu-level game name to its stored file name. The lookup is
    /// an exact match against the suffixed form, so `mario` only resolves
    /// when `mario.swf` was scanned.
    pub fn file_for(&self, game: &str) -> Option<&str> {
        let wanted = format!("{game}{GAME_FILE_SUFFIX}");
        self.entries
            .iter()
            .find(|e| e.file_name == wanted)
            .map(|e| e.file_name.as_str())
    }

    /// The URL the UI should load for a game, composed from the content
    /// server's advertised host and port. None when the game is unknown.
    pub fn game_url(&self, game: &str, host: &str, port: u16) -> Option<String> {
        let file = self.file_for(game)?;
        let mut url = Url::parse(&format!("http://{host}:{port}")).ok()?;
        url.set_path(file);
        Some(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    #[test]
    fn scan_keeps_regular_files_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        File::create(dir.path().join("mario.swf")).expect("file");
        File::create(dir.path().join("luigi.swf")).expect("file");
        fs::create_dir(dir.path().join("saves")).expect("subdir");

        let catalog = Catalog::scan(dir.path()).expect("scan");
        let names: Vec<_> = catalog.entries().iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["luigi.swf", "mario.swf"]);
        assert_eq!(catalog.entries()[1].stem, "mario");
    }

    #[test]
    fn file_lookup_requires_the_suffixed_form() {
        let catalog = Catalog::from_file_names(["mario.swf", "notes.txt"]);
        assert_eq!(catalog.file_for("mario"), Some("mario.swf"));
        assert_eq!(catalog.file_for("mario.swf"), None);
        assert_eq!(catalog.file_for("notes"), None);
    }

    #[test]
    fn game_url_percent_encodes_the_file_name() {
        let catalog = Catalog::from_file_names(["space race.swf"]);
        assert_eq!(
            catalog.game_url("space race", "localhost", 9706),
            Some("http://localhost:9706/space%20race.swf".to_string())
        );
        assert_eq!(catalog.game_url("pong", "localhost", 9706), None);
    }
}
