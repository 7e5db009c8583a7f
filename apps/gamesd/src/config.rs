use std::{fs, path::Path};

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Settings {
    pub bus_url: String,
    pub bind: String,
    pub public_host: String,
    pub topic: String,
    pub subscriber: String,
    pub resources: Vec<String>,
    pub resource_topics: Vec<String>,
    pub games_dir: String,
    pub locales_dir: String,
    pub img_root: String,
    pub strict_resource_subscriptions: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bus_url: "http://127.0.0.1:8181".into(),
            bind: "0.0.0.0:9706".into(),
            public_host: "localhost".into(),
            topic: "games".into(),
            subscriber: "games_app".into(),
            resources: vec!["UI".into()],
            resource_topics: vec!["UIEvents".into(), "UCEvents".into()],
            games_dir: "./games".into(),
            locales_dir: "./locales".into(),
            img_root: "/_img/launcher".into(),
            strict_resource_subscriptions: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bus_url: Option<String>,
    bind: Option<String>,
    public_host: Option<String>,
    topic: Option<String>,
    subscriber: Option<String>,
    resources: Option<Vec<String>>,
    resource_topics: Option<Vec<String>>,
    games_dir: Option<String>,
    locales_dir: Option<String>,
    img_root: Option<String>,
    strict_resource_subscriptions: Option<bool>,
}

/// Defaults, overlaid with the settings file when it exists, overlaid with
/// `GAMESD_*` environment variables.
pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file) => apply_file(&mut settings, file),
            Err(error) => {
                warn!(path = %path.display(), %error, "ignoring unreadable settings file")
            }
        }
    }

    if let Ok(v) = std::env::var("GAMESD_BUS_URL") {
        settings.bus_url = v;
    }
    if let Ok(v) = std::env::var("GAMESD_BIND") {
        settings.bind = v;
    }
    if let Ok(v) = std::env::var("GAMESD_PUBLIC_HOST") {
        settings.public_host = v;
    }
    if let Ok(v) = std::env::var("GAMESD_TOPIC") {
        settings.topic = v;
    }
    if let Ok(v) = std::env::var("GAMESD_SUBSCRIBER") {
        settings.subscriber = v;
    }
    if let Ok(v) = std::env::var("GAMESD_GAMES_DIR") {
        settings.games_dir = v;
    }
    if let Ok(v) = std::env::var("GAMESD_LOCALES_DIR") {
        settings.locales_dir = v;
    }
    if let Ok(v) = std::env::var("GAMESD_IMG_ROOT") {
        settings.img_root = v;
    }
    if let Ok(v) = std::env::var("GAMESD_STRICT_RESOURCE_SUBSCRIPTIONS") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.strict_resource_subscriptions = parsed;
        }
    }

    settings
}

fn apply_file(settings: &mut Settings, file: FileSettings) {
    if let Some(v) = file.bus_url {
        settings.bus_url = v;
    }
    if let Some(v) = file.bind {
        settings.bind = v;
    }
    if let Some(v) = file.public_host {
        settings.public_host = v;
    }
    if let Some(v) = file.topic {
        settings.topic = v;
    }
    if let Some(v) = file.subscriber {
        settings.subscriber = v;
    }
    if let Some(v) = file.resources {
        settings.resources = v;
    }
    if let Some(v) = file.resource_topics {
        settings.resource_topics = v;
    }
    if let Some(v) = file.games_dir {
        settings.games_dir = v;
    }
    if let Some(v) = file.locales_dir {
        settings.locales_dir = v;
    }
    if let Some(v) = file.img_root {
        settings.img_root = v;
    }
    if let Some(v) = file.strict_resource_subscriptions {
        settings.strict_resource_subscriptions = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_settings_file() {
        let settings = load_settings(Path::new("./does-not-exist.toml"));
        assert_eq!(settings.topic, "games");
        assert_eq!(settings.subscriber, "games_app");
        assert_eq!(settings.resource_topics, vec!["UIEvents", "UCEvents"]);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gamesd.toml");
        fs::write(
            &path,
            "topic = \"puzzles\"\nstrict_resource_subscriptions = true\n",
        )
        .expect("write");

        let settings = load_settings(&path);
        assert_eq!(settings.topic, "puzzles");
        assert!(settings.strict_resource_subscriptions);
        assert_eq!(settings.subscriber, "games_app");
    }

    #[test]
    fn environment_overrides_the_settings_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gamesd.toml");
        fs::write(&path, "public_host = \"from-file\"\n").expect("write");

        std::env::set_var("GAMESD_PUBLIC_HOST", "from-env");
        let settings = load_settings(&path);
        std::env::remove_var("GAMESD_PUBLIC_HOST");

        assert_eq!(settings.public_host, "from-env");
    }
}
