use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

use super::{types::Config, ConfigError};

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "BOOKBAG_";

/// Load configuration from file with environment variable overrides.
///
/// Nested keys use a double underscore: `BOOKBAG_SERVER__PORT=9000`.
/// Relative database and library paths are taken relative to the directory
/// holding the config file, so a config can travel with its data.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let mut config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        resolve_relative_paths(&mut config, base);
    }

    Ok(config)
}

/// Parse a TOML string as-is: no environment overrides, no path resolution.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

fn resolve_relative_paths(config: &mut Config, base: &Path) {
    let resolve = |p: &mut PathBuf| {
        if p.is_relative() {
            *p = base.join(&*p);
        }
    };

    resolve(&mut config.database.path);
    resolve(&mut config.library.root);
    resolve(&mut config.library.download_dir);
    if let Some(dir) = config.library.untracked_dir.as_mut() {
        resolve(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_from_str_keeps_paths_verbatim() {
        let config = load_config_from_str(
            r#"
[library]
root = "books"
download_dir = "/downloads"

[server]
port = 9000
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.library.root, PathBuf::from("books"));
    }

    #[test]
    fn test_from_str_missing_library() {
        let err = load_config_from_str("[server]\nport = 8080\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_file_not_found() {
        let err = load_config(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[server]
host = "127.0.0.1"
port = 3000

[library]
root = "/books"
download_dir = "/downloads"

[[providers]]
name = "indexer"
url = "http://localhost:5076"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.library.root, PathBuf::from("/books"));
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].name, "indexer");
    }

    #[test]
    fn test_relative_paths_follow_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bookbag.toml");
        std::fs::write(
            &path,
            r#"
[database]
path = "state/bookbag.db"

[library]
root = "library"
download_dir = "/srv/downloads"
untracked_dir = "drop"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.database.path, dir.path().join("state/bookbag.db"));
        assert_eq!(config.library.root, dir.path().join("library"));
        assert_eq!(config.library.download_dir, PathBuf::from("/srv/downloads"));
        assert_eq!(config.library.untracked_dir, Some(dir.path().join("drop")));
    }
}
