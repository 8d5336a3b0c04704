//! CLI argument definitions for the CodeScope client.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// CodeScope: ask questions about a codebase and search it from the terminal.
#[derive(Parser, Debug)]
#[command(name = "codescope", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Base URL of the CodeScope backend.
    #[arg(short = 's', long = "server")]
    pub server: Option<String>,

    /// Data directory for the local conversation database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Repository to open (index) at startup.
    #[arg(short = 'r', long = "repo")]
    pub repo: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CODESCOPE_CONFIG env var > ~/.codescope/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        let env = std::env::var("CODESCOPE_CONFIG").ok();
        self.config_path_from(env)
    }

    fn config_path_from(&self, env: Option<String>) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = env.filter(|p| !p.is_empty()) {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the backend base URL.
    ///
    /// Priority: --server flag > CODESCOPE_SERVER env var > config file value.
    pub fn resolve_server(&self, config_url: &str) -> String {
        let env = std::env::var("CODESCOPE_SERVER").ok();
        self.server_from(env, config_url)
    }

    fn server_from(&self, env: Option<String>, config_url: &str) -> String {
        if let Some(ref s) = self.server {
            return s.clone();
        }
        if let Some(s) = env.filter(|s| !s.trim().is_empty()) {
            return s;
        }
        config_url.to_string()
    }

    /// Resolve the data directory path.
    ///
    /// Returns `None` if not overridden (use config default).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".codescope").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".codescope").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("codescope").chain(args.iter().copied()))
    }

    #[test]
    fn test_flags_parse() {
        let args = parse(&[
            "--config",
            "/tmp/c.toml",
            "-s",
            "http://backend:9000",
            "--repo",
            "/work/repo",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(args.server.as_deref(), Some("http://backend:9000"));
        assert_eq!(args.repo.as_deref(), Some("/work/repo"));
    }

    #[test]
    fn test_config_path_priority() {
        let flagged = parse(&["-c", "/flag.toml"]);
        assert_eq!(
            flagged.config_path_from(Some("/env.toml".into())),
            PathBuf::from("/flag.toml")
        );

        let bare = parse(&[]);
        assert_eq!(
            bare.config_path_from(Some("/env.toml".into())),
            PathBuf::from("/env.toml")
        );
        assert!(bare
            .config_path_from(None)
            .ends_with("config.toml"));
    }

    #[test]
    fn test_server_priority() {
        let flagged = parse(&["--server", "http://flag"]);
        assert_eq!(
            flagged.server_from(Some("http://env".into()), "http://file"),
            "http://flag"
        );

        let bare = parse(&[]);
        assert_eq!(
            bare.server_from(Some("http://env".into()), "http://file"),
            "http://env"
        );
        assert_eq!(bare.server_from(Some("  ".into()), "http://file"), "http://file");
        assert_eq!(bare.server_from(None, "http://file"), "http://file");
    }

    #[test]
    fn test_log_level_and_data_dir() {
        let args = parse(&["-l", "debug", "-d", "/data"]);
        assert_eq!(args.resolve_log_level("info"), "debug");
        assert_eq!(args.resolve_data_dir().as_deref(), Some("/data"));

        let bare = parse(&[]);
        assert_eq!(bare.resolve_log_level("warn"), "warn");
        assert_eq!(bare.resolve_data_dir(), None);
    }
}
