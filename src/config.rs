//! Locations of the external tools and the default save directory.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

#[cfg(windows)]
const YTDLP_BIN: &str = "yt-dlp.exe";
#[cfg(not(windows))]
const YTDLP_BIN: &str = "yt-dlp";

#[cfg(windows)]
const FFMPEG_BIN: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const FFMPEG_BIN: &str = "ffmpeg";

pub const DOWNLOADER_NAME: &str = "yt-dlp";
pub const MERGER_NAME: &str = "ffmpeg";

/// Absolute paths of the downloader and the merge utility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub downloader: PathBuf,
    pub merger: PathBuf,
}

impl ToolPaths {
    pub fn new(downloader: impl Into<PathBuf>, merger: impl Into<PathBuf>) -> Self {
        Self {
            downloader: downloader.into(),
            merger: merger.into(),
        }
    }

    /// Both tools inside `dir`, using the platform binary names.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(YTDLP_BIN), dir.join(FFMPEG_BIN))
    }

    /// Every tool that does not exist on disk, with its expected path.
    pub fn missing_components(&self) -> Vec<(&'static str, PathBuf)> {
        [
            (DOWNLOADER_NAME, &self.downloader),
            (MERGER_NAME, &self.merger),
        ]
        .into_iter()
        .filter(|(_, path)| !path.is_file())
        .map(|(name, path)| (name, path.clone()))
        .collect()
    }

    pub fn ensure_downloader(&self) -> Result<()> {
        ensure_present(DOWNLOADER_NAME, &self.downloader)
    }

    /// Downloads need the merge utility as well as the downloader.
    pub fn ensure_all(&self) -> Result<()> {
        self.ensure_downloader()?;
        ensure_present(MERGER_NAME, &self.merger)
    }
}

fn ensure_present(component: &'static str, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::component_missing(component, path))
    }
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub tools: ToolPaths,
    /// Used when a request has no save path of its own.
    pub download_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Build the configuration from `.env`, the environment and platform defaults.
    ///
    /// `YTDLP_PATH` and `FFMPEG_PATH` override the bundled tools under
    /// `<exe dir>/bin`; `YTDESK_DOWNLOAD_DIR` overrides the platform downloads folder.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let bundled = ToolPaths::in_dir(&default_bin_dir());
        let tools = ToolPaths {
            downloader: env_path("YTDLP_PATH").unwrap_or(bundled.downloader),
            merger: env_path("FFMPEG_PATH").unwrap_or(bundled.merger),
        };
        let download_dir = env_path("YTDESK_DOWNLOAD_DIR").or_else(platform_download_dir);

        debug!(?tools, ?download_dir, "Loaded configuration");
        Self { tools, download_dir }
    }

    pub fn with_tools(tools: ToolPaths) -> Self {
        Self {
            tools,
            download_dir: platform_download_dir(),
        }
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Save directory for a request: its own override, else the configured default.
    pub fn resolve_save_dir(&self, save_path: Option<&Path>) -> Result<PathBuf> {
        save_path
            .map(Path::to_path_buf)
            .or_else(|| self.download_dir.clone())
            .ok_or_else(|| Error::config("no downloads directory could be determined"))
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// `bin/` next to the running executable.
fn default_bin_dir() -> PathBuf {
    match std::env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|p| p.join("bin"))
            .unwrap_or_else(|| PathBuf::from("bin")),
        Err(e) => {
            warn!("Could not resolve executable path: {}", e);
            PathBuf::from("bin")
        }
    }
}

fn platform_download_dir() -> Option<PathBuf> {
    dirs::download_dir().or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_components_lists_absent_tools() {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolPaths::in_dir(dir.path());
        assert_eq!(tools.missing_components().len(), 2);

        std::fs::write(&tools.downloader, b"").unwrap();
        let missing = tools.missing_components();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].0, MERGER_NAME);
        assert!(tools.ensure_downloader().is_ok());

        let err = tools.ensure_all().unwrap_err();
        assert!(matches!(err, Error::ComponentMissing { component: MERGER_NAME, .. }));
    }

    #[test]
    fn save_dir_prefers_request_override() {
        let cfg = AppConfig::with_tools(ToolPaths::new("a", "b")).with_download_dir("/dl");
        assert_eq!(cfg.resolve_save_dir(None).unwrap(), PathBuf::from("/dl"));
        assert_eq!(
            cfg.resolve_save_dir(Some(Path::new("/custom"))).unwrap(),
            PathBuf::from("/custom")
        );
    }

    #[test]
    fn save_dir_missing_is_config_error() {
        let cfg = AppConfig {
            tools: ToolPaths::new("a", "b"),
            download_dir: None,
        };
        assert!(matches!(cfg.resolve_save_dir(None), Err(Error::Configuration(_))));
    }
}
