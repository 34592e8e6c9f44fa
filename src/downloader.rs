//! Argument vectors and process spawning for the external downloader.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::model::{DownloadRequest, FormatTag};

static FORBIDDEN_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/:"*?<>|]+"#).unwrap_or_else(|_| unreachable!()));

/// Strip `\ / : " * ? < > |` from a user- or metadata-derived name.
pub fn sanitize_filename(name: &str) -> String {
    FORBIDDEN_CHARS.replace_all(name, "").into_owned()
}

/// Base name for a download: what the user typed, else the fetched title, else `download`.
pub fn pick_base_name(user_input: &str, title: Option<&str>) -> String {
    let typed = user_input.trim();
    if !typed.is_empty() {
        return typed.to_string();
    }
    title
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "download".to_string())
}

/// Sanitized name with the extension matching `format`.
pub fn output_filename(base: &str, format: FormatTag) -> String {
    format!("{}.{}", sanitize_filename(base), format.extension())
}

/// Single-item JSON metadata for `url`.
pub fn metadata_args(url: &str) -> Vec<OsString> {
    ["-j", "--no-playlist", url].iter().map(OsString::from).collect()
}

/// Full argument vector of a download, in the order the downloader expects.
pub fn download_args(format: FormatTag, merger: &Path, output: &Path, url: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = match format {
        FormatTag::Audio => ["-f", "bestaudio", "--extract-audio", "--audio-format", "mp3"]
            .iter()
            .map(OsString::from)
            .collect(),
        FormatTag::MaxHeight(h) => vec![
            "-f".into(),
            format!("bestvideo[height<={h}]+bestaudio/best").into(),
            "--merge-output-format".into(),
            "mp4".into(),
        ],
    };

    // Always point at the bundled merger rather than whatever is on PATH.
    args.push("--ffmpeg-location".into());
    args.push(merger.as_os_str().to_owned());
    args.push("--newline".into());
    args.push("--no-playlist".into());
    args.push("-o".into());
    args.push(output.as_os_str().to_owned());
    args.push(url.into());
    args
}

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Keep child processes from opening a console window on Windows.
pub trait NoWindowExt {
    fn no_window(&mut self) -> &mut Self;
}

impl NoWindowExt for Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            self.creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

/// Spawn `program` detached from any terminal, with both output pipes captured.
///
/// On unix the child leads its own process group so the whole tree can be
/// killed at once.
pub fn spawn_tool(program: &Path, args: &[OsString]) -> Result<Child> {
    debug!(program = %program.display(), ?args, "Spawning tool");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .no_window();
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn()
        .map_err(|e| Error::spawn(program_name(program), e))
}

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .unwrap_or_else(|| OsStr::new("tool"))
        .to_string_lossy()
        .into_owned()
}

/// Builds and spawns downloader invocations against a fixed configuration.
#[derive(Debug, Clone)]
pub struct Launcher {
    config: AppConfig,
}

impl Launcher {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Absolute output path: save directory joined with the sanitized file name.
    pub fn resolve_output_path(&self, req: &DownloadRequest) -> Result<PathBuf> {
        let dir = self.config.resolve_save_dir(req.save_path.as_deref())?;
        let dir = if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir()?.join(dir)
        };
        Ok(dir.join(output_filename(&req.output_filename, req.format_tag)))
    }

    pub fn spawn_metadata(&self, url: &str) -> Result<Child> {
        self.config.tools.ensure_downloader()?;
        spawn_tool(&self.config.tools.downloader, &metadata_args(url))
    }

    /// Spawn a download; returns the child and the path it writes to.
    pub fn spawn_download(&self, req: &DownloadRequest) -> Result<(Child, PathBuf)> {
        self.config.tools.ensure_all()?;
        let output = self.resolve_output_path(req)?;
        let args = download_args(req.format_tag, &self.config.tools.merger, &output, &req.url);
        let child = spawn_tool(&self.config.tools.downloader, &args)?;
        Ok((child, output))
    }
}
