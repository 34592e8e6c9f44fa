//! Data model shared by the launcher, the controller and the presentation layer.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Opaque identifier of one external-process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What a session was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    MetadataFetch,
    Download,
}

/// Lifecycle of a session.
///
/// `Created -> Running -> {Completed, Failed, Canceled}`; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Created, Running) => true,
            // A process may be killed or die before it is ever observed running.
            (Created, Failed | Canceled) => true,
            (Running, Completed | Failed | Canceled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested output format: audio-only, or video capped at a maximum height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    Audio,
    MaxHeight(u32),
}

impl FormatTag {
    /// File extension appended to the sanitized output name.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Audio => "mp3",
            Self::MaxHeight(_) => "mp4",
        }
    }
}

impl FromStr for FormatTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("audio") {
            return Ok(Self::Audio);
        }
        s.trim_end_matches('p')
            .parse::<u32>()
            .ok()
            .filter(|h| *h > 0)
            .map(Self::MaxHeight)
            .ok_or_else(|| Error::config(format!("unknown format tag: {s}")))
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::MaxHeight(h) => write!(f, "{h}"),
        }
    }
}

impl Serialize for FormatTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FormatTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Height(u32),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Height(h) => Ok(Self::MaxHeight(h)),
        }
    }
}

/// Parameters of a download start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub url: String,
    pub format_tag: FormatTag,
    /// Base name before sanitization and extension.
    pub output_filename: String,
    /// Overrides the platform downloads directory.
    #[serde(default)]
    pub save_path: Option<PathBuf>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, format_tag: FormatTag, output_filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format_tag,
            output_filename: output_filename.into(),
            save_path: None,
        }
    }

    pub fn with_save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_path = Some(path.into());
        self
    }
}

/// Single-item metadata as reported by the downloader's JSON mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataResult {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(rename = "duration", default, deserialize_with = "de_seconds")]
    pub duration_seconds: Option<u64>,
    #[serde(rename = "thumbnail", default)]
    pub thumbnail_url: Option<String>,
    /// Raw `YYYYMMDD`.
    #[serde(default)]
    pub upload_date: Option<String>,
}

impl MetadataResult {
    /// `YYYYMMDD` rendered as `YYYY-MM-DD`; anything else is returned as-is.
    pub fn formatted_upload_date(&self) -> Option<String> {
        let raw = self.upload_date.as_deref()?;
        if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
            Some(format!("{}-{}-{}", &raw[0..4], &raw[4..6], &raw[6..8]))
        } else {
            Some(raw.to_string())
        }
    }

    pub fn formatted_duration(&self) -> Option<String> {
        self.duration_seconds
            .filter(|d| *d > 0)
            .map(|d| format!("Duration: {}m {}s", d / 60, d % 60))
    }
}

fn de_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u64>, D::Error> {
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw.filter(|v| v.is_finite() && *v >= 0.0).map(|v| v.round() as u64))
}

/// Coarse progress classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Downloading,
    Finalizing,
    RawErrorLine,
}

/// One parsed stream event for a running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub session_id: SessionId,
    pub phase: Phase,
    /// Only present for [`Phase::Downloading`]; rounded at presentation.
    pub percent: Option<f64>,
    /// Prefixed error text for [`Phase::RawErrorLine`].
    pub text: Option<String>,
}

/// The single terminal event of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationResult {
    pub session_id: SessionId,
    pub state: SessionState,
    pub success: bool,
    /// `None` when the process was killed by a signal or canceled.
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

/// Response of a download start, `{success, id}` or `{success, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<SessionId>> for StartResponse {
    fn from(result: Result<SessionId>) -> Self {
        match result {
            Ok(id) => Self {
                success: true,
                id: Some(id),
                error: None,
            },
            Err(e) => Self {
                success: false,
                id: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Response of a cancel request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub canceled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CancelResponse {
    pub fn canceled() -> Self {
        Self {
            canceled: true,
            error: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            canceled: false,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            canceled: false,
            error: Some(error.into()),
        }
    }
}

/// Failure shape of a metadata request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataError {
    pub error: String,
    pub details: String,
}

impl From<&Error> for MetadataError {
    fn from(e: &Error) -> Self {
        Self {
            error: e.category().to_string(),
            details: e.details(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        use SessionState::*;
        assert!(Created.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Canceled));
        assert!(!Running.can_transition_to(Created));
        for terminal in [Completed, Failed, Canceled] {
            assert!(terminal.is_terminal());
            for next in [Created, Running, Completed, Failed, Canceled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn format_tag_parsing() {
        assert_eq!("audio".parse::<FormatTag>().unwrap(), FormatTag::Audio);
        assert_eq!("1080".parse::<FormatTag>().unwrap(), FormatTag::MaxHeight(1080));
        assert_eq!("720p".parse::<FormatTag>().unwrap(), FormatTag::MaxHeight(720));
        assert!("best".parse::<FormatTag>().is_err());
        assert!("0".parse::<FormatTag>().is_err());
        assert_eq!(FormatTag::Audio.extension(), "mp3");
        assert_eq!(FormatTag::MaxHeight(480).extension(), "mp4");
    }

    #[test]
    fn download_request_from_json() {
        let req: DownloadRequest = serde_json::from_str(
            r#"{"url":"https://x/y","formatTag":"1080","outputFilename":"clip","savePath":null}"#,
        )
        .unwrap();
        assert_eq!(req.format_tag, FormatTag::MaxHeight(1080));
        assert!(req.save_path.is_none());

        let req: DownloadRequest =
            serde_json::from_str(r#"{"url":"u","formatTag":720,"outputFilename":"c"}"#).unwrap();
        assert_eq!(req.format_tag, FormatTag::MaxHeight(720));
    }

    #[test]
    fn metadata_deserializes_ytdlp_fields() {
        let meta: MetadataResult = serde_json::from_str(
            r#"{"title":"T","uploader":"U","duration":65.4,"thumbnail":"https://i/t.jpg","upload_date":"20240131","formats":[]}"#,
        )
        .unwrap();
        assert_eq!(meta.title.as_deref(), Some("T"));
        assert_eq!(meta.duration_seconds, Some(65));
        assert_eq!(meta.thumbnail_url.as_deref(), Some("https://i/t.jpg"));
        assert_eq!(meta.formatted_upload_date().as_deref(), Some("2024-01-31"));
        assert_eq!(meta.formatted_duration().as_deref(), Some("Duration: 1m 5s"));
    }

    #[test]
    fn metadata_tolerates_missing_fields() {
        let meta: MetadataResult = serde_json::from_str(r#"{"title":"T","duration":null}"#).unwrap();
        assert_eq!(meta.duration_seconds, None);
        assert_eq!(meta.formatted_duration(), None);
        assert_eq!(meta.formatted_upload_date(), None);
    }

    #[test]
    fn start_response_shapes() {
        let ok = StartResponse::from(Ok(SessionId::from("17")));
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"success":true,"id":"17"}"#
        );
        let err = StartResponse::from(Err(Error::config("nope")));
        assert!(!err.success);
        assert!(err.error.unwrap().contains("nope"));
    }

    #[test]
    fn termination_serializes_camel_case() {
        let t = TerminationResult {
            session_id: "1".into(),
            state: SessionState::Completed,
            success: true,
            exit_code: Some(0),
            error_text: None,
        };
        assert_eq!(
            serde_json::to_string(&t).unwrap(),
            r#"{"sessionId":"1","state":"completed","success":true,"exitCode":0}"#
        );
    }
}
