//! egui front-end: metadata card, format choice, and the downloads list.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eframe::{App, Frame, egui};
use egui::{Color32, ColorImage, TextureOptions};
use parking_lot::Mutex;
use rfd::FileDialog;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{error, warn};

use ytdesk::downloader::{output_filename, pick_base_name};
use ytdesk::model::{
    DownloadRequest, FormatTag, MetadataError, MetadataResult, Phase, SessionId, SessionState,
    StartResponse,
};
use ytdesk::progress::percent_label;
use ytdesk::session::SessionController;
use ytdesk::sink::SessionEvent;

use crate::thumbnail;

/// Where one entry of the downloads list stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowStatus {
    Downloading,
    Finalizing,
    Completed,
    Canceled,
    Stopped,
    StartFailed,
}

impl RowStatus {
    fn is_finished(&self) -> bool {
        !matches!(self, Self::Downloading | Self::Finalizing)
    }
}

/// One entry in the downloads list.
struct DownloadRow {
    session: Option<SessionId>,
    title: String,
    status: RowStatus,
    /// 0-100
    percent: f64,
    details: String,
    last_error: Option<String>,
}

type FetchOutcome = (String, Result<MetadataResult, MetadataError>);

pub struct DownloaderApp {
    runtime: Handle,
    controller: Arc<SessionController>,
    events: UnboundedReceiver<SessionEvent>,
    /// Tools that were not found at startup; the UI is blocked while non-empty.
    missing: Vec<(&'static str, PathBuf)>,

    url_input: String,
    filename_input: String,
    selected_format: FormatTag,
    custom_folder: Option<PathBuf>,

    fetch_status: String,
    metadata: Option<MetadataResult>,
    fetch_tx: UnboundedSender<FetchOutcome>,
    fetch_rx: UnboundedReceiver<FetchOutcome>,

    thumbnail: Option<egui::TextureHandle>,
    /// Decoded thumbnail waiting to be uploaded, keyed by its URL.
    pending_thumbnail: Arc<Mutex<Option<(String, ColorImage)>>>,

    downloads: Vec<DownloadRow>,
}

const FORMAT_OPTIONS: [(FormatTag, &str); 5] = [
    (FormatTag::Audio, "Audio (mp3)"),
    (FormatTag::MaxHeight(1080), "1080p"),
    (FormatTag::MaxHeight(720), "720p"),
    (FormatTag::MaxHeight(480), "480p"),
    (FormatTag::MaxHeight(360), "360p"),
];

impl DownloaderApp {
    pub fn new(
        runtime: Handle,
        controller: Arc<SessionController>,
        events: UnboundedReceiver<SessionEvent>,
    ) -> Self {
        let missing = controller.config().tools.missing_components();
        for (name, path) in &missing {
            error!("{} was not found at: {}", name, path.display());
        }
        let (fetch_tx, fetch_rx) = unbounded_channel();

        Self {
            runtime,
            controller,
            events,
            missing,
            url_input: String::new(),
            filename_input: String::new(),
            selected_format: FormatTag::MaxHeight(1080),
            custom_folder: None,
            fetch_status: String::new(),
            metadata: None,
            fetch_tx,
            fetch_rx,
            thumbnail: None,
            pending_thumbnail: Arc::new(Mutex::new(None)),
            downloads: Vec::new(),
        }
    }

    fn poll_fetches(&mut self, ctx: &egui::Context) {
        while let Ok((url, outcome)) = self.fetch_rx.try_recv() {
            // A newer fetch or a reset superseded this one.
            if url != self.url_input.trim() {
                continue;
            }
            match outcome {
                Ok(meta) => {
                    self.fetch_status.clear();
                    self.thumbnail = None;
                    if let Some(thumb_url) = meta.thumbnail_url.clone() {
                        self.load_thumbnail(ctx, thumb_url);
                    }
                    self.metadata = Some(meta);
                }
                Err(e) => {
                    error!("Metadata fetch failed: {}: {}", e.error, e.details);
                    self.fetch_status = "Error fetching video".to_string();
                }
            }
        }

        let ready = self.pending_thumbnail.lock().take();
        if let Some((url, img)) = ready {
            let current = self.metadata.as_ref().and_then(|m| m.thumbnail_url.as_deref());
            if current == Some(url.as_str()) {
                self.thumbnail = Some(ctx.load_texture(url, img, TextureOptions::default()));
            }
        }
    }

    fn poll_sessions(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SessionEvent::Progress(ev) => {
                    let Some(row) = self.row_mut(&ev.session_id) else {
                        continue;
                    };
                    match ev.phase {
                        Phase::Finalizing => {
                            row.status = RowStatus::Finalizing;
                            row.details = "Finalizing...".to_string();
                        }
                        Phase::Downloading => {
                            row.status = RowStatus::Downloading;
                            row.percent = ev.percent.unwrap_or(row.percent);
                            row.details = "Downloading...".to_string();
                        }
                        Phase::RawErrorLine => row.last_error = ev.text,
                    }
                }
                SessionEvent::Terminal(result) => {
                    let Some(row) = self.row_mut(&result.session_id) else {
                        continue;
                    };
                    match result.state {
                        SessionState::Completed => {
                            row.status = RowStatus::Completed;
                            row.percent = 100.0;
                            row.details = "Completed".to_string();
                        }
                        SessionState::Canceled => {
                            row.status = RowStatus::Canceled;
                            row.details = "Canceled".to_string();
                        }
                        _ => {
                            row.status = RowStatus::Stopped;
                            row.details = "Stopped (sudden stop)".to_string();
                            if let Some(text) = result.error_text {
                                row.last_error = Some(text);
                            }
                        }
                    }
                }
            }
        }
    }

    fn row_mut(&mut self, id: &SessionId) -> Option<&mut DownloadRow> {
        self.downloads
            .iter_mut()
            .find(|r| r.session.as_ref() == Some(id))
    }

    fn load_thumbnail(&self, ctx: &egui::Context, url: String) {
        let slot = Arc::clone(&self.pending_thumbnail);
        let ctx = ctx.clone();
        self.runtime.spawn_blocking(move || {
            if let Some(img) = thumbnail::fetch_thumbnail(&url) {
                *slot.lock() = Some((url, img));
                ctx.request_repaint();
            }
        });
    }

    fn start_fetch(&mut self, ctx: &egui::Context) {
        let url = self.url_input.trim().to_string();
        if url.is_empty() {
            return;
        }
        self.fetch_status = "Searching...".to_string();

        let controller = Arc::clone(&self.controller);
        let tx = self.fetch_tx.clone();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            let outcome = controller
                .fetch_metadata(&url)
                .await
                .map_err(|e| MetadataError::from(&e));
            let _ = tx.send((url, outcome));
            ctx.request_repaint();
        });
    }

    fn start_download(&mut self) {
        let url = self.url_input.trim().to_string();
        if url.is_empty() {
            return;
        }
        let title = self.metadata.as_ref().and_then(|m| m.title.as_deref());
        let base = pick_base_name(&self.filename_input, title);

        let mut req = DownloadRequest::new(url, self.selected_format, base);
        if let Some(folder) = &self.custom_folder {
            req = req.with_save_path(folder);
        }

        // Spawning is quick; the supervision task needs the runtime context.
        let response = {
            let _guard = self.runtime.enter();
            StartResponse::from(self.controller.start_download(&req))
        };

        let mut row = DownloadRow {
            session: None,
            title: output_filename(&req.output_filename, req.format_tag),
            status: RowStatus::Downloading,
            percent: 0.0,
            details: "Starting...".to_string(),
            last_error: None,
        };
        match response {
            StartResponse { success: true, id: Some(id), .. } => row.session = Some(id),
            StartResponse { error, .. } => {
                warn!("Download failed to start: {:?}", error);
                row.status = RowStatus::StartFailed;
                row.details = "Failed to start".to_string();
                row.last_error = error;
            }
        }
        self.downloads.insert(0, row);
    }

    fn cancel(&self, id: SessionId) {
        let controller = Arc::clone(&self.controller);
        self.runtime.spawn(async move {
            let resp = controller.cancel(&id).await;
            if let Some(e) = resp.error {
                warn!("Cancel of {} failed: {}", id, e);
            }
        });
    }

    fn reset_form(&mut self) {
        self.url_input.clear();
        self.filename_input.clear();
        self.metadata = None;
        self.thumbnail = None;
        self.fetch_status.clear();
    }

    fn paste_url(&mut self) {
        match arboard::Clipboard::new().and_then(|mut cb| cb.get_text()) {
            Ok(text) => self.url_input = text.trim().to_string(),
            Err(e) => warn!("Paste failed: {}", e),
        }
    }

    fn pick_folder(&mut self) {
        let mut dialog = FileDialog::new();
        if let Some(dir) = self
            .custom_folder
            .clone()
            .or_else(|| self.controller.config().download_dir.clone())
        {
            dialog = dialog.set_directory(&dir);
        }
        if let Some(folder) = dialog.pick_folder() {
            self.custom_folder = Some(folder);
        }
    }

    fn missing_components_ui(&self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Missing Component");
            ui.separator();
            for (name, path) in &self.missing {
                ui.colored_label(
                    Color32::LIGHT_RED,
                    format!("{} was not found at: {}", name, path.display()),
                );
            }
            ui.label("Place the tools at these paths (or set YTDLP_PATH / FFMPEG_PATH) and restart.");
        });
    }

    fn downloads_ui(&mut self, ui: &mut egui::Ui) {
        let mut to_remove = vec![];
        let mut to_cancel = vec![];

        for (idx, row) in self.downloads.iter().enumerate() {
            ui.group(|ui| {
                ui.horizontal(|ui| {
                    ui.strong(&row.title);
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if row.status.is_finished() {
                            if ui.button("🗑").on_hover_text("Remove").clicked() {
                                to_remove.push(idx);
                            }
                        } else if ui
                            .add(egui::Button::new("⏹").fill(Color32::DARK_RED))
                            .on_hover_text("Stop")
                            .clicked()
                        {
                            if let Some(id) = &row.session {
                                to_cancel.push(id.clone());
                            }
                        }
                    });
                });

                let fill = match row.status {
                    RowStatus::Completed => Color32::from_rgb(60, 140, 90),
                    RowStatus::Finalizing => Color32::from_rgb(150, 120, 200),
                    RowStatus::Stopped | RowStatus::StartFailed => Color32::from_rgb(180, 60, 60),
                    RowStatus::Canceled => Color32::GRAY,
                    RowStatus::Downloading => Color32::from_rgb(70, 110, 190),
                };
                ui.add(
                    egui::ProgressBar::new((row.percent / 100.0) as f32)
                        .fill(fill)
                        .text(percent_label(row.percent)),
                );

                match row.status {
                    RowStatus::Stopped | RowStatus::StartFailed => {
                        ui.colored_label(Color32::LIGHT_RED, &row.details);
                    }
                    _ => {
                        ui.label(&row.details);
                    }
                }
                if let Some(err) = &row.last_error {
                    ui.small(err.trim_end());
                }
            });
        }

        for id in to_cancel {
            self.cancel(id);
        }
        for idx in to_remove.into_iter().rev() {
            self.downloads.remove(idx);
        }
    }

    fn metadata_ui(&self, ui: &mut egui::Ui) {
        let Some(meta) = &self.metadata else {
            return;
        };
        ui.group(|ui| {
            ui.horizontal(|ui| {
                if let Some(tex) = &self.thumbnail {
                    ui.add(egui::Image::new(tex).max_width(200.0));
                }
                ui.vertical(|ui| {
                    ui.heading(meta.title.as_deref().unwrap_or("Unknown Video"));
                    if let Some(uploader) = &meta.uploader {
                        ui.label(uploader);
                    }
                    if let Some(duration) = meta.formatted_duration() {
                        ui.label(duration);
                    }
                    if let Some(date) = meta.formatted_upload_date() {
                        ui.label(date);
                    }
                });
            });
        });
    }
}

impl App for DownloaderApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        if !self.missing.is_empty() {
            self.missing_components_ui(ctx);
            return;
        }

        self.poll_fetches(ctx);
        self.poll_sessions();

        egui::SidePanel::right("downloads_panel")
            .min_width(320.0)
            .show(ctx, |ui| {
                ui.heading("Downloads");
                ui.separator();
                egui::ScrollArea::vertical()
                    .auto_shrink([false; 2])
                    .show(ui, |ui| self.downloads_ui(ui));
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Media Downloader");

            ui.label("Video URL:");
            ui.horizontal(|ui| {
                ui.text_edit_singleline(&mut self.url_input);
                if ui.button("Paste").clicked() {
                    self.paste_url();
                }
                if ui.button("Fetch").clicked() {
                    self.start_fetch(ctx);
                }
                if ui.button("New download").clicked() {
                    self.reset_form();
                }
            });
            if !self.fetch_status.is_empty() {
                ui.label(&self.fetch_status);
            }

            self.metadata_ui(ui);
            ui.separator();

            ui.label("Format:");
            ui.horizontal(|ui| {
                for (tag, label) in FORMAT_OPTIONS {
                    ui.radio_value(&mut self.selected_format, tag, label);
                }
            });

            ui.horizontal(|ui| {
                ui.label("File name:");
                ui.text_edit_singleline(&mut self.filename_input);
            });

            ui.horizontal(|ui| {
                ui.label("Save to:");
                let label = match &self.custom_folder {
                    Some(dir) => folder_label(dir),
                    None => "Downloads folder".to_string(),
                };
                ui.label(label);
                if ui.button("Browse…").clicked() {
                    self.pick_folder();
                }
            });

            if ui.button("Download").clicked() {
                self.start_download();
            }
        });

        ctx.request_repaint_after(Duration::from_millis(100));
    }
}

/// Short label for a chosen folder: the last two components when the path is deeper.
fn folder_label(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.len() > 2 {
        format!(".../{}", parts[parts.len() - 2..].join("/"))
    } else {
        path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_label_shortens_deep_paths() {
        assert_eq!(folder_label(Path::new("/home/user/Videos/yt")), ".../Videos/yt");
        assert_eq!(folder_label(Path::new("/media/usb")), "/media/usb");
    }

    #[test]
    fn finished_statuses() {
        assert!(!RowStatus::Downloading.is_finished());
        assert!(!RowStatus::Finalizing.is_finished());
        assert!(RowStatus::Stopped.is_finished());
        assert!(RowStatus::StartFailed.is_finished());
    }
}
