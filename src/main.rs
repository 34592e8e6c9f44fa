//! Desktop front-end for the external media downloader

// egui window and its state
mod app;
// Thumbnail fetching for the metadata card
mod thumbnail;

use std::sync::Arc;

use eframe::egui::{self, Visuals};
use tokio::runtime::Runtime;
use tracing::info;

use ytdesk::config::AppConfig;
use ytdesk::logging;
use ytdesk::session::SessionController;
use ytdesk::sink::ChannelSink;

use app::DownloaderApp;

/// Program entry point: initializes logging and the runtime, then launches the GUI
fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let config = AppConfig::load();
    info!(
        downloader = %config.tools.downloader.display(),
        merger = %config.tools.merger.display(),
        "Starting"
    );

    // Runtime for child processes, stream relays and blocking thumbnail fetches
    let rt = Runtime::new()?;
    let handle = rt.handle().clone();

    let (sink, events) = ChannelSink::new();
    let controller = Arc::new(SessionController::new(config, Arc::new(sink)));

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1000.0, 850.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Media Downloader",
        options,
        Box::new(move |cc| {
            cc.egui_ctx.set_visuals(Visuals::dark());
            Box::new(DownloaderApp::new(handle, controller, events))
        }),
    )?;

    Ok(())
}
