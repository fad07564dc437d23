mod api;
mod app;
mod config;
mod grid;
mod model;
mod navigator;
mod refresh;
mod register;
mod session;
mod tracking;
mod viewer;

use app::SnapviewApp;
use config::AppConfig;

fn main() -> eframe::Result {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load();
    let width = config.window_width.unwrap_or(1100.0);
    let height = config.window_height.unwrap_or(760.0);

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Snapview")
            .with_app_id("snapview")
            .with_inner_size([width, height]),
        ..Default::default()
    };

    eframe::run_native(
        "snapview",
        native_options,
        Box::new(|cc| Ok(Box::new(SnapviewApp::new(cc, config)))),
    )
}
