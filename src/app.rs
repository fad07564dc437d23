use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use tracing::info;

use crate::api::{ApiClient, StatusError};
use crate::config::AppConfig;
use crate::grid::PhotoGrid;
use crate::model::{filtered, GalleryFilter, GalleryPhoto, GalleryResponse, Interaction};
use crate::refresh::{PullState, PullToRefresh, MAX_PULL_DISTANCE, MIN_REFRESH_SPIN};
use crate::register::{Registration, RegistrationOutcome};
use crate::session::SessionManager;
use crate::tracking::Tracker;
use crate::viewer::{Viewer, ViewerEvent};

const STATUS_DURATION: Duration = Duration::from_secs(3);

enum Screen {
    Landing,
    Register,
    Gallery,
}

struct GalleryState {
    code: String,
    response: GalleryResponse,
    filter: GalleryFilter,
    open_tracked: bool,
}

enum AppMsg {
    GalleryLoaded {
        code: String,
        filter: GalleryFilter,
        result: Result<GalleryResponse, String>,
    },
    Downloaded {
        filename: String,
        result: Result<PathBuf, String>,
    },
}

pub struct SnapviewApp {
    config: AppConfig,
    api: Arc<ApiClient>,
    tracker: Tracker,
    screen: Screen,
    code_input: String,
    landing_error: Option<String>,
    gallery: Option<GalleryState>,
    gallery_error: Option<String>,
    grid: PhotoGrid,
    pull: PullToRefresh,
    last_scroll: f32,
    viewer: Option<Viewer>,
    registration: Option<Registration>,
    loading: bool,
    status: Option<(String, Instant)>,
    tx: mpsc::Sender<AppMsg>,
    rx: mpsc::Receiver<AppMsg>,
}

impl SnapviewApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, config: AppConfig) -> Self {
        let api = Arc::new(ApiClient::new(config.api_base()));
        let tracker = Tracker::new(api.clone(), SessionManager::new());
        let (tx, rx) = mpsc::channel();
        let code_input = config.access_code.clone().unwrap_or_default();
        Self {
            config,
            grid: PhotoGrid::new(api.clone()),
            api,
            tracker,
            screen: Screen::Landing,
            code_input,
            landing_error: None,
            gallery: None,
            gallery_error: None,
            pull: PullToRefresh::new(),
            last_scroll: 0.0,
            viewer: None,
            registration: None,
            loading: false,
            status: None,
            tx,
            rx,
        }
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = Some((message.into(), Instant::now()));
    }

    fn open_gallery(&mut self, ctx: &egui::Context) {
        let code = self.code_input.trim().to_string();
        if code.is_empty() {
            self.landing_error = Some("Enter your access code".to_string());
            return;
        }
        self.landing_error = None;
        self.gallery_error = None;
        self.gallery = None;
        let session_id = self.tracker.initialize(&code);
        info!(%code, %session_id, "opening gallery");
        self.screen = Screen::Gallery;
        self.start_fetch(code, GalleryFilter::All, false, ctx);
    }

    fn start_fetch(
        &mut self,
        code: String,
        filter: GalleryFilter,
        min_delay: bool,
        ctx: &egui::Context,
    ) {
        if self.loading {
            return;
        }
        self.loading = true;
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        let ctx2 = ctx.clone();
        std::thread::spawn(move || {
            let started = Instant::now();
            let result = api
                .fetch_gallery(&code, filter)
                .map_err(|e| friendly_gallery_error(&e));
            // A refresh that resolves instantly reads as a glitch; hold the
            // spinner briefly.
            if min_delay {
                let elapsed = started.elapsed();
                if elapsed < MIN_REFRESH_SPIN {
                    std::thread::sleep(MIN_REFRESH_SPIN - elapsed);
                }
            }
            let _ = tx.send(AppMsg::GalleryLoaded {
                code,
                filter,
                result,
            });
            ctx2.request_repaint();
        });
    }

    fn set_filter(&mut self, filter: GalleryFilter, ctx: &egui::Context) {
        let Some(gallery) = &mut self.gallery else {
            return;
        };
        if gallery.filter == filter || self.loading {
            return;
        }
        let previous = gallery.filter;
        gallery.filter = filter;
        let code = gallery.code.clone();
        let total = gallery.response.photos.len();

        let mut context = serde_json::Map::new();
        context.insert("filter".into(), filter.query_value().into());
        context.insert("previousFilter".into(), previous.query_value().into());
        context.insert("totalPhotos".into(), total.into());
        self.tracker.track(Interaction::GallerySearch, None, Some(context));

        self.start_fetch(code, filter, false, ctx);
    }

    fn drain(&mut self, ctx: &egui::Context) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                AppMsg::GalleryLoaded {
                    code,
                    filter,
                    result,
                } => {
                    self.loading = false;
                    self.pull.finish_refresh();
                    match result {
                        Ok(response) => {
                            self.gallery_error = None;
                            let open_tracked = self
                                .gallery
                                .as_ref()
                                .is_some_and(|g| g.code == code && g.open_tracked);
                            let mut state = GalleryState {
                                code,
                                response,
                                filter,
                                open_tracked,
                            };
                            if !state.open_tracked && filter == GalleryFilter::All {
                                let mut context = serde_json::Map::new();
                                context.insert(
                                    "totalPhotos".into(),
                                    state.response.photos.len().into(),
                                );
                                context.insert(
                                    "userName".into(),
                                    state.response.user.name.clone().into(),
                                );
                                context.insert(
                                    "retentionDays".into(),
                                    state.response.retention_days.into(),
                                );
                                self.tracker.track(
                                    Interaction::GalleryOpen,
                                    None,
                                    Some(context),
                                );
                                state.open_tracked = true;
                            }
                            self.grid.prune(&state.response.photos);
                            self.gallery = Some(state);
                            self.config.access_code = self.gallery.as_ref().map(|g| g.code.clone());
                        }
                        Err(message) => {
                            if self.gallery.is_some() {
                                // Keep showing the stale photos; surface the
                                // failure as a status line.
                                self.set_status(message);
                            } else {
                                self.gallery_error = Some(message);
                            }
                        }
                    }
                }
                AppMsg::Downloaded { filename, result } => match result {
                    Ok(path) => self.set_status(format!("Saved {} to {}", filename, path.display())),
                    Err(message) => self.set_status(message),
                },
            }
        }
        let _ = ctx;
    }

    fn handle_viewer_events(&mut self, events: Vec<ViewerEvent>, ctx: &egui::Context) {
        for event in events {
            match event {
                ViewerEvent::Closed => {
                    self.viewer = None;
                    self.pull.set_enabled(true);
                }
                ViewerEvent::ViewSettled(photo_id) => {
                    if self.tracker.should_track_view(&photo_id) {
                        self.tracker
                            .track(Interaction::PhotoView, Some(photo_id), None);
                    }
                }
                ViewerEvent::ShareRequested(photo) => {
                    ctx.copy_text(photo.download_url.clone());
                    self.tracker
                        .track(Interaction::PhotoShare, Some(photo.id), None);
                    self.set_status("Photo link copied");
                }
                ViewerEvent::DownloadRequested(photo) => self.start_download(photo, ctx),
                ViewerEvent::FavoriteToggled { photo_id, favorite } => {
                    if let Some(gallery) = &mut self.gallery {
                        if let Some(photo) = gallery
                            .response
                            .photos
                            .iter_mut()
                            .find(|p| p.id == photo_id)
                        {
                            photo.is_favorite = favorite;
                        }
                    }
                    self.set_status(if favorite {
                        "Added to favorites"
                    } else {
                        "Removed from favorites"
                    });
                }
                ViewerEvent::Deleted(photo_id) => {
                    if let Some(gallery) = &mut self.gallery {
                        gallery.response.photos.retain(|p| p.id != photo_id);
                        self.grid.prune(&gallery.response.photos);
                    }
                    self.set_status("Photo deleted");
                }
                ViewerEvent::DeleteFailed(message) => self.set_status(message),
            }
        }
    }

    fn start_download(&mut self, photo: GalleryPhoto, ctx: &egui::Context) {
        self.tracker
            .track(Interaction::PhotoDownload, Some(photo.id.clone()), None);
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        let ctx2 = ctx.clone();
        std::thread::spawn(move || {
            let filename = photo.original_filename.clone();
            let result = download_photo(&api, &photo).map_err(|e| e.to_string());
            let _ = tx.send(AppMsg::Downloaded { filename, result });
            ctx2.request_repaint();
        });
    }

    fn handle_pull_gesture(&mut self, ctx: &egui::Context) {
        if self.viewer.is_some() {
            return;
        }
        let (pressed, down, released, pos) = ctx.input(|i| {
            (
                i.pointer.any_pressed(),
                i.pointer.any_down(),
                i.pointer.any_released(),
                i.pointer.interact_pos(),
            )
        });
        if pressed {
            if let Some(p) = pos {
                self.pull.touch_start(self.last_scroll, p.y);
            }
        } else if down {
            if let Some(p) = pos {
                self.pull.touch_move(self.last_scroll, p.y);
            }
        } else if released && self.pull.touch_end() {
            if let Some(gallery) = &self.gallery {
                let code = gallery.code.clone();
                let filter = gallery.filter;
                self.start_fetch(code, filter, true, ctx);
            } else {
                self.pull.finish_refresh();
            }
        }
    }

    fn show_landing(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(ui.available_height() * 0.25);
                ui.heading("Snapview");
                ui.label("Your event photos, one code away.");
                ui.add_space(20.0);
                ui.set_max_width(280.0);
                let edit = ui.add(
                    egui::TextEdit::singleline(&mut self.code_input)
                        .hint_text("Access code")
                        .desired_width(f32::INFINITY),
                );
                let submitted =
                    edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                ui.add_space(8.0);
                let mut open = false;
                ui.horizontal(|ui| {
                    if ui.button("Open gallery").clicked() || submitted {
                        open = true;
                    }
                    if ui.button("Register").clicked() {
                        self.registration = Some(Registration::new(self.api.clone()));
                        self.screen = Screen::Register;
                    }
                });
                if open {
                    self.open_gallery(ctx);
                }
                if let Some(error) = &self.landing_error {
                    ui.add_space(8.0);
                    ui.colored_label(egui::Color32::LIGHT_RED, error);
                }
            });
        });
    }

    fn show_register(&mut self, ctx: &egui::Context) {
        let mut outcome = None;
        if let Some(registration) = &mut self.registration {
            egui::CentralPanel::default().show(ctx, |ui| {
                outcome = registration.show(ui, ctx);
            });
        }
        match outcome {
            Some(RegistrationOutcome::Completed) => {
                if let Some(registration) = self.registration.take() {
                    self.config.display_name = Some(registration.form.name.trim().to_string());
                    self.config.save();
                }
                self.set_status("Registration complete");
                self.screen = Screen::Landing;
            }
            Some(RegistrationOutcome::Cancelled) => {
                self.registration = None;
                self.screen = Screen::Landing;
            }
            None => {}
        }
    }

    fn show_gallery(&mut self, ctx: &egui::Context) {
        self.handle_pull_gesture(ctx);

        let mut selected_filter = None;
        let mut share_gallery = false;
        egui::TopBottomPanel::top("gallery_header").show(ctx, |ui| {
            ui.add_space(4.0);
            ui.horizontal(|ui| {
                if ui.button("←").on_hover_text("Back").clicked() {
                    self.screen = Screen::Landing;
                    self.gallery = None;
                    self.gallery_error = None;
                }
                if let Some(gallery) = &self.gallery {
                    let title = gallery
                        .response
                        .event
                        .as_ref()
                        .map(|e| e.name.clone())
                        .unwrap_or_else(|| format!("{}'s photos", gallery.response.user.name));
                    ui.heading(title);
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui.button("🔗 Share").clicked() {
                            share_gallery = true;
                        }
                        ui.weak(format!(
                            "{} photos · kept {} days",
                            gallery.response.photos.len(),
                            gallery.response.retention_days
                        ));
                    });
                }
            });
            if self.gallery.is_some() {
                ui.add_space(4.0);
                ui.horizontal(|ui| {
                    let current = self.gallery.as_ref().map(|g| g.filter);
                    for filter in GalleryFilter::ALL_FILTERS {
                        if ui
                            .selectable_label(current == Some(filter), filter.label())
                            .clicked()
                        {
                            selected_filter = Some(filter);
                        }
                    }
                    if self.loading {
                        ui.spinner();
                    }
                });
            }
            ui.add_space(4.0);
        });
        if share_gallery {
            if let Some(code) = self.gallery.as_ref().map(|g| g.code.clone()) {
                ctx.copy_text(self.api.gallery_url(&code));
                self.set_status("Gallery link copied");
            }
        }
        if let Some(filter) = selected_filter {
            self.set_filter(filter, ctx);
        }

        let mut clicked_photo = None;
        egui::CentralPanel::default().show(ctx, |ui| {
            self.show_pull_indicator(ui);
            if let Some(error) = self.gallery_error.clone() {
                ui.vertical_centered(|ui| {
                    ui.add_space(ui.available_height() * 0.3);
                    ui.label(&error);
                    ui.add_space(8.0);
                    if ui.button("Try again").clicked() {
                        let code = self.code_input.trim().to_string();
                        self.gallery_error = None;
                        self.start_fetch(code, GalleryFilter::All, false, ctx);
                    }
                });
                return;
            }
            let Some(gallery) = &self.gallery else {
                ui.centered_and_justified(|ui| {
                    ui.spinner();
                });
                return;
            };
            let photos = filtered(&gallery.response.photos, gallery.filter);
            let out = self.grid.show(ui, &photos, ctx);
            self.last_scroll = out.scroll_offset;
            if let Some(i) = out.clicked {
                clicked_photo = Some((photos, i));
            }
        });

        if let Some((photos, index)) = clicked_photo {
            if let Some(gallery) = &self.gallery {
                self.viewer = Some(Viewer::open(
                    self.api.clone(),
                    gallery.code.clone(),
                    photos,
                    index,
                    ctx,
                ));
                self.pull.set_enabled(false);
            }
        }

        let events = match &mut self.viewer {
            Some(viewer) => viewer.show(ctx),
            None => Vec::new(),
        };
        if !events.is_empty() {
            self.handle_viewer_events(events, ctx);
        }
    }

    fn show_pull_indicator(&self, ui: &mut egui::Ui) {
        match self.pull.state() {
            PullState::Refreshing => {
                ui.vertical_centered(|ui| {
                    ui.add_space(8.0);
                    ui.spinner();
                    ui.add_space(8.0);
                });
            }
            PullState::Pulling | PullState::Ready => {
                let frac = (self.pull.distance() / MAX_PULL_DISTANCE).clamp(0.0, 1.0);
                ui.vertical_centered(|ui| {
                    ui.add_space(4.0 + self.pull.distance() * 0.25);
                    let label = if self.pull.state() == PullState::Ready {
                        "Release to refresh"
                    } else {
                        "Pull to refresh"
                    };
                    ui.weak(egui::RichText::new(label).size(12.0 + 4.0 * frac));
                });
            }
            PullState::Idle => {}
        }
    }

    fn show_status(&mut self, ctx: &egui::Context) {
        let Some((message, since)) = &self.status else {
            return;
        };
        if since.elapsed() >= STATUS_DURATION {
            self.status = None;
            return;
        }
        let message = message.clone();
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.add_space(2.0);
            ui.label(message);
            ui.add_space(2.0);
        });
        ctx.request_repaint_after(STATUS_DURATION - since.elapsed());
    }
}

impl eframe::App for SnapviewApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some(rect) = ctx.input(|i| i.viewport().inner_rect) {
            self.config.window_width = Some(rect.width());
            self.config.window_height = Some(rect.height());
        }

        self.drain(ctx);
        self.tracker.tick();

        match self.screen {
            Screen::Landing => self.show_landing(ctx),
            Screen::Register => self.show_register(ctx),
            Screen::Gallery => self.show_gallery(ctx),
        }
        self.show_status(ctx);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        let stats = self.tracker.stats();
        info!(?stats.session_id, stats.events_queued, "shutting down");
        self.tracker.flush_blocking();
        self.config.save();
    }
}

fn friendly_gallery_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<StatusError>() {
        Some(e) if e.status == 403 => {
            "This gallery is private. Double-check your access code.".to_string()
        }
        Some(e) if e.status == 404 => {
            "We couldn't find that gallery. Double-check your access code.".to_string()
        }
        _ => err.to_string(),
    }
}

fn download_photo(api: &ApiClient, photo: &GalleryPhoto) -> anyhow::Result<PathBuf> {
    let dir = dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Snapview");
    std::fs::create_dir_all(&dir)?;
    let bytes = api.fetch_image(&photo.download_url)?;
    let path = unique_path(&dir, &photo.original_filename);
    std::fs::write(&path, bytes)?;
    Ok(path)
}

fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let base = dir.join(filename);
    if !base.exists() {
        return base;
    }
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((s, e)) => (s, e),
        None => (filename, ""),
    };
    for n in 2..10000 {
        let candidate = if ext.is_empty() {
            dir.join(format!("{stem}-{n}"))
        } else {
            dir.join(format!("{stem}-{n}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
    }
    dir.join(format!("{stem}-final.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_and_missing_galleries_get_friendly_messages() {
        let forbidden = anyhow::Error::new(StatusError {
            status: 403,
            message: "Forbidden".to_string(),
        });
        assert!(friendly_gallery_error(&forbidden).contains("private"));

        let missing = anyhow::Error::new(StatusError {
            status: 404,
            message: "Not found".to_string(),
        });
        assert!(friendly_gallery_error(&missing).contains("couldn't find"));

        let other = anyhow::Error::new(StatusError {
            status: 500,
            message: "Failed to fetch gallery: 500".to_string(),
        });
        assert_eq!(friendly_gallery_error(&other), "Failed to fetch gallery: 500");
    }

    #[test]
    fn unique_path_appends_a_counter_before_the_extension() {
        let dir = std::env::temp_dir().join(format!("snapview-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let first = unique_path(&dir, "party.jpg");
        assert_eq!(first, dir.join("party.jpg"));
        std::fs::write(&first, b"x").unwrap();
        let second = unique_path(&dir, "party.jpg");
        assert_eq!(second, dir.join("party-2.jpg"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
