use std::{
    collections::{HashMap, HashSet},
    sync::{mpsc, Arc},
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::model::GalleryPhoto;
use crate::navigator::{
    LoadState, NavigationPlan, Navigator, RemovalOutcome, Slot, SlotLoad,
};
use crate::session::now_ms;

/// Overlay controls hide after this long without interaction.
const CONTROLS_HIDE: Duration = Duration::from_secs(4);
const MEMORY_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Decoded-texture budget; eviction kicks in at [`MEMORY_PRESSURE`] of it.
const TEXTURE_BUDGET_BYTES: usize = 256 * 1024 * 1024;
const MEMORY_PRESSURE: f32 = 0.7;

/// Things the viewer cannot resolve on its own and hands back to the app.
pub enum ViewerEvent {
    Closed,
    /// A photo finished settling on screen; candidate for view tracking.
    ViewSettled(String),
    ShareRequested(GalleryPhoto),
    DownloadRequested(GalleryPhoto),
    /// The current photo's favorite flag flipped; the gallery list must
    /// mirror the new state.
    FavoriteToggled {
        photo_id: String,
        favorite: bool,
    },
    /// Server confirmed the delete; the gallery list must drop this id too.
    Deleted(String),
    DeleteFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TapZone {
    Prev,
    Center,
    Next,
}

fn tap_zone(x: f32, screen: egui::Rect) -> TapZone {
    let third = screen.width() / 3.0;
    if x < screen.min.x + third {
        TapZone::Prev
    } else if x > screen.max.x - third {
        TapZone::Next
    } else {
        TapZone::Center
    }
}

enum BgResult {
    Loaded {
        generation: u64,
        photo_id: String,
        image: egui::ColorImage,
    },
    LoadFailed {
        generation: u64,
        photo_id: String,
    },
    Deleted {
        photo_id: String,
        result: Result<(), String>,
    },
}

/// Full-screen photo viewer. Rendering and input live here; the paging rules
/// live in [`Navigator`].
pub struct Viewer {
    api: Arc<ApiClient>,
    code: String,
    nav: Navigator,
    textures: HashMap<String, egui::TextureHandle>,
    controls_visible: bool,
    last_interaction: Instant,
    confirm_delete: bool,
    deleting: bool,
    last_memory_check: Instant,
    tx: mpsc::Sender<BgResult>,
    rx: mpsc::Receiver<BgResult>,
}

impl Viewer {
    pub fn open(
        api: Arc<ApiClient>,
        code: String,
        photos: Vec<GalleryPhoto>,
        index: usize,
        ctx: &egui::Context,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let (nav, plan) = Navigator::open(photos, index, &|_: &GalleryPhoto| false);
        let viewer = Self {
            api,
            code,
            nav,
            textures: HashMap::new(),
            controls_visible: true,
            last_interaction: Instant::now(),
            confirm_delete: false,
            deleting: false,
            last_memory_check: Instant::now(),
            tx,
            rx,
        };
        viewer.spawn_loads(&plan, ctx);
        viewer
    }

    pub fn current_photo(&self) -> Option<&GalleryPhoto> {
        self.nav.current_photo()
    }

    /// Runs one frame of the viewer. Returned events are for the app to act
    /// on; an empty vec means nothing happened beyond rendering.
    pub fn show(&mut self, ctx: &egui::Context) -> Vec<ViewerEvent> {
        let mut events = Vec::new();
        self.drain(ctx, &mut events);
        self.enforce_memory_budget();

        let screen = ctx.screen_rect();
        egui::Area::new(egui::Id::new("photo_viewer"))
            .fixed_pos(screen.min)
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                ui.painter().rect_filled(screen, 0.0, egui::Color32::BLACK);
                let response = ui.allocate_rect(screen, egui::Sense::click_and_drag());
                self.handle_pointer(&response, screen, ctx);
                self.paint_slots(ui, screen);
                if self.controls_visible {
                    self.show_controls(ui, screen, ctx, &mut events);
                }
            });

        if self.confirm_delete {
            self.show_delete_dialog(ctx);
        }
        self.handle_keys(ctx, &mut events);

        if self.controls_visible && !self.confirm_delete {
            if self.last_interaction.elapsed() >= CONTROLS_HIDE {
                self.controls_visible = false;
            } else {
                ctx.request_repaint_after(CONTROLS_HIDE - self.last_interaction.elapsed());
            }
        }
        if self.nav.is_transitioning() {
            ctx.request_repaint();
        }
        events
    }

    fn drain(&mut self, ctx: &egui::Context, events: &mut Vec<ViewerEvent>) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                BgResult::Loaded {
                    generation,
                    photo_id,
                    image,
                } => {
                    if generation == self.nav.generation() {
                        let tex = ctx.load_texture(
                            format!("photo_{photo_id}"),
                            image,
                            egui::TextureOptions::LINEAR,
                        );
                        self.textures.insert(photo_id.clone(), tex);
                    }
                    self.settle(generation, &photo_id, events);
                }
                BgResult::LoadFailed {
                    generation,
                    photo_id,
                } => {
                    // A failed load still settles its slot so the transition
                    // never wedges; the slot renders as a blank.
                    self.settle(generation, &photo_id, events);
                }
                BgResult::Deleted { photo_id, result } => {
                    self.deleting = false;
                    self.confirm_delete = false;
                    match result {
                        Ok(()) => {
                            events.push(ViewerEvent::Deleted(photo_id.clone()));
                            self.textures.remove(&photo_id);
                            let textures = &self.textures;
                            let ready =
                                |p: &GalleryPhoto| textures.contains_key(&p.id);
                            match self.nav.remove_photo(&photo_id, &ready) {
                                RemovalOutcome::Closed => {
                                    events.push(ViewerEvent::Closed)
                                }
                                RemovalOutcome::Resync(plan) => {
                                    self.spawn_loads(&plan, ctx)
                                }
                            }
                        }
                        Err(message) => events.push(ViewerEvent::DeleteFailed(message)),
                    }
                }
            }
        }
    }

    fn settle(&mut self, generation: u64, photo_id: &str, events: &mut Vec<ViewerEvent>) {
        if self.nav.slot_loaded(generation, photo_id) == SlotLoad::Settled {
            if let Some(photo) = self.nav.current_photo() {
                events.push(ViewerEvent::ViewSettled(photo.id.clone()));
            }
        }
    }

    fn handle_pointer(&mut self, response: &egui::Response, screen: egui::Rect, ctx: &egui::Context) {
        if response.drag_started() {
            if let Some(pos) = response.interact_pointer_pos() {
                self.nav.drag_start(pos.x, now_ms());
            }
        } else if response.dragged() {
            if let Some(pos) = response.interact_pointer_pos() {
                self.nav.drag_move(pos.x);
            }
        } else if response.drag_stopped() {
            let textures = &self.textures;
            let ready = |p: &GalleryPhoto| textures.contains_key(&p.id);
            if let Some(plan) = self.nav.drag_end(now_ms(), &ready) {
                self.spawn_loads(&plan, ctx);
            }
        }

        if response.clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                self.handle_tap(tap_zone(pos.x, screen), ctx);
            }
        }
    }

    /// Side taps page, a center tap shows the controls and restarts the
    /// auto-hide timer. A center tap never hides them.
    fn handle_tap(&mut self, zone: TapZone, ctx: &egui::Context) {
        match zone {
            TapZone::Prev => self.go_prev(ctx),
            TapZone::Next => self.go_next(ctx),
            TapZone::Center => {}
        }
        self.wake_controls();
    }

    fn handle_keys(&mut self, ctx: &egui::Context, events: &mut Vec<ViewerEvent>) {
        let (left, right, escape) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::ArrowLeft),
                i.key_pressed(egui::Key::ArrowRight),
                i.key_pressed(egui::Key::Escape),
            )
        });
        if escape {
            if self.confirm_delete {
                if !self.deleting {
                    self.confirm_delete = false;
                }
            } else {
                events.push(ViewerEvent::Closed);
            }
            return;
        }
        if !self.confirm_delete {
            if left {
                self.go_prev(ctx);
                self.wake_controls();
            }
            if right {
                self.go_next(ctx);
                self.wake_controls();
            }
        }
    }

    fn paint_slots(&mut self, ui: &mut egui::Ui, screen: egui::Rect) {
        let width = screen.width();
        let offset = self.nav.offset();
        for (slot, shift) in [
            (Slot::Left, -width),
            (Slot::Center, 0.0),
            (Slot::Right, width),
        ] {
            let entry = self.nav.buffer().get(slot);
            let Some(photo) = &entry.photo else { continue };
            let rect = screen.translate(egui::vec2(offset + shift, 0.0));
            if !rect.intersects(screen) {
                continue;
            }
            if let Some(tex) = self.textures.get(&photo.id) {
                let tex_size = tex.size_vec2();
                let scale = (rect.width() / tex_size.x).min(rect.height() / tex_size.y);
                let img_rect = egui::Rect::from_center_size(rect.center(), tex_size * scale);
                ui.painter().image(
                    tex.id(),
                    img_rect,
                    egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                    egui::Color32::WHITE,
                );
            } else if entry.state == LoadState::Loading {
                ui.put(
                    egui::Rect::from_center_size(rect.center(), egui::vec2(32.0, 32.0)),
                    egui::Spinner::new().size(32.0),
                );
            }
        }
    }

    fn show_controls(
        &mut self,
        ui: &mut egui::Ui,
        screen: egui::Rect,
        ctx: &egui::Context,
        events: &mut Vec<ViewerEvent>,
    ) {
        let bar = egui::Rect::from_min_max(
            screen.min,
            egui::pos2(screen.max.x, screen.min.y + 44.0),
        );
        ui.painter()
            .rect_filled(bar, 0.0, egui::Color32::from_black_alpha(160));

        let counter = format!("{} / {}", self.nav.index() + 1, self.nav.len());
        ui.put(
            egui::Rect::from_center_size(
                egui::pos2(screen.center().x, bar.center().y),
                egui::vec2(120.0, 24.0),
            ),
            egui::Label::new(
                egui::RichText::new(counter)
                    .color(egui::Color32::WHITE)
                    .strong(),
            ),
        );

        let button = |ui: &mut egui::Ui, x: f32, text: &str| {
            ui.put(
                egui::Rect::from_center_size(
                    egui::pos2(x, bar.center().y),
                    egui::vec2(32.0, 28.0),
                ),
                egui::Button::new(egui::RichText::new(text).size(16.0)),
            )
        };

        if button(ui, screen.min.x + 26.0, "✕").clicked() {
            events.push(ViewerEvent::Closed);
        }
        let photo = self.nav.current_photo().cloned();
        if let Some(photo) = photo {
            if button(ui, screen.max.x - 26.0, "🗑").clicked() {
                self.confirm_delete = true;
                self.wake_controls();
            }
            if button(ui, screen.max.x - 66.0, "⬇").clicked() {
                events.push(ViewerEvent::DownloadRequested(photo.clone()));
                self.wake_controls();
            }
            if button(ui, screen.max.x - 106.0, "📤").clicked() {
                events.push(ViewerEvent::ShareRequested(photo.clone()));
                self.wake_controls();
            }
            let heart = if photo.is_favorite { "♥" } else { "♡" };
            if button(ui, screen.max.x - 146.0, heart).clicked() {
                if let Some((photo_id, favorite)) = self.nav.toggle_favorite() {
                    events.push(ViewerEvent::FavoriteToggled { photo_id, favorite });
                }
                self.wake_controls();
            }
        }

        let mid_y = screen.center().y;
        if self.nav.index() > 0
            && ui
                .put(
                    egui::Rect::from_center_size(
                        egui::pos2(screen.min.x + 28.0, mid_y),
                        egui::vec2(36.0, 48.0),
                    ),
                    egui::Button::new("◀"),
                )
                .clicked()
        {
            self.go_prev(ctx);
            self.wake_controls();
        }
        if self.nav.index() + 1 < self.nav.len()
            && ui
                .put(
                    egui::Rect::from_center_size(
                        egui::pos2(screen.max.x - 28.0, mid_y),
                        egui::vec2(36.0, 48.0),
                    ),
                    egui::Button::new("▶"),
                )
                .clicked()
        {
            self.go_next(ctx);
            self.wake_controls();
        }
    }

    fn show_delete_dialog(&mut self, ctx: &egui::Context) {
        let mut start = false;
        egui::Window::new("Delete photo?")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .show(ctx, |ui| {
                ui.label("This removes the photo from the gallery for everyone.");
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui
                        .add_enabled(!self.deleting, egui::Button::new("Cancel"))
                        .clicked()
                    {
                        self.confirm_delete = false;
                    }
                    if ui
                        .add_enabled(!self.deleting, egui::Button::new("Delete"))
                        .clicked()
                    {
                        start = true;
                    }
                    if self.deleting {
                        ui.spinner();
                    }
                });
            });
        if start {
            self.start_delete(ctx);
        }
    }

    fn start_delete(&mut self, ctx: &egui::Context) {
        let Some(photo) = self.nav.current_photo() else {
            return;
        };
        self.deleting = true;
        let api = Arc::clone(&self.api);
        let code = self.code.clone();
        let photo_id = photo.id.clone();
        let tx = self.tx.clone();
        let ctx2 = ctx.clone();
        std::thread::spawn(move || {
            let result = api
                .delete_photo(&code, &photo_id)
                .map_err(|e| e.to_string());
            let _ = tx.send(BgResult::Deleted { photo_id, result });
            ctx2.request_repaint();
        });
    }

    fn go_prev(&mut self, ctx: &egui::Context) {
        if self.nav.index() > 0 {
            self.go(self.nav.index() - 1, ctx);
        }
    }

    fn go_next(&mut self, ctx: &egui::Context) {
        if self.nav.index() + 1 < self.nav.len() {
            self.go(self.nav.index() + 1, ctx);
        }
    }

    fn go(&mut self, index: usize, ctx: &egui::Context) {
        let textures = &self.textures;
        let ready = |p: &GalleryPhoto| textures.contains_key(&p.id);
        if let Some(plan) = self.nav.navigate_to(index, &ready) {
            self.spawn_loads(&plan, ctx);
        }
    }

    fn spawn_loads(&self, plan: &NavigationPlan, ctx: &egui::Context) {
        for req in &plan.requests {
            let api = Arc::clone(&self.api);
            let tx = self.tx.clone();
            let ctx2 = ctx.clone();
            let generation = req.generation;
            let photo = req.photo.clone();
            std::thread::spawn(move || {
                let msg = match fetch_color_image(&api, &photo) {
                    Ok(image) => BgResult::Loaded {
                        generation,
                        photo_id: photo.id,
                        image,
                    },
                    Err(err) => {
                        warn!(photo_id = %photo.id, error = %err, "photo load failed");
                        BgResult::LoadFailed {
                            generation,
                            photo_id: photo.id,
                        }
                    }
                };
                let _ = tx.send(msg);
                ctx2.request_repaint();
            });
        }
    }

    /// Evicts decoded textures outside the buffer once usage crosses the
    /// pressure threshold. Checked on a 30s cadence, not per frame.
    fn enforce_memory_budget(&mut self) {
        if self.last_memory_check.elapsed() < MEMORY_CHECK_INTERVAL {
            return;
        }
        self.last_memory_check = Instant::now();
        let total: usize = self.textures.values().map(texture_bytes).sum();
        if (total as f32) < TEXTURE_BUDGET_BYTES as f32 * MEMORY_PRESSURE {
            return;
        }
        let keep: HashSet<String> = self.nav.buffered_ids().into_iter().collect();
        let before = self.textures.len();
        self.textures.retain(|id, _| keep.contains(id));
        debug!(
            evicted = before - self.textures.len(),
            "trimmed viewer texture cache"
        );
    }

    fn wake_controls(&mut self) {
        self.controls_visible = true;
        self.last_interaction = Instant::now();
    }
}

fn texture_bytes(tex: &egui::TextureHandle) -> usize {
    let [w, h] = tex.size();
    w * h * 4
}

fn fetch_color_image(api: &ApiClient, photo: &GalleryPhoto) -> anyhow::Result<egui::ColorImage> {
    let bytes = api.fetch_image(&photo.download_url)?;
    let img = image::load_from_memory(&bytes)?;
    let rgba = img.to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    Ok(egui::ColorImage::from_rgba_unmultiplied(size, rgba.as_raw()))
}
