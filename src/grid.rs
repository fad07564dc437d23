use std::{
    collections::{HashMap, HashSet},
    sync::{mpsc, Arc},
};

use tracing::warn;

use crate::api::ApiClient;
use crate::model::GalleryPhoto;

const CELL: f32 = 170.0;

enum ThumbState {
    Loading,
    Ready(egui::TextureHandle),
    Failed,
}

struct ThumbResult {
    photo_id: String,
    rgba: Option<(Vec<u8>, usize, usize)>,
}

/// What one frame of the grid produced: a click on the i-th photo of the
/// rendered list, and where the scroll sits (for the pull-to-refresh gate).
#[derive(Default)]
pub struct GridOutput {
    pub clicked: Option<usize>,
    pub scroll_offset: f32,
}

/// Scrollable thumbnail grid. Thumbnails download on background threads and
/// land through a channel drained each frame.
pub struct PhotoGrid {
    api: Arc<ApiClient>,
    thumbnails: HashMap<String, ThumbState>,
    tx: mpsc::SyncSender<ThumbResult>,
    rx: mpsc::Receiver<ThumbResult>,
}

impl PhotoGrid {
    pub fn new(api: Arc<ApiClient>) -> Self {
        let (tx, rx) = mpsc::sync_channel(64);
        Self {
            api,
            thumbnails: HashMap::new(),
            tx,
            rx,
        }
    }

    fn queue_pending_thumbs(&mut self, photos: &[GalleryPhoto], ctx: &egui::Context) {
        let to_queue: Vec<GalleryPhoto> = photos
            .iter()
            .filter(|p| !self.thumbnails.contains_key(&p.id))
            .cloned()
            .collect();

        for photo in to_queue {
            self.thumbnails
                .insert(photo.id.clone(), ThumbState::Loading);
            let api = Arc::clone(&self.api);
            let tx = self.tx.clone();
            let ctx2 = ctx.clone();
            std::thread::spawn(move || {
                let rgba = fetch_thumb(&api, &photo);
                let _ = tx.send(ThumbResult {
                    photo_id: photo.id,
                    rgba,
                });
                ctx2.request_repaint();
            });
        }
    }

    fn drain_channel(&mut self, ctx: &egui::Context) {
        while let Ok(ThumbResult { photo_id, rgba }) = self.rx.try_recv() {
            let state = match rgba {
                Some((data, w, h)) => {
                    let img = egui::ColorImage::from_rgba_unmultiplied([w, h], &data);
                    let tex = ctx.load_texture(
                        format!("thumb_{photo_id}"),
                        img,
                        egui::TextureOptions::LINEAR,
                    );
                    ThumbState::Ready(tex)
                }
                None => ThumbState::Failed,
            };
            self.thumbnails.insert(photo_id, state);
        }
    }

    /// Drops cached thumbnails for photos no longer in the gallery.
    pub fn prune(&mut self, photos: &[GalleryPhoto]) {
        let keep: HashSet<&str> = photos.iter().map(|p| p.id.as_str()).collect();
        self.thumbnails.retain(|id, _| keep.contains(id.as_str()));
    }

    pub fn show(
        &mut self,
        ui: &mut egui::Ui,
        photos: &[GalleryPhoto],
        ctx: &egui::Context,
    ) -> GridOutput {
        self.drain_channel(ctx);
        self.queue_pending_thumbs(photos, ctx);

        let mut out = GridOutput::default();

        if photos.is_empty() {
            ui.centered_and_justified(|ui| {
                ui.label("No photos here yet");
            });
            return out;
        }

        let avail_w = ui.available_width();
        let cols = ((avail_w / (CELL + 8.0)) as usize).max(1);

        let scroll = egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .show(ui, |ui| {
                egui::Grid::new("photo_grid")
                    .num_columns(cols)
                    .spacing([8.0, 8.0])
                    .show(ui, |ui| {
                        for (i, photo) in photos.iter().enumerate() {
                            let thumb = match self.thumbnails.get(&photo.id) {
                                Some(ThumbState::Ready(tex)) => {
                                    Some((tex.id(), tex.size_vec2()))
                                }
                                _ => None,
                            };
                            if draw_photo_cell(ui, photo, thumb) {
                                out.clicked = Some(i);
                            }
                            if (i + 1) % cols == 0 {
                                ui.end_row();
                            }
                        }
                    });
            });
        out.scroll_offset = scroll.state.offset.y;
        out
    }
}

fn draw_photo_cell(
    ui: &mut egui::Ui,
    photo: &GalleryPhoto,
    thumb: Option<(egui::TextureId, egui::Vec2)>,
) -> bool {
    let (resp, painter) =
        ui.allocate_painter(egui::vec2(CELL, CELL + 22.0), egui::Sense::click());
    let rect = resp.rect;

    if resp.hovered() {
        painter.rect_filled(rect, 4.0, ui.visuals().widgets.hovered.bg_fill);
    }

    let img_rect = egui::Rect::from_min_size(rect.min, egui::vec2(CELL, CELL));
    match thumb {
        Some((tex_id, tex_size)) => {
            let scale = (CELL / tex_size.x).min(CELL / tex_size.y);
            let display = tex_size * scale;
            let offset = (egui::vec2(CELL, CELL) - display) * 0.5;
            let draw_rect = egui::Rect::from_min_size(img_rect.min + offset, display);
            painter.image(
                tex_id,
                draw_rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE,
            );
        }
        None => {
            painter.rect_filled(img_rect, 4.0, egui::Color32::from_gray(40));
            painter.text(
                img_rect.center(),
                egui::Align2::CENTER_CENTER,
                "…",
                egui::FontId::proportional(22.0),
                egui::Color32::GRAY,
            );
        }
    }

    // Corner badges
    let mut badge_x = img_rect.max.x - 14.0;
    if photo.is_favorite {
        painter.text(
            egui::pos2(badge_x, img_rect.min.y + 14.0),
            egui::Align2::CENTER_CENTER,
            "♥",
            egui::FontId::proportional(14.0),
            egui::Color32::from_rgb(0xe5, 0x3e, 0x5e),
        );
        badge_x -= 18.0;
    }
    if photo.is_enhanced {
        painter.text(
            egui::pos2(badge_x, img_rect.min.y + 14.0),
            egui::Align2::CENTER_CENTER,
            "✨",
            egui::FontId::proportional(14.0),
            egui::Color32::GOLD,
        );
    }

    painter.text(
        egui::pos2(rect.center().x, img_rect.max.y + 11.0),
        egui::Align2::CENTER_CENTER,
        truncate_label(&photo.original_filename, 24),
        egui::FontId::proportional(11.0),
        ui.visuals().text_color(),
    );

    resp.clicked()
}

/// Caps a filename to `max` characters. Remote filenames are arbitrary UTF-8,
/// so this must cut on a char boundary rather than a byte offset.
fn truncate_label(name: &str, max: usize) -> &str {
    match name.char_indices().nth(max) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

fn fetch_thumb(api: &ApiClient, photo: &GalleryPhoto) -> Option<(Vec<u8>, usize, usize)> {
    let bytes = match api.fetch_image(&photo.thumbnail_url) {
        Ok(b) => b,
        Err(err) => {
            warn!(photo_id = %photo.id, error = %err, "thumbnail fetch failed");
            return None;
        }
    };
    let img = image::load_from_memory(&bytes).ok()?;
    let rgba = img.to_rgba8();
    let w = rgba.width() as usize;
    let h = rgba.height() as usize;
    Some((rgba.into_raw(), w, h))
}
