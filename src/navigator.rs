use crate::model::GalleryPhoto;

pub const SWIPE_COMMIT_DISTANCE: f32 = 60.0;
/// Pixels per millisecond.
pub const SWIPE_COMMIT_VELOCITY: f32 = 0.2;
/// Resistance applied to drags past the first or last photo.
pub const EDGE_DAMPING: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Left,
    Center,
    Right,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Left, Slot::Center, Slot::Right];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Empty,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Default)]
pub struct SlotEntry {
    pub photo: Option<GalleryPhoto>,
    pub state: LoadState,
}

/// Three pre-populated slots around the current photo, the structure that
/// makes paging flicker-free: the off-screen neighbors are loaded before any
/// swap becomes visible.
#[derive(Debug, Clone, Default)]
pub struct TripleBuffer {
    pub left: SlotEntry,
    pub center: SlotEntry,
    pub right: SlotEntry,
}

impl TripleBuffer {
    pub fn get(&self, slot: Slot) -> &SlotEntry {
        match slot {
            Slot::Left => &self.left,
            Slot::Center => &self.center,
            Slot::Right => &self.right,
        }
    }

    fn slots_mut(&mut self) -> [&mut SlotEntry; 3] {
        [&mut self.left, &mut self.center, &mut self.right]
    }

    fn rebuild<F>(photos: &[GalleryPhoto], center: usize, is_ready: &F) -> Self
    where
        F: Fn(&GalleryPhoto) -> bool,
    {
        let entry = |photo: Option<&GalleryPhoto>| match photo {
            Some(p) => SlotEntry {
                state: if is_ready(p) {
                    LoadState::Ready
                } else {
                    LoadState::Loading
                },
                photo: Some(p.clone()),
            },
            None => SlotEntry::default(),
        };
        Self {
            left: entry(center.checked_sub(1).and_then(|i| photos.get(i))),
            center: entry(photos.get(center)),
            right: entry(photos.get(center + 1)),
        }
    }
}

/// One image the owner must fetch and decode for the pending transition.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub generation: u64,
    pub photo: GalleryPhoto,
}

/// What a navigation asks of the owner: slide direction for the visual and
/// the set of images to preload. An empty request list means the transition
/// settled from cache immediately.
#[derive(Debug)]
pub struct NavigationPlan {
    pub generation: u64,
    /// -1 sliding toward the previous photo, +1 toward the next, 0 for
    /// open/resync.
    pub direction: i8,
    pub requests: Vec<LoadRequest>,
}

#[derive(Debug)]
pub enum RemovalOutcome {
    /// No photos left; the viewer should close.
    Closed,
    Resync(NavigationPlan),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotLoad {
    /// Completion from a superseded generation; must be discarded.
    Stale,
    /// Accepted, more slots still loading.
    Pending,
    /// All slots settled; the buffer was swapped and the index advanced.
    Settled,
}

struct DragState {
    start_x: f32,
    last_x: f32,
    start_ms: u64,
}

/// Paging state machine for the full-screen viewer.
///
/// Invariants it maintains:
/// - the buffer always mirrors `photos[index-1..=index+1]` once settled;
/// - at most one transition is in flight, later requests are dropped;
/// - slot images finish loading (success or failure) before the swap, and
///   the reported index only changes at the swap;
/// - completions are tagged with a generation and stale ones are discarded.
pub struct Navigator {
    photos: Vec<GalleryPhoto>,
    index: usize,
    target: usize,
    buffer: TripleBuffer,
    transitioning: bool,
    generation: u64,
    pending: Vec<String>,
    offset: f32,
    drag: Option<DragState>,
}

impl Navigator {
    pub fn open<F>(photos: Vec<GalleryPhoto>, index: usize, is_ready: &F) -> (Self, NavigationPlan)
    where
        F: Fn(&GalleryPhoto) -> bool,
    {
        let index = index.min(photos.len().saturating_sub(1));
        let mut nav = Self {
            photos,
            index,
            target: index,
            buffer: TripleBuffer::default(),
            transitioning: true,
            generation: 0,
            pending: Vec::new(),
            offset: 0.0,
            drag: None,
        };
        let plan = nav.begin(index, 0, is_ready);
        (nav, plan)
    }

    pub fn photos(&self) -> &[GalleryPhoto] {
        &self.photos
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_photo(&self) -> Option<&GalleryPhoto> {
        self.photos.get(self.index)
    }

    pub fn buffer(&self) -> &TripleBuffer {
        &self.buffer
    }

    pub fn is_transitioning(&self) -> bool {
        self.transitioning
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Horizontal drag offset for the render layer, in pixels.
    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Photo ids currently held by the buffer; textures outside this set are
    /// fair game for eviction.
    pub fn buffered_ids(&self) -> Vec<String> {
        Slot::ALL
            .iter()
            .filter_map(|s| self.buffer.get(*s).photo.as_ref())
            .map(|p| p.id.clone())
            .collect()
    }

    /// Requests a transition to `index`. No-op (returns `None`) when the
    /// index is out of bounds, already current, or a transition is in
    /// flight.
    pub fn navigate_to<F>(&mut self, index: usize, is_ready: &F) -> Option<NavigationPlan>
    where
        F: Fn(&GalleryPhoto) -> bool,
    {
        if self.transitioning || index == self.index || index >= self.photos.len() {
            return None;
        }
        let direction = if index > self.index { 1 } else { -1 };
        self.transitioning = true;
        Some(self.begin(index, direction, is_ready))
    }

    /// Reports a finished image load. The swap to the new buffer only
    /// becomes visible (and the index only changes) once every pending slot
    /// has settled.
    pub fn slot_loaded(&mut self, generation: u64, photo_id: &str) -> SlotLoad {
        if generation != self.generation || !self.pending.iter().any(|id| id == photo_id) {
            return SlotLoad::Stale;
        }
        for entry in self.buffer.slots_mut() {
            if entry.photo.as_ref().is_some_and(|p| p.id == photo_id) {
                entry.state = LoadState::Ready;
            }
        }
        self.pending.retain(|id| id != photo_id);
        if self.pending.is_empty() {
            self.finish();
            SlotLoad::Settled
        } else {
            SlotLoad::Pending
        }
    }

    pub fn drag_start(&mut self, x: f32, now_ms: u64) {
        if self.transitioning {
            return;
        }
        self.drag = Some(DragState {
            start_x: x,
            last_x: x,
            start_ms: now_ms,
        });
    }

    pub fn drag_move(&mut self, x: f32) -> f32 {
        if self.transitioning {
            return self.offset;
        }
        let Some(drag) = &mut self.drag else {
            return self.offset;
        };
        drag.last_x = x;
        let delta = x - drag.start_x;
        self.offset = self.damp_at_edges(delta);
        self.offset
    }

    /// Resolves the drag into a commit or a snap-back. Commits at more than
    /// [`SWIPE_COMMIT_DISTANCE`] px or [`SWIPE_COMMIT_VELOCITY`] px/ms.
    pub fn drag_end<F>(&mut self, now_ms: u64, is_ready: &F) -> Option<NavigationPlan>
    where
        F: Fn(&GalleryPhoto) -> bool,
    {
        let Some(drag) = self.drag.take() else {
            return None;
        };
        if self.transitioning {
            return None;
        }
        let delta = drag.last_x - drag.start_x;
        let elapsed_ms = now_ms.saturating_sub(drag.start_ms).max(1) as f32;
        let velocity = delta.abs() / elapsed_ms;

        let plan = if delta.abs() > SWIPE_COMMIT_DISTANCE || velocity > SWIPE_COMMIT_VELOCITY {
            if delta > 0.0 && self.index > 0 {
                self.navigate_to(self.index - 1, is_ready)
            } else if delta < 0.0 && self.index + 1 < self.photos.len() {
                self.navigate_to(self.index + 1, is_ready)
            } else {
                None
            }
        } else {
            None
        };
        if plan.is_none() {
            self.offset = 0.0;
        }
        plan
    }

    /// Removes a deleted photo and resynchronizes the buffer against the
    /// shrunken list. This is a dedicated entry point because
    /// `navigate_to(current)` is defined as a no-op.
    pub fn remove_photo<F>(&mut self, photo_id: &str, is_ready: &F) -> RemovalOutcome
    where
        F: Fn(&GalleryPhoto) -> bool,
    {
        self.photos.retain(|p| p.id != photo_id);
        if self.photos.is_empty() {
            return RemovalOutcome::Closed;
        }
        let target = self.index.min(self.photos.len() - 1);
        self.transitioning = true;
        RemovalOutcome::Resync(self.begin(target, 0, is_ready))
    }

    /// Flips the favorite flag on the current photo, mirroring the change
    /// into any buffer slot holding a copy. Returns the id and new state.
    pub fn toggle_favorite(&mut self) -> Option<(String, bool)> {
        let photo = self.photos.get_mut(self.index)?;
        photo.is_favorite = !photo.is_favorite;
        let id = photo.id.clone();
        let favorite = photo.is_favorite;
        for entry in self.buffer.slots_mut() {
            if let Some(p) = &mut entry.photo {
                if p.id == id {
                    p.is_favorite = favorite;
                }
            }
        }
        Some((id, favorite))
    }

    fn begin<F>(&mut self, target: usize, direction: i8, is_ready: &F) -> NavigationPlan
    where
        F: Fn(&GalleryPhoto) -> bool,
    {
        self.generation += 1;
        self.target = target;
        self.drag = None;
        self.buffer = TripleBuffer::rebuild(&self.photos, target, is_ready);
        self.pending = Slot::ALL
            .iter()
            .filter_map(|s| {
                let entry = self.buffer.get(*s);
                (entry.state == LoadState::Loading)
                    .then(|| entry.photo.as_ref().map(|p| p.id.clone()))
                    .flatten()
            })
            .collect();
        let requests = self
            .pending
            .iter()
            .filter_map(|id| self.photos.iter().find(|p| &p.id == id))
            .map(|p| LoadRequest {
                generation: self.generation,
                photo: p.clone(),
            })
            .collect::<Vec<_>>();
        if self.pending.is_empty() {
            self.finish();
        }
        NavigationPlan {
            generation: self.generation,
            direction,
            requests,
        }
    }

    fn finish(&mut self) {
        self.index = self.target;
        self.transitioning = false;
        self.offset = 0.0;
    }

    fn damp_at_edges(&self, delta: f32) -> f32 {
        let at_first = self.index == 0 && delta > 0.0;
        let at_last = self.index + 1 == self.photos.len() && delta < 0.0;
        if at_first || at_last {
            delta * EDGE_DAMPING
        } else {
            delta
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashSet;

    use super::*;
    use crate::model::GalleryPhoto;

    fn photo(id: &str) -> GalleryPhoto {
        GalleryPhoto {
            id: id.to_string(),
            filename: format!("{id}.jpg"),
            original_filename: format!("IMG_{id}.jpg"),
            s3_key: format!("photos/{id}.jpg"),
            uploaded_at: "2026-06-01T10:00:00Z".to_string(),
            thumbnail_url: format!("https://cdn.example/thumb/{id}.jpg"),
            download_url: format!("https://cdn.example/full/{id}.jpg"),
            width: None,
            height: None,
            is_enhanced: false,
            is_favorite: false,
            confidence: 0.9,
        }
    }

    /// Test harness that plays the render layer: remembers which photo ids
    /// have "decoded textures" and feeds load completions back in.
    struct Loader {
        cache: RefCell<HashSet<String>>,
    }

    impl Loader {
        fn new() -> Self {
            Self {
                cache: RefCell::new(HashSet::new()),
            }
        }

        fn is_ready(&self) -> impl Fn(&GalleryPhoto) -> bool + '_ {
            |p: &GalleryPhoto| self.cache.borrow().contains(&p.id)
        }

        fn complete(&self, nav: &mut Navigator, plan: &NavigationPlan) -> SlotLoad {
            let mut last = SlotLoad::Pending;
            for req in &plan.requests {
                self.cache.borrow_mut().insert(req.photo.id.clone());
                last = nav.slot_loaded(req.generation, &req.photo.id);
            }
            last
        }
    }

    fn buffer_ids(nav: &Navigator) -> [Option<String>; 3] {
        let id = |slot: Slot| nav.buffer().get(slot).photo.as_ref().map(|p| p.id.clone());
        [id(Slot::Left), id(Slot::Center), id(Slot::Right)]
    }

    fn open_abc(loader: &Loader) -> Navigator {
        let photos = vec![photo("a"), photo("b"), photo("c")];
        let (mut nav, plan) = Navigator::open(photos, 0, &loader.is_ready());
        loader.complete(&mut nav, &plan);
        nav
    }

    #[test]
    fn open_settles_once_center_and_right_load() {
        let loader = Loader::new();
        let nav = open_abc(&loader);
        assert!(!nav.is_transitioning());
        assert_eq!(nav.index(), 0);
        assert_eq!(
            buffer_ids(&nav),
            [None, Some("a".to_string()), Some("b".to_string())]
        );
    }

    #[test]
    fn navigate_to_far_index_rebuilds_buffer_then_settles() {
        let loader = Loader::new();
        let mut nav = open_abc(&loader);

        let plan = nav
            .navigate_to(2, &loader.is_ready())
            .expect("navigation should start");
        // Transient state: buffer already re-centered on c, index not yet
        // advanced, swap held back until loads settle.
        assert!(nav.is_transitioning());
        assert_eq!(nav.index(), 0);
        assert_eq!(
            buffer_ids(&nav),
            [Some("b".to_string()), Some("c".to_string()), None]
        );

        assert_eq!(loader.complete(&mut nav, &plan), SlotLoad::Settled);
        assert_eq!(nav.index(), 2);
        assert!(!nav.is_transitioning());
    }

    #[test]
    fn settled_buffer_mirrors_neighbors_of_index() {
        let loader = Loader::new();
        let mut nav = open_abc(&loader);
        let plan = nav.navigate_to(1, &loader.is_ready()).unwrap();
        loader.complete(&mut nav, &plan);

        assert_eq!(nav.index(), 1);
        assert_eq!(
            buffer_ids(&nav),
            [
                Some("a".to_string()),
                Some("b".to_string()),
                Some("c".to_string())
            ]
        );
    }

    #[test]
    fn navigation_during_transition_is_a_no_op() {
        let loader = Loader::new();
        let mut nav = open_abc(&loader);

        let plan = nav.navigate_to(1, &loader.is_ready()).unwrap();
        let generation = nav.generation();
        assert!(nav.navigate_to(2, &loader.is_ready()).is_none());
        assert_eq!(nav.generation(), generation);
        assert_eq!(nav.index(), 0);

        loader.complete(&mut nav, &plan);
        assert_eq!(nav.index(), 1);
    }

    #[test]
    fn out_of_bounds_and_same_index_are_no_ops() {
        let loader = Loader::new();
        let mut nav = open_abc(&loader);
        assert!(nav.navigate_to(3, &loader.is_ready()).is_none());
        assert!(nav.navigate_to(0, &loader.is_ready()).is_none());
        assert_eq!(nav.index(), 0);
    }

    #[test]
    fn stale_generation_completions_are_discarded() {
        let loader = Loader::new();
        let photos = vec![photo("a"), photo("b")];
        let (mut nav, open_plan) = Navigator::open(photos, 0, &loader.is_ready());
        assert!(nav.is_transitioning());

        // A delete lands before the open loads finish; the resync bumps the
        // generation.
        let outcome = nav.remove_photo("b", &loader.is_ready());
        let resync_plan = match outcome {
            RemovalOutcome::Resync(plan) => plan,
            RemovalOutcome::Closed => panic!("one photo should remain"),
        };
        assert!(resync_plan.generation > open_plan.generation);

        // The open-generation completion must now be ignored.
        for req in &open_plan.requests {
            assert_eq!(nav.slot_loaded(req.generation, &req.photo.id), SlotLoad::Stale);
        }
        assert!(nav.is_transitioning());

        loader.complete(&mut nav, &resync_plan);
        assert_eq!(nav.index(), 0);
        assert_eq!(buffer_ids(&nav), [None, Some("a".to_string()), None]);
    }

    #[test]
    fn navigation_settles_from_cache_without_requests() {
        let loader = Loader::new();
        let mut nav = open_abc(&loader);
        // a and b are cached from the open; navigating to b needs only c.
        let plan = nav.navigate_to(1, &loader.is_ready()).unwrap();
        loader.complete(&mut nav, &plan);

        // Everything for index 0 is cached now; navigating back settles
        // immediately.
        let plan = nav.navigate_to(0, &loader.is_ready()).unwrap();
        assert!(plan.requests.is_empty());
        assert!(!nav.is_transitioning());
        assert_eq!(nav.index(), 0);
    }

    #[test]
    fn drag_of_61px_at_low_velocity_commits() {
        let loader = Loader::new();
        let mut nav = open_abc(&loader);
        nav.drag_start(200.0, 0);
        nav.drag_move(139.0); // 61 px left, toward next
        let plan = nav.drag_end(1000, &loader.is_ready()); // 0.061 px/ms
        assert!(plan.is_some());
        loader.complete(&mut nav, &plan.unwrap());
        assert_eq!(nav.index(), 1);
    }

    #[test]
    fn drag_of_59px_at_near_zero_velocity_snaps_back() {
        let loader = Loader::new();
        let mut nav = open_abc(&loader);
        nav.drag_start(200.0, 0);
        nav.drag_move(141.0); // 59 px
        let plan = nav.drag_end(10_000, &loader.is_ready());
        assert!(plan.is_none());
        assert_eq!(nav.index(), 0);
        assert_eq!(nav.offset(), 0.0);
    }

    #[test]
    fn short_fast_flick_commits_on_velocity() {
        let loader = Loader::new();
        let mut nav = open_abc(&loader);
        nav.drag_start(200.0, 0);
        nav.drag_move(170.0); // 30 px in 100 ms = 0.3 px/ms
        let plan = nav.drag_end(100, &loader.is_ready());
        assert!(plan.is_some());
    }

    #[test]
    fn drag_past_first_photo_is_damped() {
        let loader = Loader::new();
        let mut nav = open_abc(&loader);
        nav.drag_start(100.0, 0);
        let offset = nav.drag_move(200.0); // rightward at index 0
        assert!((offset - 100.0 * EDGE_DAMPING).abs() < f32::EPSILON);

        // Releasing an edge drag snaps back rather than committing.
        let plan = nav.drag_end(100, &loader.is_ready());
        assert!(plan.is_none());
        assert_eq!(nav.offset(), 0.0);
    }

    #[test]
    fn deleting_the_only_photo_closes_the_viewer() {
        let loader = Loader::new();
        let (mut nav, plan) = Navigator::open(vec![photo("a")], 0, &loader.is_ready());
        loader.complete(&mut nav, &plan);
        assert!(matches!(
            nav.remove_photo("a", &loader.is_ready()),
            RemovalOutcome::Closed
        ));
    }

    #[test]
    fn deleting_the_viewed_last_photo_moves_to_new_last() {
        let loader = Loader::new();
        let mut nav = open_abc(&loader);
        let plan = nav.navigate_to(2, &loader.is_ready()).unwrap();
        loader.complete(&mut nav, &plan);
        assert_eq!(nav.index(), 2);

        match nav.remove_photo("c", &loader.is_ready()) {
            RemovalOutcome::Resync(plan) => {
                loader.complete(&mut nav, &plan);
            }
            RemovalOutcome::Closed => panic!("two photos remain"),
        }
        assert_eq!(nav.index(), 1);
        assert_eq!(nav.len(), 2);
        assert_eq!(
            buffer_ids(&nav),
            [Some("a".to_string()), Some("b".to_string()), None]
        );
    }

    #[test]
    fn deleting_a_middle_photo_resyncs_at_the_same_index() {
        let loader = Loader::new();
        let mut nav = open_abc(&loader);
        let plan = nav.navigate_to(1, &loader.is_ready()).unwrap();
        loader.complete(&mut nav, &plan);

        match nav.remove_photo("b", &loader.is_ready()) {
            RemovalOutcome::Resync(plan) => {
                loader.complete(&mut nav, &plan);
            }
            RemovalOutcome::Closed => panic!("two photos remain"),
        }
        // Index 1 is still valid against the shrunken list and now shows c.
        assert_eq!(nav.index(), 1);
        assert_eq!(
            buffer_ids(&nav),
            [Some("a".to_string()), Some("c".to_string()), None]
        );
    }

    #[test]
    fn toggled_favorite_shows_under_the_favorites_filter() {
        use crate::model::{filtered, GalleryFilter};

        let loader = Loader::new();
        let mut nav = open_abc(&loader);
        assert!(filtered(nav.photos(), GalleryFilter::Favorites).is_empty());

        let (id, favorite) = nav.toggle_favorite().unwrap();
        assert_eq!(id, "a");
        assert!(favorite);
        let favs = filtered(nav.photos(), GalleryFilter::Favorites);
        assert_eq!(favs.len(), 1);
        assert_eq!(favs[0].id, "a");
        // The buffer copy of the photo carries the flag too.
        let center = nav.buffer().get(Slot::Center).photo.as_ref().unwrap();
        assert!(center.is_favorite);

        let (_, favorite) = nav.toggle_favorite().unwrap();
        assert!(!favorite);
        assert!(filtered(nav.photos(), GalleryFilter::Favorites).is_empty());
    }
}
