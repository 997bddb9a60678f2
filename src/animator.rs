//! Playback driver: ticked by the host's refresh clock, owns the frame
//! store, and tells the hosting view when to redraw.

use crate::error::CatResult;
use crate::scale::{ContentMode, Size};
use crate::store::{CachingStrategy, FrameStore, ReadyCallback};
use crate::{Bitmap, DEFAULT_FRAME_BUFFER_SIZE};
use std::path::Path;
use std::sync::Weak;

/// Capability interface the hosting view implements to display animated
/// GIFs. The driver keeps a non-owning reference, so the tick source never
/// keeps a dead view alive.
pub trait Animatable: Send + Sync {
    /// Target size used for resizing the frames.
    fn target_size(&self) -> Size;

    /// Content mode used for resizing the frames.
    fn content_mode(&self) -> ContentMode;

    /// A new frame is ready; redraw now. Fired once per advanced frame
    /// while playing.
    fn animator_has_new_frame(&self);
}

/// Drives one [`FrameStore`] against the host clock.
///
/// The host subscribes the animator to its per-refresh callback and feeds
/// elapsed time into [`Animator::on_tick`]; `start_animating` /
/// `stop_animating` gate whether ticks reach the store. The driver moves
/// through Idle (no store) → Prepared/Paused → Playing and back.
pub struct Animator {
    delegate: Weak<dyn Animatable>,
    frame_store: Option<FrameStore>,
    frame_buffer_size: usize,
    should_resize_frames: bool,
    is_animating: bool,
    animation_complete: Option<Box<dyn FnOnce() + Send>>,
    loop_complete: Option<Box<dyn FnMut() + Send>>,
}

impl Animator {
    pub fn new(delegate: Weak<dyn Animatable>) -> Self {
        Animator {
            delegate,
            frame_store: None,
            frame_buffer_size: DEFAULT_FRAME_BUFFER_SIZE,
            should_resize_frames: false,
            is_animating: false,
            animation_complete: None,
            loop_complete: None,
        }
    }

    /// Number of upcoming frames to keep decoded. More memory, less CPU.
    /// `0` caches every frame. Applies to stores prepared afterwards.
    pub fn set_frame_buffer_size(&mut self, frames: usize) {
        self.frame_buffer_size = frames;
    }

    /// Whether decoded frames are scaled to the target size.
    pub fn set_should_resize_frames(&mut self, resize: bool) {
        self.should_resize_frames = resize;
    }

    /// One-shot callback fired when all loops are done.
    /// Never fired for infinite loop counts.
    pub fn on_animation_complete(&mut self, callback: Box<dyn FnOnce() + Send>) {
        self.animation_complete = Some(callback);
    }

    /// Fired at the end of each completed loop, except the final one of a
    /// finite count, which fires the animation-complete callback instead.
    pub fn on_loop_complete(&mut self, callback: Box<dyn FnMut() + Send>) {
        self.loop_complete = Some(callback);
    }

    /// Creates a fresh frame store for the given GIF bytes and starts
    /// preparing frames in the background. Playback stays paused until
    /// [`Animator::start_animating`].
    ///
    /// `loop_count` of `None` defers to the GIF's own loop metadata;
    /// `Some(n)` with `n <= 0` loops forever.
    pub fn prepare_for_animation(
        &mut self,
        data: &[u8],
        size: Size,
        content_mode: ContentMode,
        loop_count: Option<i32>,
        on_ready: Option<ReadyCallback>,
    ) {
        let caching_strategy = if self.frame_buffer_size > 0 {
            CachingStrategy::CacheUpcoming(self.frame_buffer_size)
        } else {
            CachingStrategy::CacheAll
        };
        let store = FrameStore::new(data.to_vec(), size, content_mode, caching_strategy, loop_count);
        store.set_should_resize_frames(self.should_resize_frames);
        store.prepare_frames(on_ready);
        self.is_animating = false;
        self.frame_store = Some(store);
    }

    /// Like [`Animator::prepare_for_animation`], but takes the target size
    /// and content mode from the delegate's current geometry.
    pub fn prepare_for_animation_in_view(
        &mut self,
        data: &[u8],
        loop_count: Option<i32>,
        on_ready: Option<ReadyCallback>,
    ) {
        let (size, content_mode) = match self.delegate.upgrade() {
            Some(view) => (view.target_size(), view.content_mode()),
            None => (Size::ZERO, ContentMode::None),
        };
        self.prepare_for_animation(data, size, content_mode, loop_count, on_ready);
    }

    /// Reads a GIF from the filesystem and prepares it for animation.
    /// Fetching bytes from anywhere else is the caller's job.
    pub fn prepare_for_animation_with_file(
        &mut self,
        path: &Path,
        size: Size,
        content_mode: ContentMode,
        loop_count: Option<i32>,
        on_ready: Option<ReadyCallback>,
    ) -> CatResult<()> {
        let data = std::fs::read(path)?;
        self.prepare_for_animation(&data, size, content_mode, loop_count, on_ready);
        Ok(())
    }

    /// Prepare and start animating immediately.
    pub fn animate(
        &mut self,
        data: &[u8],
        size: Size,
        content_mode: ContentMode,
        loop_count: Option<i32>,
        on_ready: Option<ReadyCallback>,
    ) {
        self.prepare_for_animation(data, size, content_mode, loop_count, on_ready);
        self.start_animating();
    }

    /// Lets host clock ticks reach the frame store. No-op when the store
    /// is missing or not animatable (single-frame or undecodable image).
    pub fn start_animating(&mut self) {
        if self.frame_store.as_ref().map_or(false, FrameStore::is_animatable) {
            self.is_animating = true;
        }
    }

    pub fn stop_animating(&mut self) {
        self.is_animating = false;
    }

    pub fn is_animating(&self) -> bool {
        self.is_animating
    }

    /// One tick of the host clock with the elapsed time since the previous
    /// tick. Call from a single thread.
    pub fn on_tick(&mut self, elapsed_seconds: f64) {
        if !self.is_animating {
            return;
        }

        let (has_new_frame, completed_a_loop) = {
            let store = match &self.frame_store {
                Some(store) => store,
                None => return,
            };
            if store.is_finished() {
                self.is_animating = false;
                if let Some(done) = self.animation_complete.take() {
                    done();
                }
                return;
            }
            let mut changed = false;
            store.should_change_frame(elapsed_seconds, |has_new| changed = has_new);
            // the final wrap is reported via the completion callback on the
            // next tick, not as a loop
            (changed, changed && store.is_loop_finished() && !store.is_finished())
        };

        if !has_new_frame {
            return;
        }
        if let Some(view) = self.delegate.upgrade() {
            view.animator_has_new_frame();
        }
        if completed_a_loop {
            if let Some(on_loop) = &mut self.loop_complete {
                on_loop();
            }
        }
    }

    /// The current frame's bitmap, or `None` while it is still a
    /// placeholder.
    pub fn active_frame(&self) -> Option<Bitmap> {
        self.frame_store.as_ref().and_then(FrameStore::current_frame_image)
    }

    pub fn frame_count(&self) -> usize {
        self.frame_store.as_ref().map_or(0, FrameStore::frame_count)
    }

    /// Total effective duration of one animation loop.
    pub fn loop_duration(&self) -> f64 {
        self.frame_store.as_ref().map_or(0.0, FrameStore::loop_duration)
    }

    /// The store being driven, if any.
    pub fn frame_store(&self) -> Option<&FrameStore> {
        self.frame_store.as_ref()
    }

    /// Stop animating and release the frame store entirely, reclaiming all
    /// decoded frames. Used when the hosting view is recycled.
    pub fn prepare_for_reuse(&mut self) {
        self.stop_animating();
        self.frame_store = None;
    }
}
