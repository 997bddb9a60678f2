//! Frame store: the ordered frame sequence, the playback position, loop
//! bookkeeping, and a bounded cache of decoded bitmaps maintained by a
//! dedicated background worker.

use crate::decoder::FrameDecoder;
use crate::scale::{self, ContentMode, Size};
use crate::{Bitmap, MAX_TIME_STEP};
use crossbeam_channel::{Receiver, Sender};
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;

/// Look-ahead used for preloading when all frames stay cached.
const CACHE_ALL_LOOKAHEAD: usize = 10;

/// Frame cache policy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CachingStrategy {
    /// Keep only the given number of upcoming frames decoded; the frame
    /// just left behind is evicted back to a placeholder.
    CacheUpcoming(usize),
    /// Never evict. Frames are still preloaded a few at a time.
    CacheAll,
}

/// One frame of the animation: its display duration, and the decoded
/// bitmap while it is resident in the cache.
///
/// A frame without a bitmap is a *placeholder*: its duration is known from
/// the container index, but the pixels are evicted or not yet decoded.
#[derive(Clone, Debug)]
pub struct AnimatedFrame {
    pub image: Option<Bitmap>,
    pub duration: f64,
}

impl AnimatedFrame {
    fn placeholder(duration: f64) -> Self {
        AnimatedFrame { image: None, duration }
    }

    pub fn is_placeholder(&self) -> bool {
        self.image.is_none()
    }
}

/// Invoked exactly once when frame preparation has finished.
pub type ReadyCallback = Box<dyn FnOnce() + Send>;

enum Job {
    Prepare { on_ready: Option<ReadyCallback> },
    Maintain,
}

/// Owns the frames of a single GIF and the playback position within them.
///
/// All decoding and cache maintenance happens on one dedicated background
/// thread per store; ticking (`should_change_frame`) and snapshot reads are
/// safe to call concurrently with it. Dropping the store drops the job
/// queue, and the worker drains and exits; an in-flight decode finishes
/// against state nobody observes anymore.
pub struct FrameStore {
    inner: Arc<Inner>,
    jobs: Sender<Job>,
}

struct Inner {
    decoder: FrameDecoder,
    target_size: Size,
    content_mode: ContentMode,
    caching_strategy: CachingStrategy,
    loop_count: i32,
    should_resize_frames: AtomicBool,
    state: Mutex<Playback>,
}

#[derive(Default)]
struct Playback {
    frames: Vec<AnimatedFrame>,
    current_frame_index: usize,
    previous_frame_index: usize,
    time_since_last_change: f64,
    current_loop: i32,
    is_loop_finished: bool,
    is_finished: bool,
    loop_duration: f64,
}

impl FrameStore {
    /// Parses the container (tolerating partial data) and spawns the
    /// preload worker. Never fails: malformed bytes produce a store that
    /// reports `is_animatable() == false` and advances nothing.
    ///
    /// `loop_count <= 0` means loop forever; `None` defers to the loop
    /// count embedded in the GIF itself.
    pub fn new(
        data: Vec<u8>,
        target_size: Size,
        content_mode: ContentMode,
        caching_strategy: CachingStrategy,
        loop_count: Option<i32>,
    ) -> Self {
        let decoder = FrameDecoder::new(data);
        let loop_count = loop_count.unwrap_or_else(|| decoder.loop_count());
        let inner = Arc::new(Inner {
            decoder,
            target_size,
            content_mode,
            caching_strategy,
            loop_count,
            should_resize_frames: AtomicBool::new(false),
            state: Mutex::new(Playback::default()),
        });

        let (jobs, queue) = crossbeam_channel::unbounded();
        let worker_state = Arc::downgrade(&inner);
        thread::spawn(move || run_worker(worker_state, queue));

        FrameStore { inner, jobs }
    }

    /// Whether decoded frames get scaled to the target size. Set before
    /// `prepare_frames`; the driver forwards its own flag here.
    pub fn set_should_resize_frames(&self, resize: bool) {
        self.inner.should_resize_frames.store(resize, Ordering::Relaxed);
    }

    /// Builds a placeholder record for every frame (durations are read
    /// immediately), eagerly decodes the first `frame_buffer_size + 1`
    /// frames, then invokes `on_ready`. Runs on the background worker;
    /// call at most once per store.
    pub fn prepare_frames(&self, on_ready: Option<ReadyCallback>) {
        let _ = self.jobs.send(Job::Prepare { on_ready });
    }

    pub fn is_animatable(&self) -> bool {
        self.inner.decoder.is_animated_gif()
    }

    pub fn frame_count(&self) -> usize {
        self.inner.decoder.frame_count()
    }

    /// Number of upcoming frames kept decoded ahead of playback.
    pub fn frame_buffer_size(&self) -> usize {
        self.inner.frame_buffer_size()
    }

    /// Requested loop count; `<= 0` is infinite.
    pub fn loop_count(&self) -> i32 {
        self.inner.loop_count
    }

    /// Read-only snapshot of a frame record; `None` when out of bounds.
    /// The bitmap is shared, not copied.
    pub fn frame(&self, index: usize) -> Option<AnimatedFrame> {
        lock(&self.inner.state).frames.get(index).cloned()
    }

    /// Duration of the frame at `index`; `None` when out of bounds.
    pub fn duration(&self, index: usize) -> Option<f64> {
        lock(&self.inner.state).frames.get(index).map(|frame| frame.duration)
    }

    pub fn current_frame_index(&self) -> usize {
        lock(&self.inner.state).current_frame_index
    }

    /// Bitmap of the frame currently due for display, if decoded. A
    /// placeholder here means "no image change this tick", never an error.
    pub fn current_frame_image(&self) -> Option<Bitmap> {
        let state = lock(&self.inner.state);
        state
            .frames
            .get(state.current_frame_index)
            .and_then(|frame| frame.image.clone())
    }

    /// Sum over all frames of `min(duration, MAX_TIME_STEP)`; the effective
    /// play time of one loop.
    pub fn loop_duration(&self) -> f64 {
        lock(&self.inner.state).loop_duration
    }

    /// Index of the loop currently in progress.
    pub fn current_loop(&self) -> i32 {
        lock(&self.inner.state).current_loop
    }

    /// True exactly when playback has just wrapped from the last frame back
    /// to frame 0.
    pub fn is_loop_finished(&self) -> bool {
        lock(&self.inner.state).is_loop_finished
    }

    /// Latched true once the final permitted loop's last frame has been
    /// shown. Never true for an infinite loop count.
    pub fn is_finished(&self) -> bool {
        lock(&self.inner.state).is_finished
    }

    /// The per-tick advance. Accumulates (clamped) elapsed time and moves
    /// to the next frame once the current frame's duration is used up;
    /// `handler` receives whether the frame index changed.
    ///
    /// Advances at most one frame per call even when the accumulated time
    /// spans several frames; the remainder carries over, so slow hosts
    /// visually skip rather than double-advance.
    pub fn should_change_frame<F: FnOnce(bool)>(&self, elapsed_seconds: f64, handler: F) {
        handler(self.advance(elapsed_seconds));
    }

    fn advance(&self, elapsed_seconds: f64) -> bool {
        let advanced = {
            let mut state = lock(&self.inner.state);
            state.time_since_last_change += elapsed_seconds.min(MAX_TIME_STEP);

            let current_duration = state
                .frames
                .get(state.current_frame_index)
                .map_or(f64::INFINITY, |frame| frame.duration);
            if current_duration > state.time_since_last_change {
                false
            } else {
                state.time_since_last_change -= current_duration;

                let frame_count = state.frames.len();
                state.previous_frame_index = state.current_frame_index;
                state.current_frame_index = (state.current_frame_index + 1) % frame_count;

                let wrapped = state.previous_frame_index == frame_count - 1;
                state.is_loop_finished = wrapped;
                if wrapped {
                    if self.inner.loop_count > 0 && state.current_loop == self.inner.loop_count - 1 {
                        // latched; nothing ever clears it
                        state.is_finished = true;
                    }
                    state.current_loop += 1;
                }
                true
            }
        };

        if advanced {
            // Cache maintenance never blocks the tick; passes are processed
            // in trigger order on the single worker.
            let _ = self.jobs.send(Job::Maintain);
        }
        advanced
    }
}

impl Inner {
    fn frame_buffer_size(&self) -> usize {
        match self.caching_strategy {
            CachingStrategy::CacheUpcoming(size) => size,
            CachingStrategy::CacheAll => CACHE_ALL_LOOKAHEAD,
        }
    }

    fn setup_frames(&self) {
        let frame_count = self.decoder.frame_count();

        {
            let frames: Vec<_> = (0..frame_count)
                .map(|index| AnimatedFrame::placeholder(self.decoder.frame_duration(index)))
                .collect();
            let loop_duration = frames.iter().map(|f| f.duration.min(MAX_TIME_STEP)).sum();
            let mut state = lock(&self.state);
            *state = Playback {
                frames,
                loop_duration,
                ..Playback::default()
            };
        }

        let preload = self.frame_buffer_size();
        for index in 0..frame_count {
            if index > preload {
                break;
            }
            self.load_frame_if_needed(index);
        }
    }

    /// Evicts the frame just left behind (bounded caching only) and decodes
    /// every placeholder in the look-ahead window after the current index.
    /// Idempotent; safe to run back-to-back with a stale trigger.
    fn update_frame_cache(&self) {
        let (current, previous, frame_count) = {
            let state = lock(&self.state);
            (
                state.current_frame_index,
                state.previous_frame_index,
                state.frames.len(),
            )
        };
        if frame_count == 0 {
            return;
        }

        if let CachingStrategy::CacheUpcoming(size) = self.caching_strategy {
            if size < frame_count - 1 && previous != current {
                let mut state = lock(&self.state);
                if let Some(frame) = state.frames.get_mut(previous) {
                    frame.image = None;
                }
            }
        }

        if !lock(&self.state).frames.iter().any(AnimatedFrame::is_placeholder) {
            return;
        }

        let lookahead = self.frame_buffer_size().min(frame_count - 1);
        for step in 1..=lookahead {
            self.load_frame_if_needed((current + step) % frame_count);
        }
    }

    /// Decodes and promotes one frame, unless it is already resident.
    /// Decoding happens outside the lock; only the promotion is locked.
    fn load_frame_if_needed(&self, index: usize) {
        let needs_decode = lock(&self.state)
            .frames
            .get(index)
            .map_or(false, AnimatedFrame::is_placeholder);
        if !needs_decode {
            return;
        }

        // A decode failure leaves the placeholder in place; the display
        // keeps showing the previous bitmap.
        let image = match self.decode_and_scale(index) {
            Some(image) => image,
            None => return,
        };

        let mut state = lock(&self.state);
        if let Some(frame) = state.frames.get_mut(index) {
            frame.image = Some(image);
        }
    }

    fn decode_and_scale(&self, index: usize) -> Option<Bitmap> {
        let image = self.decoder.decode_frame(index)?;
        let image = if self.should_resize_frames.load(Ordering::Relaxed) {
            match scale::resize_frame(image, self.target_size, self.content_mode) {
                Ok(scaled) => scaled,
                Err(err) => {
                    warn!("could not resize frame {}: {}", index, err);
                    return None;
                }
            }
        } else {
            image
        };
        Some(Arc::new(image))
    }
}

fn run_worker(store: Weak<Inner>, jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        // The store may be gone by the time a job runs; its effects would
        // never be observed, so just stop.
        let inner = match store.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        match job {
            Job::Prepare { on_ready } => {
                inner.setup_frames();
                if let Some(ready) = on_ready {
                    ready();
                }
            }
            Job::Maintain => inner.update_frame_cache(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
