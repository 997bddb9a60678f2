//! Decode an animated GIF into a sequence of timed bitmap frames and drive
//! their display in sync with a host rendering clock, while keeping memory
//! bounded: only the current frame and a configurable look-ahead window are
//! held decoded at any time.
//!
//! The crate has three layers:
//!
//! * [`FrameStore`] owns the decoded-frame cache, the playback position and
//!   loop bookkeeping, and a dedicated background worker that preloads and
//!   evicts frames.
//! * [`Animator`] is the playback driver: the host clock ticks it once per
//!   display refresh, and it notifies an [`Animatable`] view when the frame
//!   changes.
//! * [`FrameDecoder`] wraps the `gif` + `gif-dispose` stack and decodes
//!   individual frames on demand from the raw byte buffer.
//!
//! The host is responsible for fetching bytes and for rendering; this crate
//! never draws anything itself.

#[macro_use]
extern crate quick_error;

use imgref::ImgVec;
use rgb::RGBA8;
use std::sync::Arc;

mod error;
pub use crate::error::*;
mod scale;
pub use crate::scale::{ContentMode, Size};
mod decoder;
pub use crate::decoder::FrameDecoder;
mod store;
pub use crate::store::{AnimatedFrame, CachingStrategy, FrameStore, ReadyCallback};
mod animator;
pub use crate::animator::{Animatable, Animator};

/// A fully decoded RGBA frame. Shared so that snapshot reads out of the
/// frame cache never copy pixel data.
pub type Bitmap = Arc<ImgVec<RGBA8>>;

/// Maximum simulated playback progress per tick, in seconds.
///
/// A host that was suspended for a while reports a huge elapsed time on its
/// next tick; clamping it here keeps a multi-second stall from being
/// perceived as "skip to the end of the animation".
pub const MAX_TIME_STEP: f64 = 1.0;

/// Default number of upcoming frames an [`Animator`] keeps decoded.
/// A higher number trades memory for less decode work per loop.
pub const DEFAULT_FRAME_BUFFER_SIZE: usize = 50;
