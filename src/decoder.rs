//! On-demand GIF frame decoding.
//!
//! Wraps the `gif` + `gif-dispose` decode stack behind index-keyed calls.
//! The raw byte buffer is owned here for the lifetime of the store so that
//! evicted frames can always be decoded again.

use crate::error::{CatResult, Error};
use imgref::ImgVec;
use log::debug;
use rgb::RGBA8;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Duration reported for a frame that carries no usable delay metadata.
const DEFAULT_FRAME_DURATION: f64 = 0.0;

/// Delays below this are "as fast as possible" in the wild; renderers
/// conventionally substitute 100ms to avoid unwatchable flicker.
const MIN_DELAY_THRESHOLD: f64 = 0.02 - f64::EPSILON;

pub struct FrameDecoder {
    data: Arc<[u8]>,
    is_gif: bool,
    durations: Vec<f64>,
    loop_count: i32,
    replay: Mutex<Option<Replay>>,
}

/// A cursor-positioned streaming decoder. GIF frames compose onto the
/// previous screen state, so random access behind the cursor means
/// reopening the buffer and blitting forward from frame 0.
struct Replay {
    decoder: gif::Decoder<Cursor<Arc<[u8]>>>,
    screen: gif_dispose::Screen,
    /// Index of the next frame the decoder will produce.
    next_index: usize,
}

impl Replay {
    fn open(data: &Arc<[u8]>) -> CatResult<Self> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::Indexed);
        let decoder = options.read_info(Cursor::new(Arc::clone(data)))?;
        let screen = gif_dispose::Screen::new_decoder(&decoder);
        Ok(Replay { decoder, screen, next_index: 0 })
    }
}

impl FrameDecoder {
    /// Parses the container index: frame count, per-frame durations and the
    /// loop count, without decoding any pixel data. Partial or malformed
    /// data is tolerated; whatever parsed stays usable.
    pub fn new(data: Vec<u8>) -> Self {
        let data: Arc<[u8]> = data.into();
        let is_gif = data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a");

        let mut durations = Vec::new();
        if is_gif {
            match Replay::open(&data) {
                Ok(mut replay) => loop {
                    match replay.decoder.next_frame_info() {
                        Ok(Some(frame)) => durations.push(frame_duration_from_delay(frame.delay)),
                        Ok(None) => break,
                        Err(err) => {
                            debug!("GIF frame index ends early: {}", err);
                            break;
                        }
                    }
                },
                Err(err) => debug!("not a decodable GIF container: {}", err),
            }
        }

        let loop_count = if is_gif { netscape_loop_count(&data) } else { 0 };
        FrameDecoder {
            data,
            is_gif,
            durations,
            loop_count,
            replay: Mutex::new(None),
        }
    }

    /// Total frame count from the container index.
    pub fn frame_count(&self) -> usize {
        self.durations.len()
    }

    /// True iff the bytes carry the GIF signature and more than one frame.
    /// A single-frame GIF is a still image, not an animation.
    pub fn is_animated_gif(&self) -> bool {
        self.is_gif && self.durations.len() > 1
    }

    /// Display duration of a frame in seconds. Out of range reads yield the
    /// module default of 0.
    pub fn frame_duration(&self, index: usize) -> f64 {
        self.durations.get(index).copied().unwrap_or(DEFAULT_FRAME_DURATION)
    }

    /// Loop count from the NETSCAPE application extension; 0 means "loop
    /// forever" per GIF convention. Informational: an explicit caller value
    /// on the frame store takes precedence.
    pub fn loop_count(&self) -> i32 {
        self.loop_count
    }

    /// Decodes frame `index` fully into an RGBA bitmap.
    ///
    /// Returns `None` for out-of-range indices and for malformed frame
    /// data; a bad frame is skipped, never fatal.
    pub fn decode_frame(&self, index: usize) -> Option<ImgVec<RGBA8>> {
        if index >= self.durations.len() {
            return None;
        }
        let mut replay = lock(&self.replay);
        match self.frame_at(&mut replay, index) {
            Ok(image) => Some(image),
            Err(err) => {
                debug!("failed to decode GIF frame {}: {}", index, err);
                // Start from a clean decoder on the next request.
                *replay = None;
                None
            }
        }
    }

    fn frame_at(&self, slot: &mut Option<Replay>, index: usize) -> CatResult<ImgVec<RGBA8>> {
        let replay = match slot {
            // `next_index == index + 1` means the screen already shows this
            // frame; re-reading it must not rewind to frame 0
            Some(replay) if replay.next_index <= index + 1 => replay,
            stale => stale.insert(Replay::open(&self.data)?),
        };
        while replay.next_index <= index {
            match replay.decoder.read_next_frame()? {
                Some(frame) => {
                    replay
                        .screen
                        .blit_frame(frame)
                        .map_err(|err| Error::Dispose(err.to_string()))?;
                    replay.next_index += 1;
                }
                None => return Err(Error::TruncatedData(index)),
            }
        }
        Ok(replay.screen.pixels().map_buf(|buf| buf.to_owned()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The wire format has a single delay field in 10ms units; surface it as
/// both the unclamped and clamped variants.
fn frame_duration_from_delay(delay: u16) -> f64 {
    let seconds = f64::from(delay) / 100.0;
    frame_duration(seconds, seconds)
}

/// Picks the first of [unclamped, clamped] delay that is present (negative
/// values signal an absent property), capped to a displayable duration.
/// Both absent yields the module default of 0.
pub(crate) fn frame_duration(unclamped_delay: f64, clamped_delay: f64) -> f64 {
    match [unclamped_delay, clamped_delay].iter().copied().find(|&d| d >= 0.0) {
        Some(delay) => cap_duration(delay),
        None => DEFAULT_FRAME_DURATION,
    }
}

fn cap_duration(duration: f64) -> f64 {
    if duration < MIN_DELAY_THRESHOLD {
        0.1
    } else {
        duration
    }
}

/// Reads the repetition count (0 = forever) from the NETSCAPE2.0
/// application extension: `0x21 0xFF 0x0B "NETSCAPE2.0"` followed by a
/// `0x03 0x01 <u16 le>` sub-block.
fn netscape_loop_count(data: &[u8]) -> i32 {
    parse_netscape_extension(data).unwrap_or(0)
}

/// Walks the block structure from the logical screen descriptor up to the
/// first image separator. The extension only ever precedes image data, so
/// the walk never mistakes compressed pixel bytes for a block header.
fn parse_netscape_extension(data: &[u8]) -> Option<i32> {
    let descriptor = data.get(6..13)?;
    let mut pos = 13;
    // skip the global color table when the flag says one follows
    let flags = descriptor[4];
    if flags & 0x80 != 0 {
        pos += 3 * (2usize << (flags & 0x07));
    }
    loop {
        match *data.get(pos)? {
            0x21 => {
                let label = *data.get(pos + 1)?;
                pos += 2;
                if label == 0xFF {
                    let header = data.get(pos..pos + 12)?;
                    if header[0] == 0x0B && &header[1..12] == b"NETSCAPE2.0" {
                        let block = data.get(pos + 12..pos + 17)?;
                        if block[0] == 0x03 && block[1] == 0x01 {
                            return Some(i32::from(u16::from_le_bytes([block[2], block[3]])));
                        }
                    }
                }
                pos = skip_sub_blocks(data, pos)?;
            }
            // image separator or trailer: no extension is coming anymore
            _ => return None,
        }
    }
}

fn skip_sub_blocks(data: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let len = usize::from(*data.get(pos)?);
        pos += 1;
        if len == 0 {
            return Some(pos);
        }
        pos += len;
    }
}

/// Builds an in-memory GIF for tests: `frame_count` solid frames with the
/// given delay (in 10ms units).
#[cfg(test)]
pub(crate) fn encode_test_gif(
    frame_count: usize,
    delay: u16,
    width: u16,
    height: u16,
    repeat: Option<gif::Repeat>,
) -> Vec<u8> {
    let mut data = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut data, width, height, &[]).unwrap();
        if let Some(repeat) = repeat {
            encoder
                .write_extension(gif::ExtensionData::Repetitions(repeat))
                .unwrap();
        }
        for i in 0..frame_count {
            let mut frame = gif::Frame::default();
            frame.width = width;
            frame.height = height;
            frame.delay = delay;
            frame.palette = Some(vec![(i % 256) as u8, 10, 20, 0, 255, 0]);
            frame.buffer = vec![0; usize::from(width) * usize::from(height)].into();
            encoder.write_frame(&frame).unwrap();
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_prefers_first_present_delay() {
        assert!((frame_duration(-1.0, 0.05) - 0.05).abs() < 1e-9);
        assert!((frame_duration(0.3, 0.05) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn duration_defaults_to_zero_when_absent() {
        assert_eq!(frame_duration(-1.0, -1.0), 0.0);
    }

    #[test]
    fn near_zero_delay_is_capped() {
        assert!((frame_duration(0.01, 0.01) - 0.1).abs() < 1e-9);
        assert!((frame_duration(0.0, 0.0) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn counts_frames_and_durations() {
        let decoder = FrameDecoder::new(encode_test_gif(4, 5, 2, 2, None));
        assert_eq!(decoder.frame_count(), 4);
        assert!(decoder.is_animated_gif());
        for i in 0..4 {
            assert!((decoder.frame_duration(i) - 0.05).abs() < 1e-9);
        }
        assert_eq!(decoder.frame_duration(99), 0.0);
    }

    #[test]
    fn single_frame_gif_is_not_animated() {
        let decoder = FrameDecoder::new(encode_test_gif(1, 5, 2, 2, None));
        assert_eq!(decoder.frame_count(), 1);
        assert!(!decoder.is_animated_gif());
    }

    #[test]
    fn garbage_bytes_are_not_animated() {
        let decoder = FrameDecoder::new(b"definitely not a gif".to_vec());
        assert!(!decoder.is_animated_gif());
        assert_eq!(decoder.frame_count(), 0);
        assert!(decoder.decode_frame(0).is_none());
    }

    #[test]
    fn loop_count_from_netscape_extension() {
        let finite = FrameDecoder::new(encode_test_gif(2, 5, 2, 2, Some(gif::Repeat::Finite(3))));
        assert_eq!(finite.loop_count(), 3);

        let infinite = FrameDecoder::new(encode_test_gif(2, 5, 2, 2, Some(gif::Repeat::Infinite)));
        assert_eq!(infinite.loop_count(), 0);

        let absent = FrameDecoder::new(encode_test_gif(2, 5, 2, 2, None));
        assert_eq!(absent.loop_count(), 0);
    }

    #[test]
    fn loop_count_ignores_marker_bytes_outside_the_extension_blocks() {
        // the byte pattern of the extension, placed after the image data,
        // must not be mistaken for a loop count
        let mut data = encode_test_gif(2, 5, 2, 2, None);
        data.extend_from_slice(&[0x21, 0xFF, 0x0B]);
        data.extend_from_slice(b"NETSCAPE2.0");
        data.extend_from_slice(&[0x03, 0x01, 0x07, 0x00]);

        let decoder = FrameDecoder::new(data);
        assert_eq!(decoder.loop_count(), 0);
    }

    #[test]
    fn decodes_frames_in_any_order() {
        let decoder = FrameDecoder::new(encode_test_gif(6, 5, 3, 2, None));

        let forward = decoder.decode_frame(4).expect("frame 4");
        assert_eq!((forward.width(), forward.height()), (3, 2));

        // behind the cursor: forces a rewind
        let rewound = decoder.decode_frame(1).expect("frame 1");
        assert_eq!((rewound.width(), rewound.height()), (3, 2));

        assert!(decoder.decode_frame(6).is_none());
    }

    #[test]
    fn repeated_decode_of_the_current_frame_reuses_the_screen() {
        let decoder = FrameDecoder::new(encode_test_gif(5, 5, 2, 2, None));

        let first = decoder.decode_frame(3).expect("frame 3");
        let again = decoder.decode_frame(3).expect("frame 3 again");
        assert!(again.pixels().all(|px| px == RGBA8::new(3, 10, 20, 255)));
        assert_eq!(first.buf(), again.buf());

        // the cursor still advances correctly afterwards
        let next = decoder.decode_frame(4).expect("frame 4");
        assert!(next.pixels().all(|px| px == RGBA8::new(4, 10, 20, 255)));
    }

    #[test]
    fn frame_pixels_come_from_the_palette() {
        let decoder = FrameDecoder::new(encode_test_gif(3, 5, 2, 2, None));
        let frame = decoder.decode_frame(2).expect("frame 2");
        // every frame is filled with palette entry 0 of its local palette
        assert!(frame.pixels().all(|px| px == RGBA8::new(2, 10, 20, 255)));
    }
}
