use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::config::{volume_factor, Direction};
use crate::error::AttachError;

/// Fixed sample quantum per pump read, 20ms at the native rate.
pub const SAMPLES_PER_FRAME: usize = 160;

/// Native sample rate of forked audio, signed linear 16-bit.
pub const SAMPLE_RATE: u32 = 8000;

/// Lifecycle of an attached tap as seen by the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    /// Frames are (or may become) available.
    Running,
    /// An external actor requested termination.
    Shutdown,
    /// The channel itself went away; no more frames will ever arrive.
    Done,
}

/// One quantum of signed-linear PCM tagged with its direction and the
/// sample offset since attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub direction: Direction,
    pub offset: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, direction: Direction) -> Self {
        Self {
            samples,
            direction,
            offset: 0,
        }
    }

    pub fn silence(len: usize, direction: Direction, offset: u64) -> Self {
        Self {
            samples: vec![0; len],
            direction,
            offset,
        }
    }

    /// Wire payload: little-endian PCM bytes.
    pub fn payload(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }
}

/// Capture options fixed at attach time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TapOptions {
    /// Drop frames while the owning leg is not bridged.
    pub bridged_only: bool,
    /// Replace direction-filtered frames with silence of equal length.
    pub sync_silence: bool,
}

/// The audio tap a session pulls frames from. Implemented by the
/// in-process [`ChannelTap`] and by test doubles.
///
/// `read_frames`, `status` and `wait` are called from the pump thread;
/// everything else may be called concurrently from control threads.
pub trait FrameSource: Send + Sync {
    /// Activate the tap. Fails if something is already attached.
    fn attach(&self, options: TapOptions) -> Result<(), AttachError>;

    /// Drain whatever is queued for `direction`, chunked to at most
    /// `quantum` samples per frame. Returns an empty list when nothing is
    /// ready; it never blocks.
    fn read_frames(&self, quantum: usize, direction: Direction) -> Vec<AudioFrame>;

    fn status(&self) -> SourceStatus;

    /// Block until new data arrives or the status changes.
    fn wait(&self);

    /// Flip the tap to `Shutdown` and wake any parked reader.
    fn mark_shutdown(&self);

    /// Release the tap. Queued frames are discarded.
    fn detach(&self);

    fn set_volume(&self, read: i32, write: i32);

    fn set_mute(&self, direction: Direction, mute: bool);
}

struct TapState {
    queue: VecDeque<AudioFrame>,
    status: SourceStatus,
    attached: bool,
    options: TapOptions,
    read_factor: i32,
    write_factor: i32,
    mute_read: bool,
    mute_write: bool,
    bridged: bool,
    next_offset: u64,
}

/// Mutex/condvar frame queue bridging a call leg's media path and the
/// session pump. Producers push frames from the channel thread; the pump
/// drains them at its own pace.
pub struct ChannelTap {
    sample_rate: u32,
    inner: Mutex<TapState>,
    trigger: Condvar,
}

impl ChannelTap {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            inner: Mutex::new(TapState {
                queue: VecDeque::new(),
                status: SourceStatus::Running,
                attached: false,
                options: TapOptions::default(),
                read_factor: 0,
                write_factor: 0,
                mute_read: false,
                mute_write: false,
                bridged: false,
                next_offset: 0,
            }),
            trigger: Condvar::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Queue one frame from the media path. Dropped silently when the tap
    /// is unattached, no longer running, or gated by `bridged_only`.
    pub fn push(&self, mut frame: AudioFrame) {
        let mut state = self.inner.lock().unwrap();
        if !state.attached || state.status != SourceStatus::Running {
            return;
        }
        if state.options.bridged_only && !state.bridged {
            return;
        }
        frame.offset = state.next_offset;
        state.next_offset += frame.samples.len() as u64;
        state.queue.push_back(frame);
        self.trigger.notify_all();
    }

    pub fn push_samples(&self, samples: Vec<i16>, direction: Direction) {
        self.push(AudioFrame::new(samples, direction));
    }

    /// Mark the owning leg bridged or unbridged.
    pub fn set_bridged(&self, bridged: bool) {
        self.inner.lock().unwrap().bridged = bridged;
    }

    /// The channel hung up; no more frames will arrive.
    pub fn end_of_stream(&self) {
        let mut state = self.inner.lock().unwrap();
        if state.status == SourceStatus::Running {
            state.status = SourceStatus::Done;
        }
        self.trigger.notify_all();
    }

    fn adjusted(state: &TapState, mut frame: AudioFrame) -> AudioFrame {
        let (factor, mute) = match frame.direction {
            Direction::In => (state.read_factor, state.mute_read),
            Direction::Out => (state.write_factor, state.mute_write),
            // Mixed frames carry both legs; only a full mute silences them.
            Direction::Both => (0, state.mute_read && state.mute_write),
        };
        if mute {
            frame.samples.fill(0);
        } else if factor > 0 {
            for s in &mut frame.samples {
                *s = (i32::from(*s) * factor).clamp(i32::from(i16::MIN), i32::from(i16::MAX))
                    as i16;
            }
        } else if factor < 0 {
            for s in &mut frame.samples {
                *s = (i32::from(*s) / -factor) as i16;
            }
        }
        frame
    }

    fn chunked(frame: AudioFrame, quantum: usize, out: &mut Vec<AudioFrame>) {
        if frame.samples.len() <= quantum {
            out.push(frame);
            return;
        }
        let mut offset = frame.offset;
        for chunk in frame.samples.chunks(quantum) {
            out.push(AudioFrame {
                samples: chunk.to_vec(),
                direction: frame.direction,
                offset,
            });
            offset += chunk.len() as u64;
        }
    }
}

impl FrameSource for ChannelTap {
    fn attach(&self, options: TapOptions) -> Result<(), AttachError> {
        let mut state = self.inner.lock().unwrap();
        if state.attached {
            return Err(AttachError("tap is already attached".into()));
        }
        state.attached = true;
        state.options = options;
        Ok(())
    }

    fn read_frames(&self, quantum: usize, direction: Direction) -> Vec<AudioFrame> {
        let mut state = self.inner.lock().unwrap();
        let mut out = Vec::new();
        while let Some(frame) = state.queue.pop_front() {
            if direction.accepts(frame.direction) {
                let frame = Self::adjusted(&state, frame);
                Self::chunked(frame, quantum, &mut out);
            } else if state.options.sync_silence {
                let silence =
                    AudioFrame::silence(frame.samples.len(), direction, frame.offset);
                Self::chunked(silence, quantum, &mut out);
            }
        }
        out
    }

    fn status(&self) -> SourceStatus {
        self.inner.lock().unwrap().status
    }

    fn wait(&self) {
        let state = self.inner.lock().unwrap();
        if state.queue.is_empty() && state.status == SourceStatus::Running {
            let _unused = self.trigger.wait(state).unwrap();
        }
    }

    fn mark_shutdown(&self) {
        let mut state = self.inner.lock().unwrap();
        if state.status == SourceStatus::Running {
            state.status = SourceStatus::Shutdown;
        }
        self.trigger.notify_all();
    }

    fn detach(&self) {
        let mut state = self.inner.lock().unwrap();
        state.attached = false;
        state.queue.clear();
        if state.status == SourceStatus::Running {
            state.status = SourceStatus::Done;
        }
        self.trigger.notify_all();
    }

    fn set_volume(&self, read: i32, write: i32) {
        let mut state = self.inner.lock().unwrap();
        state.read_factor = volume_factor(read);
        state.write_factor = volume_factor(write);
    }

    fn set_mute(&self, direction: Direction, mute: bool) {
        let mut state = self.inner.lock().unwrap();
        match direction {
            Direction::In => state.mute_read = mute,
            Direction::Out => state.mute_write = mute,
            Direction::Both => {
                state.mute_read = mute;
                state.mute_write = mute;
            }
        }
    }
}
