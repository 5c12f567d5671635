//! Test doubles for the backend, device and scheduler seams.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::direct::{DeviceFormat, DeviceHandle, DirectDevice};
use crate::error::{AudioError, Result};
use crate::playback::{CallbackFlow, OutputStream, StreamFeed, StreamFormat, StreamingBackend};
use crate::scheduler::{Scheduler, WorkId};

#[derive(Debug, Default)]
pub struct StreamLog {
    pub opened: Vec<StreamFormat>,
    pub played: Vec<i16>,
    pub started: usize,
    pub aborted: usize,
    pub closed: usize,
}

/// Streaming backend that plays into memory.
///
/// With `drain_on_start` the whole feed is consumed when the stream starts,
/// as if the device buffered everything at once; otherwise the feed never
/// moves, like a stalled device.
pub struct FakeStreaming {
    pub max_channels: u16,
    pub drain_on_start: bool,
    pub latency: Duration,
    /// When set, only streams with exactly this many channels open.
    pub accepted_channels: Option<u16>,
    pub open_error: Option<AudioError>,
    pub log: Arc<Mutex<StreamLog>>,
}

impl FakeStreaming {
    pub fn new(max_channels: u16) -> Self {
        Self {
            max_channels,
            drain_on_start: true,
            latency: Duration::ZERO,
            accepted_channels: None,
            open_error: None,
            log: Arc::default(),
        }
    }
}

impl StreamingBackend for FakeStreaming {
    fn max_output_channels(&mut self) -> Result<u16> {
        Ok(self.max_channels)
    }

    fn open(&mut self, format: StreamFormat, feed: Arc<StreamFeed>) -> Result<Box<dyn OutputStream>> {
        if let Some(err) = self.open_error.take() {
            return Err(err);
        }
        if let Some(accepted) = self.accepted_channels {
            if format.channels != accepted {
                return Err(AudioError::ChannelsRejected {
                    requested: format.channels,
                    offered: accepted,
                });
            }
        }
        self.log.lock().unwrap().opened.push(format);
        feed.record_latency(self.latency);
        Ok(Box::new(FakeStream {
            feed,
            channels: format.channels as usize,
            drain: self.drain_on_start,
            log: self.log.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

struct FakeStream {
    feed: Arc<StreamFeed>,
    channels: usize,
    drain: bool,
    log: Arc<Mutex<StreamLog>>,
}

impl OutputStream for FakeStream {
    fn start(&mut self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.started += 1;
        if !self.drain {
            return Ok(());
        }
        let mut period = vec![0i16; 256 * self.channels];
        loop {
            let before = self.feed.frames_sent();
            if self.feed.fill(&mut period, 0, |s| s) == CallbackFlow::Complete {
                break;
            }
            let fresh = (self.feed.frames_sent() - before) * self.channels;
            log.played.extend_from_slice(&period[..fresh]);
        }
        Ok(())
    }

    fn output_latency(&self) -> Duration {
        self.feed.latency()
    }

    fn abort(&mut self) {
        self.feed.interrupt();
        self.log.lock().unwrap().aborted += 1;
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.log.lock().unwrap().closed += 1;
    }
}

#[derive(Debug, Default)]
pub struct DeviceLog {
    pub opened: Vec<DeviceFormat>,
    pub written: Vec<i16>,
    pub writes: usize,
    pub drains: usize,
    pub resets: usize,
    pub closed: usize,
}

/// Direct device that records what is written to it.
pub struct MemoryDevice {
    /// Format the device insists on; `None` grants whatever is asked.
    pub granted: Option<DeviceFormat>,
    /// Fail the write with this index (0-based).
    pub fail_on_write: Option<usize>,
    pub open_error: Option<AudioError>,
    pub log: Arc<Mutex<DeviceLog>>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self {
            granted: None,
            fail_on_write: None,
            open_error: None,
            log: Arc::default(),
        }
    }
}

impl DirectDevice for MemoryDevice {
    fn open(&mut self, format: DeviceFormat) -> Result<Box<dyn DeviceHandle>> {
        if let Some(err) = self.open_error.take() {
            return Err(err);
        }
        self.log.lock().unwrap().opened.push(format);
        Ok(Box::new(MemoryHandle {
            format: self.granted.unwrap_or(format),
            fail_on_write: self.fail_on_write,
            log: self.log.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryHandle {
    format: DeviceFormat,
    fail_on_write: Option<usize>,
    log: Arc<Mutex<DeviceLog>>,
}

impl DeviceHandle for MemoryHandle {
    fn format(&self) -> DeviceFormat {
        self.format
    }

    fn write(&mut self, samples: &[i16]) -> io::Result<()> {
        let mut log = self.log.lock().unwrap();
        if self.fail_on_write == Some(log.writes) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device went away"));
        }
        log.writes += 1;
        log.written.extend_from_slice(samples);
        Ok(())
    }

    fn drain(&mut self) -> io::Result<()> {
        self.log.lock().unwrap().drains += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.log.lock().unwrap().resets += 1;
    }

    fn position(&self) -> Option<usize> {
        let written = self.log.lock().unwrap().written.len();
        Some(written / self.format.channels.max(1) as usize)
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        self.log.lock().unwrap().closed += 1;
    }
}

#[derive(Debug, Default)]
pub struct SchedulerLog {
    pub added: usize,
    pub removed: usize,
    pub active: Option<WorkId>,
}

/// Scheduler that only counts registrations.
#[derive(Default)]
pub struct CountingScheduler {
    next_id: u64,
    pub log: Arc<Mutex<SchedulerLog>>,
}

impl Scheduler for CountingScheduler {
    fn add_work(&mut self) -> WorkId {
        self.next_id += 1;
        let id = WorkId(self.next_id);
        let mut log = self.log.lock().unwrap();
        log.added += 1;
        log.active = Some(id);
        id
    }

    fn remove_work(&mut self, id: WorkId) {
        let mut log = self.log.lock().unwrap();
        log.removed += 1;
        if log.active == Some(id) {
            log.active = None;
        }
    }
}
