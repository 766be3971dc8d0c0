use std::collections::VecDeque;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use crate::core::RawFrame;
use crate::hardware::can_interface::{BusTransport, TransportError, TransportResult};

/// One scripted step of a [`MockBus`]
#[derive(Debug, Clone)]
enum Scripted {
    Frame(RawFrame),
    Idle,
    Error(String),
}

/// Scripted CAN transport for testing without hardware
///
/// Plays back injected frames in order. Once the script runs dry the bus
/// either reports `Closed` or, in looping mode, starts over.
#[derive(Debug)]
pub struct MockBus {
    name: String,
    script: VecDeque<Scripted>,
    played: Vec<Scripted>,
    looping: bool,
    interval: Option<Duration>,
}

impl MockBus {
    /// Create a new mock bus
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: VecDeque::new(),
            played: Vec::new(),
            looping: false,
            interval: None,
        }
    }

    /// Restart from the first step instead of closing when exhausted
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Sleep this long before every read, to pace replays like live traffic
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Add a frame to the receive queue
    pub fn inject_frame(&mut self, frame: RawFrame) {
        self.script.push_back(Scripted::Frame(frame));
    }

    /// Add multiple frames to the receive queue
    pub fn inject_frames(&mut self, frames: impl IntoIterator<Item = RawFrame>) {
        for frame in frames {
            self.inject_frame(frame);
        }
    }

    /// A read that returns nothing, like a timeout on a quiet bus
    pub fn inject_idle(&mut self) {
        self.script.push_back(Scripted::Idle);
    }

    /// A failing read
    pub fn inject_error(&mut self, reason: &str) {
        self.script.push_back(Scripted::Error(reason.to_string()));
    }

    /// Steps left before the script runs dry
    pub fn pending(&self) -> usize {
        self.script.len()
    }

    /// Load a candump log (`(time) iface ID#DATA` or bare `ID#DATA` per line)
    pub fn from_candump_file<P: AsRef<Path>>(name: &str, path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file: {:?}", path))?;

        let mut bus = Self::new(name);
        for (line_idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let token = line
                .split_whitespace()
                .find(|t| t.contains('#'))
                .with_context(|| format!("{:?} line {}: no ID#DATA token", path, line_idx + 1))?;
            let frame = RawFrame::parse_candump(token)
                .with_context(|| format!("{:?} line {}", path, line_idx + 1))?;
            bus.inject_frame(frame);
        }

        debug!("Loaded {} replay frames from {:?}", bus.pending(), path);
        Ok(bus)
    }
}

impl BusTransport for MockBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_frame(&mut self) -> TransportResult<Option<RawFrame>> {
        if let Some(interval) = self.interval {
            thread::sleep(interval);
        }

        if self.script.is_empty() && self.looping && !self.played.is_empty() {
            self.script.extend(self.played.drain(..));
        }

        let step = self.script.pop_front().ok_or(TransportError::Closed)?;
        if self.looping {
            self.played.push(step.clone());
        }

        match step {
            Scripted::Frame(frame) => Ok(Some(frame)),
            Scripted::Idle => Ok(None),
            Scripted::Error(reason) => Err(TransportError::Read(reason)),
        }
    }
}
