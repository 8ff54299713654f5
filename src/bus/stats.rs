//! Per-bus traffic counters.

/// Something the bus did with a frame or reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BusEvent {
    FrameReceived,
    Malformed,
    Unaddressed,
    Unhandled,
    ReplyQueued,
    SyncAnswered,
    Overflow { bytes: usize },
}

/// Counters owned by one bus instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    frames_received: u64,
    malformed_frames: u64,
    unaddressed: u64,
    unhandled: u64,
    replies_queued: u64,
    sync_answered: u64,
    bytes_dropped: u64,
}

impl BusStats {
    #[inline]
    pub(crate) fn record(&mut self, event: BusEvent) {
        match event {
            BusEvent::FrameReceived => self.frames_received += 1,
            BusEvent::Malformed => self.malformed_frames += 1,
            BusEvent::Unaddressed => self.unaddressed += 1,
            BusEvent::Unhandled => self.unhandled += 1,
            BusEvent::ReplyQueued => self.replies_queued += 1,
            BusEvent::SyncAnswered => self.sync_answered += 1,
            BusEvent::Overflow { bytes } => self.bytes_dropped += bytes as u64,
        }
    }

    /// Complete frames decoded from the inbound stream
    #[must_use]
    pub const fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Frames or stray bytes dropped by the decoder or the message parser
    #[must_use]
    pub const fn malformed_frames(&self) -> u64 {
        self.malformed_frames
    }

    /// Messages no device claimed
    #[must_use]
    pub const fn unaddressed(&self) -> u64 {
        self.unaddressed
    }

    /// Messages a device reported as not handled
    #[must_use]
    pub const fn unhandled(&self) -> u64 {
        self.unhandled
    }

    /// Replies encoded into the outbound queue
    #[must_use]
    pub const fn replies_queued(&self) -> u64 {
        self.replies_queued
    }

    /// Repeated start markers answered with a sync reply
    #[must_use]
    pub const fn sync_answered(&self) -> u64 {
        self.sync_answered
    }

    /// Reply bytes discarded because the outbound queue was full
    #[must_use]
    pub const fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped
    }
}
