//! # Event Channel
//!
//! Probes append events to a bounded multi-producer ring. A failed
//! reservation loses that one event only: [`Emitter`] counts the drop and the
//! probe keeps going.

use crate::event::WireEvent;

/// The ring had no room for the event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelExhausted;

/// Append-only destination for wire events
pub trait EventSink {
    /// # Errors
    /// [`ChannelExhausted`] when the event could not be reserved.
    fn output<E: WireEvent>(&mut self, event: &E) -> Result<(), ChannelExhausted>;
}

/// Wraps a sink and keeps per-invocation delivery counts
pub struct Emitter<'a, S: EventSink> {
    sink: &'a mut S,
    emitted: u32,
    dropped: u32,
}

impl<'a, S: EventSink> Emitter<'a, S> {
    pub fn new(sink: &'a mut S) -> Self {
        Self { sink, emitted: 0, dropped: 0 }
    }

    /// Send one event; a full channel only bumps the drop counter
    pub fn emit<E: WireEvent>(&mut self, event: &E) {
        match self.sink.output(event) {
            Ok(()) => self.emitted += 1,
            Err(ChannelExhausted) => self.dropped += 1,
        }
    }

    #[must_use]
    pub fn emitted(&self) -> u32 {
        self.emitted
    }

    #[must_use]
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}
