//! Scripted request/response sequencing engine
//!
//! One `Sequencer` drives one handshake variant (init, retrieve, update,
//! reset) on one command channel: open the diagnostic session, walk a fixed
//! script of request frames, close the session. The BCM never acknowledges
//! beyond frame content, so progress is made only when an inbound frame
//! matches the expected response prefix for the current step; anything else
//! is ignored and a hard per-step timeout abandons the sequence back to
//! `Ready`.

use tracing::debug;

use crate::constants::{channels, params, prefixes, timing};
use crate::frame::CanFrame;

/// One of the two independent BCM command channels. Each is a fixed
/// request/response CAN ID pair; nothing is shared between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    E,
    F,
}

impl Channel {
    pub fn request_id(self) -> u16 {
        match self {
            Channel::E => channels::REQUEST_E,
            Channel::F => channels::REQUEST_F,
        }
    }

    pub fn response_id(self) -> u16 {
        match self {
            Channel::E => channels::RESPONSE_E,
            Channel::F => channels::RESPONSE_F,
        }
    }
}

/// Handshake variant. `Update` carries the parameter code and the raw
/// vehicle-side value to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    Init,
    Retrieve,
    Update { action: u8, value: u8 },
    Reset,
}

/// One named state in a sequencer script. Every step except `Ready` has
/// exactly one request frame and one expected response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStep {
    /// Idle; the only state `trigger` starts from and the only terminal one
    Ready,
    Enter,
    Exit,
    Init00,
    Init20,
    Init40,
    Init60,
    /// Parameter write (`Update`) or factory reset (`Reset`)
    Action,
    FactoryReset,
    /// Parameter read; channel E answers multi-frame
    RetrievePrimary,
    /// Flow request consuming the two consecutive answer frames (channel E)
    RetrieveSecondary,
    /// Single-frame parameter read (channel F)
    RetrieveAlt,
}

/// Per-variant transition table. `secondary_seen` is how many of the two
/// consecutive retrieve answers have already been consumed.
pub fn next_step(
    kind: SequenceKind,
    channel: Channel,
    step: SequenceStep,
    secondary_seen: u8,
) -> SequenceStep {
    use SequenceStep::*;

    match step {
        Ready => Ready,
        Enter => match kind {
            SequenceKind::Init => Init00,
            SequenceKind::Retrieve => retrieve_entry(channel),
            SequenceKind::Update { .. } => Action,
            SequenceKind::Reset => FactoryReset,
        },
        // Channel F's init script is shorter; the vendor sequence skips the
        // upper three blocks on that channel
        Init00 => match channel {
            Channel::E => Init20,
            Channel::F => Exit,
        },
        Init20 => Init40,
        Init40 => Init60,
        Init60 => Exit,
        // Every write is followed by a full retrieve so the cache converges
        // on the value the BCM actually stored
        Action | FactoryReset => retrieve_entry(channel),
        RetrievePrimary => RetrieveSecondary,
        RetrieveSecondary => {
            if secondary_seen >= 2 {
                Exit
            } else {
                RetrieveSecondary
            }
        }
        RetrieveAlt => Exit,
        Exit => Ready,
    }
}

fn retrieve_entry(channel: Channel) -> SequenceStep {
    match channel {
        Channel::E => SequenceStep::RetrievePrimary,
        Channel::F => SequenceStep::RetrieveAlt,
    }
}

/// Request payload for a step: fixed prefix, `0xFF` fill.
fn request_payload(step: SequenceStep, kind: SequenceKind) -> Option<[u8; 8]> {
    use SequenceStep::*;

    let mut data = [prefixes::PAD; 8];
    match step {
        Ready => return None,
        Enter => data[..3].copy_from_slice(&prefixes::ENTER_REQUEST),
        Exit => data[..3].copy_from_slice(&prefixes::EXIT_REQUEST),
        Init00 | Init20 | Init40 | Init60 => {
            let code = match step {
                Init00 => prefixes::INIT_CODES[0],
                Init20 => prefixes::INIT_CODES[1],
                Init40 => prefixes::INIT_CODES[2],
                _ => prefixes::INIT_CODES[3],
            };
            data[..3].copy_from_slice(&[0x02, prefixes::WRITE_SERVICE, code]);
        }
        Action => match kind {
            SequenceKind::Update { action, value } => {
                data[..4].copy_from_slice(&[0x03, prefixes::WRITE_SERVICE, action, value]);
            }
            _ => return None,
        },
        FactoryReset => {
            data[..4].copy_from_slice(&[0x03, prefixes::WRITE_SERVICE, params::FACTORY_RESET, 0x00]);
        }
        RetrievePrimary | RetrieveAlt => data[..3].copy_from_slice(&prefixes::RETRIEVE_REQUEST),
        RetrieveSecondary => data[..3].copy_from_slice(&prefixes::RETRIEVE_CONTINUE),
    }
    Some(data)
}

/// Whether a response payload matches the step's expected prefix. The
/// tables are fixed per step, independent of channel.
fn response_matches(
    step: SequenceStep,
    kind: SequenceKind,
    secondary_seen: u8,
    data: &[u8; 8],
) -> bool {
    use SequenceStep::*;

    match step {
        Ready => false,
        Enter => data[..3] == prefixes::ENTER_RESPONSE,
        Exit => data[..3] == prefixes::EXIT_RESPONSE,
        Init00 => init_response(data, prefixes::INIT_CODES[0]),
        Init20 => init_response(data, prefixes::INIT_CODES[1]),
        Init40 => init_response(data, prefixes::INIT_CODES[2]),
        Init60 => init_response(data, prefixes::INIT_CODES[3]),
        Action => match kind {
            SequenceKind::Update { action, .. } => {
                data[..3] == [0x02, prefixes::WRITE_RESPONSE_SERVICE, action]
            }
            _ => false,
        },
        FactoryReset => {
            data[..3] == [0x02, prefixes::WRITE_RESPONSE_SERVICE, params::FACTORY_RESET]
        }
        RetrievePrimary => {
            data[0] == prefixes::RETRIEVE_FIRST
                && data[2] == prefixes::RETRIEVE_SERVICE
                && data[3] == prefixes::RETRIEVE_LOCAL_ID
        }
        RetrieveSecondary => {
            let expected = if secondary_seen == 0 {
                prefixes::RETRIEVE_CONSECUTIVE_1
            } else {
                prefixes::RETRIEVE_CONSECUTIVE_2
            };
            data[0] == expected
        }
        // Single frame: length nibble in byte 0, service echo behind it
        RetrieveAlt => {
            data[0] & 0xF0 == 0x00
                && data[1] == prefixes::RETRIEVE_SERVICE
                && data[2] == prefixes::RETRIEVE_LOCAL_ID
        }
    }
}

fn init_response(data: &[u8; 8], code: u8) -> bool {
    data[..3] == [0x06, prefixes::WRITE_RESPONSE_SERVICE, code]
}

/// A single scripted-exchange state machine: one channel, one variant, at
/// most one handshake in flight.
pub struct Sequencer {
    channel: Channel,
    kind: SequenceKind,
    step: SequenceStep,
    step_started_ms: u64,
    frame_sent: bool,
    secondary_seen: u8,
    timeout_ms: u64,
}

impl Sequencer {
    pub fn new(channel: Channel, kind: SequenceKind) -> Self {
        Self {
            channel,
            kind,
            step: SequenceStep::Ready,
            step_started_ms: 0,
            frame_sent: false,
            secondary_seen: 0,
            timeout_ms: timing::SEQUENCE_TIMEOUT_MS,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn step(&self) -> SequenceStep {
        self.step
    }

    pub fn ready(&self) -> bool {
        self.step == SequenceStep::Ready
    }

    /// Configure the write an update sequencer will perform. Ignored for
    /// other variants.
    pub fn set_payload(&mut self, action: u8, value: u8) {
        if matches!(self.kind, SequenceKind::Update { .. }) {
            self.kind = SequenceKind::Update { action, value };
        }
    }

    /// Start the handshake. Returns false without side effects unless the
    /// sequencer is idle.
    pub fn trigger(&mut self, now_ms: u64) -> bool {
        if !self.ready() {
            return false;
        }
        debug!(
            "{:?}/{:?}: sequence started",
            self.channel, self.kind
        );
        self.step = SequenceStep::Enter;
        self.step_started_ms = now_ms;
        self.frame_sent = false;
        self.secondary_seen = 0;
        true
    }

    /// Produce the current step's request frame, once per step. A step that
    /// has outlived the timeout abandons the whole sequence instead.
    pub fn poll_outgoing(&mut self, now_ms: u64) -> Option<CanFrame> {
        if self.step == SequenceStep::Ready {
            return None;
        }

        if now_ms.saturating_sub(self.step_started_ms) >= self.timeout_ms {
            debug!(
                "{:?}/{:?}: timed out in {:?}, abandoning",
                self.channel, self.kind, self.step
            );
            self.reset();
            return None;
        }

        if self.frame_sent {
            return None;
        }

        let payload = request_payload(self.step, self.kind)?;
        self.frame_sent = true;
        Some(CanFrame::new(self.channel.request_id(), payload))
    }

    /// Feed one inbound frame. Non-matching frames are silently ignored;
    /// unrelated bus traffic must never destabilize a handshake.
    pub fn handle_incoming(&mut self, frame: &CanFrame, now_ms: u64) {
        if self.step == SequenceStep::Ready || frame.id != self.channel.response_id() {
            return;
        }
        if !response_matches(self.step, self.kind, self.secondary_seen, &frame.data) {
            return;
        }

        if self.step == SequenceStep::RetrieveSecondary {
            self.secondary_seen += 1;
        }

        let next = next_step(self.kind, self.channel, self.step, self.secondary_seen);
        if next != self.step {
            debug!(
                "{:?}/{:?}: {:?} -> {:?}",
                self.channel, self.kind, self.step, next
            );
            self.step = next;
            self.frame_sent = false;
            self.step_started_ms = now_ms;
            if next != SequenceStep::RetrieveSecondary {
                self.secondary_seen = 0;
            }
        }
    }

    fn reset(&mut self) {
        self.step = SequenceStep::Ready;
        self.frame_sent = false;
        self.secondary_seen = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(prefix: &[u8]) -> [u8; 8] {
        let mut data = [0xFFu8; 8];
        data[..prefix.len()].copy_from_slice(prefix);
        data
    }

    fn respond(seq: &mut Sequencer, id: u16, payload: [u8; 8], now: u64) {
        seq.handle_incoming(&CanFrame::new(id, payload), now);
    }

    #[test]
    fn test_trigger_only_from_ready() {
        let mut seq = Sequencer::new(Channel::E, SequenceKind::Init);

        assert!(seq.ready());
        assert!(seq.trigger(0));
        assert!(!seq.ready());
        assert!(!seq.trigger(1));
        assert_eq!(seq.step(), SequenceStep::Enter);
    }

    #[test]
    fn test_frame_emitted_once_per_step() {
        let mut seq = Sequencer::new(Channel::E, SequenceKind::Init);
        seq.trigger(0);

        let frame = seq.poll_outgoing(1).unwrap();
        assert_eq!(frame.id, 0x71E);
        assert_eq!(frame.data, padded(&[0x02, 0x10, 0xC0]));

        // Same step, no re-send
        assert!(seq.poll_outgoing(2).is_none());
    }

    #[test]
    fn test_init_walks_full_script_on_e() {
        let mut seq = Sequencer::new(Channel::E, SequenceKind::Init);
        seq.trigger(0);

        let exchanges: [([u8; 3], [u8; 3]); 6] = [
            ([0x02, 0x10, 0xC0], [0x02, 0x50, 0xC0]),
            ([0x02, 0x3B, 0x00], [0x06, 0x7B, 0x00]),
            ([0x02, 0x3B, 0x20], [0x06, 0x7B, 0x20]),
            ([0x02, 0x3B, 0x40], [0x06, 0x7B, 0x40]),
            ([0x02, 0x3B, 0x60], [0x06, 0x7B, 0x60]),
            ([0x02, 0x10, 0x81], [0x02, 0x50, 0x81]),
        ];

        for (i, (req, resp)) in exchanges.iter().enumerate() {
            let now = i as u64 * 10;
            let frame = seq.poll_outgoing(now).unwrap();
            assert_eq!(frame.data, padded(req), "request {}", i);
            respond(&mut seq, 0x72E, padded(resp), now + 1);
        }

        assert!(seq.ready());
    }

    #[test]
    fn test_init_is_shorter_on_f() {
        let mut seq = Sequencer::new(Channel::F, SequenceKind::Init);
        seq.trigger(0);

        assert_eq!(seq.poll_outgoing(1).unwrap().data, padded(&[0x02, 0x10, 0xC0]));
        respond(&mut seq, 0x72F, padded(&[0x02, 0x50, 0xC0]), 2);

        assert_eq!(seq.poll_outgoing(3).unwrap().data, padded(&[0x02, 0x3B, 0x00]));
        respond(&mut seq, 0x72F, padded(&[0x06, 0x7B, 0x00]), 4);

        // Straight to exit: no INIT_20/40/60 on this channel
        assert_eq!(seq.poll_outgoing(5).unwrap().data, padded(&[0x02, 0x10, 0x81]));
        respond(&mut seq, 0x72F, padded(&[0x02, 0x50, 0x81]), 6);

        assert!(seq.ready());
    }

    #[test]
    fn test_stray_frames_ignored() {
        let mut seq = Sequencer::new(Channel::E, SequenceKind::Init);
        seq.trigger(0);
        seq.poll_outgoing(1);

        // Wrong ID, right payload
        respond(&mut seq, 0x72F, padded(&[0x02, 0x50, 0xC0]), 2);
        assert_eq!(seq.step(), SequenceStep::Enter);

        // Right ID, wrong payload
        respond(&mut seq, 0x72E, padded(&[0x02, 0x50, 0x81]), 3);
        assert_eq!(seq.step(), SequenceStep::Enter);

        // Unrelated broadcast traffic
        respond(&mut seq, 0x180, [0u8; 8], 4);
        assert_eq!(seq.step(), SequenceStep::Enter);

        // The real response still advances
        respond(&mut seq, 0x72E, padded(&[0x02, 0x50, 0xC0]), 5);
        assert_eq!(seq.step(), SequenceStep::Init00);
    }

    #[test]
    fn test_timeout_abandons_to_ready() {
        let mut seq = Sequencer::new(Channel::E, SequenceKind::Retrieve);
        seq.trigger(100);
        seq.poll_outgoing(101);
        respond(&mut seq, 0x72E, padded(&[0x02, 0x50, 0xC0]), 150);
        assert_eq!(seq.step(), SequenceStep::RetrievePrimary);

        // No response arrives; the timeout window runs out
        assert!(seq.poll_outgoing(150 + 500).is_none());
        assert!(seq.ready());
    }

    #[test]
    fn test_step_timer_restarts_on_advance() {
        let mut seq = Sequencer::new(Channel::F, SequenceKind::Init);
        seq.trigger(0);
        seq.poll_outgoing(1);
        respond(&mut seq, 0x72F, padded(&[0x02, 0x50, 0xC0]), 499);

        // 499ms elapsed overall, but the new step's window starts fresh
        let frame = seq.poll_outgoing(500).unwrap();
        assert_eq!(frame.data, padded(&[0x02, 0x3B, 0x00]));
    }

    #[test]
    fn test_update_retrieves_after_write_on_e() {
        let mut seq = Sequencer::new(Channel::E, SequenceKind::Update { action: 0, value: 0 });
        seq.set_payload(0x13, 0x01);
        seq.trigger(0);

        assert_eq!(seq.poll_outgoing(1).unwrap().data, padded(&[0x02, 0x10, 0xC0]));
        respond(&mut seq, 0x72E, padded(&[0x02, 0x50, 0xC0]), 2);

        assert_eq!(
            seq.poll_outgoing(3).unwrap().data,
            padded(&[0x03, 0x3B, 0x13, 0x01])
        );
        respond(&mut seq, 0x72E, padded(&[0x02, 0x7B, 0x13]), 4);

        assert_eq!(seq.poll_outgoing(5).unwrap().data, padded(&[0x02, 0x21, 0x01]));
        respond(
            &mut seq,
            0x72E,
            [0x10, 0x15, 0x61, 0x01, 0x00, 0x00, 0x00, 0x00],
            6,
        );

        // Flow request, then both consecutive frames before the exit
        assert_eq!(seq.poll_outgoing(7).unwrap().data, padded(&[0x30, 0x00, 0x0A]));
        respond(&mut seq, 0x72E, [0x21, 0x00, 0, 0, 0, 0, 0, 0], 8);
        assert_eq!(seq.step(), SequenceStep::RetrieveSecondary);
        assert!(seq.poll_outgoing(9).is_none(), "no re-send between passes");

        respond(&mut seq, 0x72E, [0x22, 0x00, 0, 0, 0, 0, 0, 0], 10);
        assert_eq!(seq.step(), SequenceStep::Exit);

        assert_eq!(seq.poll_outgoing(11).unwrap().data, padded(&[0x02, 0x10, 0x81]));
        respond(&mut seq, 0x72E, padded(&[0x02, 0x50, 0x81]), 12);
        assert!(seq.ready());
    }

    #[test]
    fn test_secondary_passes_must_arrive_in_order() {
        let mut seq = Sequencer::new(Channel::E, SequenceKind::Retrieve);
        seq.trigger(0);
        seq.poll_outgoing(1);
        respond(&mut seq, 0x72E, padded(&[0x02, 0x50, 0xC0]), 2);
        seq.poll_outgoing(3);
        respond(
            &mut seq,
            0x72E,
            [0x10, 0x15, 0x61, 0x01, 0x00, 0x00, 0x00, 0x00],
            4,
        );
        seq.poll_outgoing(5);

        // Second consecutive frame first: dropped, still waiting for pass one
        respond(&mut seq, 0x72E, [0x22, 0, 0, 0, 0, 0, 0, 0], 6);
        assert_eq!(seq.step(), SequenceStep::RetrieveSecondary);

        respond(&mut seq, 0x72E, [0x21, 0, 0, 0, 0, 0, 0, 0], 7);
        respond(&mut seq, 0x72E, [0x22, 0, 0, 0, 0, 0, 0, 0], 8);
        assert_eq!(seq.step(), SequenceStep::Exit);
    }

    #[test]
    fn test_retrieve_on_f_uses_single_frame_answer() {
        let mut seq = Sequencer::new(Channel::F, SequenceKind::Retrieve);
        seq.trigger(0);
        seq.poll_outgoing(1);
        respond(&mut seq, 0x72F, padded(&[0x02, 0x50, 0xC0]), 2);

        assert_eq!(seq.poll_outgoing(3).unwrap().data, padded(&[0x02, 0x21, 0x01]));
        respond(&mut seq, 0x72F, [0x06, 0x61, 0x01, 0x00, 0x00, 0xFF, 0xFF, 0xFF], 4);
        assert_eq!(seq.step(), SequenceStep::Exit);
    }

    #[test]
    fn test_reset_script_includes_retrieve() {
        let mut seq = Sequencer::new(Channel::F, SequenceKind::Reset);
        seq.trigger(0);
        seq.poll_outgoing(1);
        respond(&mut seq, 0x72F, padded(&[0x02, 0x50, 0xC0]), 2);

        assert_eq!(
            seq.poll_outgoing(3).unwrap().data,
            padded(&[0x03, 0x3B, 0x1F, 0x00])
        );
        respond(&mut seq, 0x72F, padded(&[0x02, 0x7B, 0x1F]), 4);
        assert_eq!(seq.step(), SequenceStep::RetrieveAlt);
    }
}
