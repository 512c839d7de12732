//! Settings coordinator
//!
//! Owns the eight sequencers (four handshake variants on each of the two
//! command channels), arbitrates which may run, feeds inbound frames to
//! them, folds recognized diagnostic payloads into the settings cache, and
//! turns dashboard control edges into update sequences. Everything happens
//! synchronously inside `on_frame` and `tick`; the host loop provides the
//! clock.

use tracing::{debug, info};

use crate::bitfield;
use crate::constants::{channels, dash, params, timing};
use crate::frame::CanFrame;
use crate::sequencer::{Channel, SequenceKind, Sequencer};
use crate::settings::{self, SettingsState};

/// The four sequencers of one channel. Only one may be mid-handshake at a
/// time; every trigger goes through the group so the check cannot be
/// bypassed.
struct ChannelGroup {
    init: Sequencer,
    retrieve: Sequencer,
    update: Sequencer,
    reset: Sequencer,
}

impl ChannelGroup {
    fn new(channel: Channel) -> Self {
        Self {
            init: Sequencer::new(channel, SequenceKind::Init),
            retrieve: Sequencer::new(channel, SequenceKind::Retrieve),
            update: Sequencer::new(channel, SequenceKind::Update { action: 0, value: 0 }),
            reset: Sequencer::new(channel, SequenceKind::Reset),
        }
    }

    fn ready(&self) -> bool {
        self.init.ready() && self.retrieve.ready() && self.update.ready() && self.reset.ready()
    }

    fn handle_incoming(&mut self, frame: &CanFrame, now_ms: u64) {
        self.init.handle_incoming(frame, now_ms);
        self.retrieve.handle_incoming(frame, now_ms);
        self.update.handle_incoming(frame, now_ms);
        self.reset.handle_incoming(frame, now_ms);
    }

    fn poll_outgoing(&mut self, now_ms: u64, out: &mut Vec<CanFrame>) {
        out.extend(self.init.poll_outgoing(now_ms));
        out.extend(self.retrieve.poll_outgoing(now_ms));
        out.extend(self.update.poll_outgoing(now_ms));
        out.extend(self.reset.poll_outgoing(now_ms));
    }

    fn trigger_update(&mut self, action: u8, value: u8, now_ms: u64) -> bool {
        if !self.ready() {
            debug!("update 0x{:02X} ignored, channel busy", action);
            return false;
        }
        self.update.set_payload(action, value);
        self.update.trigger(now_ms)
    }
}

pub struct SettingsCoordinator {
    group_e: ChannelGroup,
    group_f: ChannelGroup,
    state: SettingsState,
    last_control: [u8; 8],
    /// Set when a recognized diagnostic payload updated the cache; the next
    /// tick broadcasts the state frame
    state_available: bool,
    last_emit_ms: u64,
    started: bool,
    announced_ready: bool,
}

impl SettingsCoordinator {
    pub fn new() -> Self {
        Self {
            group_e: ChannelGroup::new(Channel::E),
            group_f: ChannelGroup::new(Channel::F),
            state: SettingsState::default(),
            last_control: [0u8; 8],
            state_available: false,
            last_emit_ms: 0,
            started: false,
            announced_ready: false,
        }
    }

    /// Kick off the vendor init handshake on both channels.
    pub fn start(&mut self, now_ms: u64) {
        info!("Starting BCM init on both channels");
        self.group_e.init.trigger(now_ms);
        self.group_f.init.trigger(now_ms);
        self.started = true;
        self.announced_ready = false;
    }

    /// True when no sequence is in flight on either channel.
    pub fn ready(&self) -> bool {
        self.group_e.ready() && self.group_f.ready()
    }

    /// Snapshot of the settings cache.
    pub fn settings(&self) -> SettingsState {
        self.state
    }

    /// Feed one inbound frame: protocol bookkeeping for the matching
    /// channel's sequencers, diagnostic-payload decode for the cache, and
    /// control-vector handling for the dashboard.
    pub fn on_frame(&mut self, frame: &CanFrame, now_ms: u64) {
        match frame.id {
            channels::RESPONSE_E => {
                self.group_e.handle_incoming(frame, now_ms);
                self.decode_channel_e(&frame.data);
            }
            channels::RESPONSE_F => {
                self.group_f.handle_incoming(frame, now_ms);
                self.decode_channel_f(&frame.data);
            }
            dash::SETTINGS_CONTROL => self.on_control(frame.data, now_ms),
            _ => {}
        }
    }

    /// Produce this cycle's outgoing frames: pending sequencer requests plus
    /// the settings-state broadcast when the cache changed or the heartbeat
    /// interval lapsed.
    pub fn tick(&mut self, now_ms: u64) -> Vec<CanFrame> {
        let mut out = Vec::new();
        self.group_e.poll_outgoing(now_ms, &mut out);
        self.group_f.poll_outgoing(now_ms, &mut out);

        if self.started && !self.announced_ready && self.ready() {
            info!("BCM settings subsystem ready");
            self.announced_ready = true;
        }

        if self.state_available
            || now_ms.saturating_sub(self.last_emit_ms) >= timing::STATE_HEARTBEAT_MS
        {
            out.push(self.state.to_frame());
            self.state_available = false;
            self.last_emit_ms = now_ms;
        }

        out
    }

    /// Diff the dashboard's control vector against the previous one and act
    /// on every flipped bit. The new vector is stored verbatim either way,
    /// so only edges are ever reacted to.
    pub fn on_control(&mut self, vector: [u8; 8], now_ms: u64) {
        let prev = self.last_control;
        self.last_control = vector;

        let edge = |byte: usize, bit: u8| bitfield::bits_differ(&prev, &vector, byte, bit);

        if edge(0, 0) {
            self.write_bool(
                Channel::E,
                params::INTERIOR_ILLUMINATION,
                !self.state.auto_interior_illumination,
                now_ms,
            );
        }
        if edge(0, 1) {
            self.write_bool(
                Channel::E,
                params::SEAT_SLIDE,
                !self.state.slide_driver_seat,
                now_ms,
            );
        }
        if edge(0, 2) {
            self.write_bool(
                Channel::E,
                params::SPEED_SENSING_WIPER,
                !self.state.speed_sensing_wiper,
                now_ms,
            );
        }

        if edge(1, 0) {
            self.step_sensitivity(1, now_ms);
        }
        if edge(1, 1) {
            self.step_sensitivity(-1, now_ms);
        }
        if edge(1, 4) {
            let next = self.state.headlight_off_delay.next();
            self.write_off_delay(next, now_ms);
        }
        if edge(1, 5) {
            let prev_delay = self.state.headlight_off_delay.prev();
            self.write_off_delay(prev_delay, now_ms);
        }

        if edge(2, 0) {
            self.write_bool(
                Channel::F,
                params::SELECTIVE_UNLOCK,
                !self.state.selective_door_unlock,
                now_ms,
            );
        }
        if edge(2, 4) {
            let next = self.state.auto_relock_time.next();
            self.write_relock(next, now_ms);
        }
        if edge(2, 5) {
            let prev_time = self.state.auto_relock_time.prev();
            self.write_relock(prev_time, now_ms);
        }

        if edge(3, 0) {
            self.write_bool(
                Channel::F,
                params::KEY_RESPONSE_HORN,
                !self.state.remote_key_horn,
                now_ms,
            );
        }
        if edge(3, 2) {
            let next = self.state.remote_key_lights.next();
            self.write_lights(next, now_ms);
        }
        if edge(3, 3) {
            let prev_lights = self.state.remote_key_lights.prev();
            self.write_lights(prev_lights, now_ms);
        }

        if edge(7, 0) {
            self.request_settings(now_ms);
        }
        if edge(7, 7) {
            self.factory_reset(now_ms);
        }
    }

    // ------------------------------------------------------------------
    // Control actions
    // ------------------------------------------------------------------

    fn write_bool(&mut self, channel: Channel, action: u8, target: bool, now_ms: u64) {
        let value = settings::bool_to_code(target);
        self.group_mut(channel).trigger_update(action, value, now_ms);
    }

    fn step_sensitivity(&mut self, direction: i8, now_ms: u64) {
        let current = self.state.headlight_sensitivity;
        let target = match direction {
            1 if current < SettingsState::SENSITIVITY_MAX => current + 1,
            -1 if current > 0 => current - 1,
            // Already at the boundary: no frame, no state change
            _ => return,
        };
        self.group_e.trigger_update(
            params::HEADLIGHT_SENSITIVITY,
            settings::sensitivity_to_code(target),
            now_ms,
        );
    }

    fn write_off_delay(&mut self, target: Option<settings::OffDelay>, now_ms: u64) {
        if let Some(delay) = target {
            self.group_e.trigger_update(
                params::HEADLIGHT_OFF_DELAY,
                settings::off_delay_to_code(delay),
                now_ms,
            );
        }
    }

    fn write_relock(&mut self, target: Option<settings::RelockTime>, now_ms: u64) {
        if let Some(time) = target {
            self.group_f.trigger_update(
                params::AUTO_RELOCK_TIME,
                settings::relock_to_code(time),
                now_ms,
            );
        }
    }

    fn write_lights(&mut self, target: Option<settings::KeyLights>, now_ms: u64) {
        if let Some(lights) = target {
            self.group_f
                .trigger_update(params::KEY_RESPONSE_LIGHTS, lights.ordinal(), now_ms);
        }
    }

    /// Pull current values on both channels. Joint operation: unless both
    /// channels are free, neither is triggered.
    fn request_settings(&mut self, now_ms: u64) {
        if !(self.group_e.ready() && self.group_f.ready()) {
            debug!("settings request ignored, a channel is busy");
            return;
        }
        self.group_e.retrieve.trigger(now_ms);
        self.group_f.retrieve.trigger(now_ms);
    }

    /// Restore factory defaults on both channels, jointly like the retrieve.
    fn factory_reset(&mut self, now_ms: u64) {
        if !(self.group_e.ready() && self.group_f.ready()) {
            debug!("factory reset ignored, a channel is busy");
            return;
        }
        info!("Factory reset requested");
        self.group_e.reset.trigger(now_ms);
        self.group_f.reset.trigger(now_ms);
    }

    fn group_mut(&mut self, channel: Channel) -> &mut ChannelGroup {
        match channel {
            Channel::E => &mut self.group_e,
            Channel::F => &mut self.group_f,
        }
    }

    // ------------------------------------------------------------------
    // Diagnostic payload decode
    // ------------------------------------------------------------------

    fn decode_channel_e(&mut self, data: &[u8; 8]) {
        if data[0] == 0x10 && data[2] == 0x61 && data[3] == 0x01 {
            self.state.apply_retrieve_first(data);
        } else if data[0] == 0x21 {
            self.state.apply_retrieve_consecutive_1(data);
        } else if data[0] == 0x22 {
            self.state.apply_retrieve_consecutive_2(data);
        } else {
            return;
        }
        self.state_available = true;
    }

    fn decode_channel_f(&mut self, data: &[u8; 8]) {
        if data[0] & 0xF0 == 0x00 && data[1] == 0x61 && data[2] == 0x01 {
            self.state.apply_retrieve_single(data);
            self.state_available = true;
        }
    }
}

impl Default for SettingsCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal BCM stand-in answering every request with defaults.
    fn reply(req: &CanFrame) -> Vec<CanFrame> {
        let resp_id = match req.id {
            0x71E => 0x72E,
            0x71F => 0x72F,
            _ => return vec![],
        };
        let pad = |prefix: &[u8]| {
            let mut data = [0xFFu8; 8];
            data[..prefix.len()].copy_from_slice(prefix);
            CanFrame::new(resp_id, data)
        };
        let d = &req.data;

        if d[..3] == [0x02, 0x10, 0xC0] {
            vec![pad(&[0x02, 0x50, 0xC0])]
        } else if d[..3] == [0x02, 0x10, 0x81] {
            vec![pad(&[0x02, 0x50, 0x81])]
        } else if d[..2] == [0x02, 0x3B] {
            vec![pad(&[0x06, 0x7B, d[2]])]
        } else if d[..2] == [0x03, 0x3B] {
            vec![pad(&[0x02, 0x7B, d[2]])]
        } else if d[..3] == [0x02, 0x21, 0x01] {
            if req.id == 0x71E {
                vec![CanFrame::new(resp_id, [0x10, 0x15, 0x61, 0x01, 0, 0, 0, 0])]
            } else {
                vec![CanFrame::new(resp_id, [0x06, 0x61, 0x01, 0, 0, 0xFF, 0xFF, 0xFF])]
            }
        } else if d[..3] == [0x30, 0x00, 0x0A] {
            vec![
                CanFrame::new(resp_id, [0x21, 0, 0, 0, 0, 0, 0, 0]),
                CanFrame::new(resp_id, [0x22, 0, 0, 0, 0, 0, 0, 0]),
            ]
        } else {
            vec![]
        }
    }

    fn pump(coordinator: &mut SettingsCoordinator, now: u64) -> Vec<CanFrame> {
        let mut sent = Vec::new();
        for _ in 0..24 {
            let frames = coordinator.tick(now);
            if frames.iter().all(|f| f.id == 0x5700) && !sent.is_empty() {
                break;
            }
            for frame in frames {
                for response in reply(&frame) {
                    coordinator.on_frame(&response, now);
                }
                sent.push(frame);
            }
        }
        sent
    }

    fn ready_coordinator(now: u64) -> SettingsCoordinator {
        let mut coordinator = SettingsCoordinator::new();
        coordinator.start(now);
        pump(&mut coordinator, now);
        assert!(coordinator.ready());
        coordinator
    }

    fn requests_to(frames: &[CanFrame], id: u16) -> usize {
        frames.iter().filter(|f| f.id == id).count()
    }

    #[test]
    fn test_startup_runs_init_on_both_channels() {
        let mut coordinator = SettingsCoordinator::new();
        coordinator.start(0);
        let sent = pump(&mut coordinator, 0);

        // Full script on E, short script on F
        assert_eq!(requests_to(&sent, 0x71E), 6);
        assert_eq!(requests_to(&sent, 0x71F), 3);
        assert!(coordinator.ready());
    }

    #[test]
    fn test_control_edges_are_flip_triggered() {
        let mut coordinator = ready_coordinator(0);

        let mut vector = [0u8; 8];
        vector[0] = 0x01;
        coordinator.on_control(vector, 10);
        assert!(!coordinator.ready(), "edge must start an update");

        pump(&mut coordinator, 10);
        assert!(coordinator.ready());

        // Same vector again: no edge, nothing triggered
        coordinator.on_control(vector, 20);
        assert!(coordinator.ready());

        // Clearing the bit is a flip too
        coordinator.on_control([0u8; 8], 30);
        assert!(!coordinator.ready());
    }

    #[test]
    fn test_busy_channel_blocks_second_trigger() {
        let mut coordinator = ready_coordinator(0);

        let mut vector = [0u8; 8];
        vector[0] = 0x01;
        coordinator.on_control(vector, 10);
        let first = coordinator.tick(10);
        assert_eq!(requests_to(&first, 0x71E), 1);

        // Another E-group control while the update is in flight
        vector[0] = 0x05;
        coordinator.on_control(vector, 11);
        let second = coordinator.tick(11);
        assert_eq!(requests_to(&second, 0x71E), 0, "update already sent its frame");

        // F stays untouched and available throughout
        assert!(coordinator.group_f.ready());
    }

    #[test]
    fn test_update_on_e_never_touches_f() {
        let mut coordinator = ready_coordinator(0);

        let mut vector = [0u8; 8];
        vector[0] = 0x04; // wiper toggle, channel E
        coordinator.on_control(vector, 10);
        let sent = pump(&mut coordinator, 10);

        assert!(requests_to(&sent, 0x71E) > 0);
        assert_eq!(requests_to(&sent, 0x71F), 0);
    }

    #[test]
    fn test_joint_retrieve_needs_both_channels_free() {
        let mut coordinator = ready_coordinator(0);

        // Occupy channel F with an update
        let mut vector = [0u8; 8];
        vector[2] = 0x01;
        coordinator.on_control(vector, 10);
        assert!(!coordinator.group_f.ready());

        // Request-settings bit: F is busy, so E must not start either
        vector[7] = 0x01;
        coordinator.on_control(vector, 11);
        assert!(coordinator.group_e.ready());
    }

    #[test]
    fn test_recognized_payload_sets_state_and_emits() {
        let mut coordinator = ready_coordinator(0);

        let payload = CanFrame::new(0x72E, [0x10, 0x15, 0x61, 0x01, 0x01, 0, 0, 0]);
        coordinator.on_frame(&payload, 50);

        assert!(coordinator.settings().auto_interior_illumination);
        let frames = coordinator.tick(50);
        assert_eq!(requests_to(&frames, 0x5700), 1);

        // Flag cleared: next tick inside the heartbeat window emits nothing
        let frames = coordinator.tick(60);
        assert_eq!(requests_to(&frames, 0x5700), 0);
    }

    #[test]
    fn test_heartbeat_reemits_unchanged_state() {
        let mut coordinator = ready_coordinator(0);

        let first = coordinator.tick(1000);
        assert_eq!(requests_to(&first, 0x5700), 1);

        let quiet = coordinator.tick(1500);
        assert_eq!(requests_to(&quiet, 0x5700), 0);

        let again = coordinator.tick(2000);
        assert_eq!(requests_to(&again, 0x5700), 1);
    }

    #[test]
    fn test_clamped_ordinal_is_silent_noop() {
        let mut coordinator = ready_coordinator(0);
        assert_eq!(coordinator.settings().headlight_sensitivity, 0);

        // Decrease at minimum: nothing may go out
        let mut vector = [0u8; 8];
        vector[1] = 0x02;
        coordinator.on_control(vector, 10);
        assert!(coordinator.ready());
        let sent = coordinator.tick(10);
        assert_eq!(requests_to(&sent, 0x71E), 0);
        assert_eq!(requests_to(&sent, 0x71F), 0);
    }
}
