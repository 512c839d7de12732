//! Settings state model
//!
//! The authoritative cache of user-visible BCM settings, the conversion
//! tables between the vehicle's diagnostic byte encodings and the
//! dashboard's simplified bitfield, and the clamped next/prev helpers for
//! ordinal settings. The cache is only ever written from recognized
//! diagnostic response payloads, so it tracks what the BCM actually stores
//! rather than what was last requested.

use serde::{Deserialize, Serialize};

use crate::bitfield;
use crate::constants::dash;
use crate::frame::CanFrame;

/// Auto-headlight off delay after ignition off.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffDelay {
    Immediate,
    Sec30,
    #[default]
    Sec45,
    Sec60,
    Sec90,
    Sec120,
    Sec150,
    Sec180,
}

impl OffDelay {
    pub const MAX: u8 = 7;

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(n: u8) -> Self {
        use OffDelay::*;
        match n {
            0 => Immediate,
            1 => Sec30,
            2 => Sec45,
            3 => Sec60,
            4 => Sec90,
            5 => Sec120,
            6 => Sec150,
            _ => Sec180,
        }
    }

    pub fn seconds(self) -> u16 {
        [0, 30, 45, 60, 90, 120, 150, 180][self.ordinal() as usize]
    }

    pub fn next(self) -> Option<Self> {
        (self.ordinal() < Self::MAX).then(|| Self::from_ordinal(self.ordinal() + 1))
    }

    pub fn prev(self) -> Option<Self> {
        (self.ordinal() > 0).then(|| Self::from_ordinal(self.ordinal() - 1))
    }
}

/// Delay before doors re-lock after an unlock with no door opened.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelockTime {
    #[default]
    Sec30,
    Min1,
    Min5,
}

impl RelockTime {
    pub const MAX: u8 = 2;

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(n: u8) -> Self {
        match n {
            0 => RelockTime::Sec30,
            1 => RelockTime::Min1,
            _ => RelockTime::Min5,
        }
    }

    pub fn next(self) -> Option<Self> {
        (self.ordinal() < Self::MAX).then(|| Self::from_ordinal(self.ordinal() + 1))
    }

    pub fn prev(self) -> Option<Self> {
        (self.ordinal() > 0).then(|| Self::from_ordinal(self.ordinal() - 1))
    }
}

/// Exterior-light flash response to remote key lock/unlock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyLights {
    #[default]
    Off,
    UnlockOnly,
    LockOnly,
    LockAndUnlock,
}

impl KeyLights {
    pub const MAX: u8 = 3;

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(n: u8) -> Self {
        use KeyLights::*;
        match n {
            0 => Off,
            1 => UnlockOnly,
            2 => LockOnly,
            _ => LockAndUnlock,
        }
    }

    pub fn next(self) -> Option<Self> {
        (self.ordinal() < Self::MAX).then(|| Self::from_ordinal(self.ordinal() + 1))
    }

    pub fn prev(self) -> Option<Self> {
        (self.ordinal() > 0).then(|| Self::from_ordinal(self.ordinal() - 1))
    }
}

// ============================================================================
// VEHICLE CODE TABLES
// ============================================================================

/// The BCM's 2-bit sensitivity code is not the user scale; the permutation
/// happens to be its own inverse.
const SENSITIVITY_USER_FROM_CODE: [u8; 4] = [1, 0, 2, 3];

/// Off-delay vehicle codes by ordinal. Non-contiguous: the 30-second slot
/// was appended to the code space after the others.
const OFF_DELAY_CODE_BY_ORDINAL: [u8; 8] = [0x00, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x01];

/// Re-lock vehicle codes by ordinal (1 minute is the BCM's code zero).
const RELOCK_CODE_BY_ORDINAL: [u8; 3] = [0x01, 0x00, 0x02];

pub fn sensitivity_to_user(code: u8) -> u8 {
    SENSITIVITY_USER_FROM_CODE[(code & 0x03) as usize]
}

pub fn sensitivity_to_code(user: u8) -> u8 {
    // Self-inverse permutation
    SENSITIVITY_USER_FROM_CODE[(user & 0x03) as usize]
}

pub fn off_delay_to_code(delay: OffDelay) -> u8 {
    OFF_DELAY_CODE_BY_ORDINAL[delay.ordinal() as usize]
}

pub fn off_delay_from_code(code: u8) -> OffDelay {
    let ordinal = OFF_DELAY_CODE_BY_ORDINAL
        .iter()
        .position(|&c| c == code)
        .unwrap_or(0);
    OffDelay::from_ordinal(ordinal as u8)
}

pub fn relock_to_code(time: RelockTime) -> u8 {
    RELOCK_CODE_BY_ORDINAL[time.ordinal() as usize]
}

pub fn relock_from_code(code: u8) -> RelockTime {
    let ordinal = RELOCK_CODE_BY_ORDINAL
        .iter()
        .position(|&c| c == code)
        .unwrap_or(0);
    RelockTime::from_ordinal(ordinal as u8)
}

pub fn bool_to_code(value: bool) -> u8 {
    value as u8
}

// ============================================================================
// SETTINGS CACHE
// ============================================================================

/// Cached user-visible settings, compact enough to broadcast in one frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsState {
    pub auto_interior_illumination: bool,
    /// 0 (least sensitive) ..= 3 (most sensitive)
    pub headlight_sensitivity: u8,
    pub headlight_off_delay: OffDelay,
    pub speed_sensing_wiper: bool,
    pub slide_driver_seat: bool,
    pub selective_door_unlock: bool,
    pub auto_relock_time: RelockTime,
    pub remote_key_horn: bool,
    pub remote_key_lights: KeyLights,
}

impl SettingsState {
    pub const SENSITIVITY_MAX: u8 = 3;

    /// First frame of the channel E retrieve answer (`10 .. 61 01 ..`).
    pub fn apply_retrieve_first(&mut self, data: &[u8; 8]) {
        self.auto_interior_illumination = bitfield::get_bit(data, 4, 0);
    }

    /// First consecutive frame of the channel E retrieve answer (`21 ..`).
    pub fn apply_retrieve_consecutive_1(&mut self, data: &[u8; 8]) {
        self.headlight_sensitivity = sensitivity_to_user(data[1] & 0x03);
        self.headlight_off_delay = off_delay_from_code((data[1] >> 4) & 0x07);
    }

    /// Second consecutive frame of the channel E retrieve answer (`22 ..`).
    pub fn apply_retrieve_consecutive_2(&mut self, data: &[u8; 8]) {
        self.speed_sensing_wiper = bitfield::get_bit(data, 1, 0);
        self.slide_driver_seat = bitfield::get_bit(data, 1, 1);
    }

    /// Single-frame channel F retrieve answer (`0x 61 01 ..`).
    pub fn apply_retrieve_single(&mut self, data: &[u8; 8]) {
        self.selective_door_unlock = bitfield::get_bit(data, 3, 0);
        self.auto_relock_time = relock_from_code((data[3] >> 2) & 0x03);
        self.remote_key_horn = bitfield::get_bit(data, 4, 0);
        self.remote_key_lights = KeyLights::from_ordinal((data[4] >> 2) & 0x03);
    }

    /// Encode as the dashboard settings-state frame.
    pub fn to_frame(&self) -> CanFrame {
        let mut data = [0u8; 8];

        bitfield::set_bit(&mut data, 0, 0, self.auto_interior_illumination);
        bitfield::set_bit(&mut data, 0, 1, self.slide_driver_seat);
        bitfield::set_bit(&mut data, 0, 2, self.speed_sensing_wiper);

        data[1] = (self.headlight_sensitivity & 0x03)
            | ((self.headlight_off_delay.ordinal() & 0x0F) << 4);

        bitfield::set_bit(&mut data, 2, 0, self.selective_door_unlock);
        data[2] |= (self.auto_relock_time.ordinal() & 0x0F) << 4;

        bitfield::set_bit(&mut data, 3, 0, self.remote_key_horn);
        data[3] |= (self.remote_key_lights.ordinal() & 0x03) << 2;

        CanFrame::new(dash::SETTINGS_STATE, data)
    }
}
