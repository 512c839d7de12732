//! Centralized constants for BCM settings communication
//!
//! All CAN identifiers, payload prefixes, parameter codes and timing values
//! used by the bridge live here.

// ============================================================================
// CAN IDENTIFIERS
// ============================================================================

/// Diagnostic command channel identifiers
pub mod channels {
    /// Channel E request (tester -> BCM)
    pub const REQUEST_E: u16 = 0x71E;
    /// Channel E response (BCM -> tester)
    pub const RESPONSE_E: u16 = 0x72E;
    /// Channel F request
    pub const REQUEST_F: u16 = 0x71F;
    /// Channel F response
    pub const RESPONSE_F: u16 = 0x72F;
}

/// Dashboard-facing frame identifiers
pub mod dash {
    /// Settings state broadcast (bridge -> dashboard)
    pub const SETTINGS_STATE: u16 = 0x5700;
    /// User control vector (dashboard -> bridge)
    pub const SETTINGS_CONTROL: u16 = 0x5701;
}

// ============================================================================
// DIAGNOSTIC PAYLOAD PREFIXES
// ============================================================================

pub mod prefixes {
    /// Open diagnostic session
    pub const ENTER_REQUEST: [u8; 3] = [0x02, 0x10, 0xC0];
    pub const ENTER_RESPONSE: [u8; 3] = [0x02, 0x50, 0xC0];

    /// Close diagnostic session
    pub const EXIT_REQUEST: [u8; 3] = [0x02, 0x10, 0x81];
    pub const EXIT_RESPONSE: [u8; 3] = [0x02, 0x50, 0x81];

    /// Initialization step sub-codes (request `02 3B nn`, response `06 7B nn`)
    pub const INIT_CODES: [u8; 4] = [0x00, 0x20, 0x40, 0x60];

    /// Parameter read; the BCM answers multi-frame on channel E,
    /// single-frame on channel F
    pub const RETRIEVE_REQUEST: [u8; 3] = [0x02, 0x21, 0x01];

    /// Flow request for the two consecutive retrieve frames on channel E
    pub const RETRIEVE_CONTINUE: [u8; 3] = [0x30, 0x00, 0x0A];

    /// First byte of the multi-frame retrieve answer
    pub const RETRIEVE_FIRST: u8 = 0x10;
    /// First bytes of the two consecutive retrieve frames
    pub const RETRIEVE_CONSECUTIVE_1: u8 = 0x21;
    pub const RETRIEVE_CONSECUTIVE_2: u8 = 0x22;
    /// Service echo inside every retrieve answer
    pub const RETRIEVE_SERVICE: u8 = 0x61;
    pub const RETRIEVE_LOCAL_ID: u8 = 0x01;

    /// Parameter write service and its positive-response service
    pub const WRITE_SERVICE: u8 = 0x3B;
    pub const WRITE_RESPONSE_SERVICE: u8 = 0x7B;

    /// Unused trailing request bytes
    pub const PAD: u8 = 0xFF;
}

// ============================================================================
// BCM PARAMETER CODES (write service 0x3B)
// ============================================================================

pub mod params {
    // Channel E group: lighting / wiper / seat
    pub const INTERIOR_ILLUMINATION: u8 = 0x10;
    pub const HEADLIGHT_SENSITIVITY: u8 = 0x11;
    pub const HEADLIGHT_OFF_DELAY: u8 = 0x12;
    pub const SPEED_SENSING_WIPER: u8 = 0x13;
    pub const SEAT_SLIDE: u8 = 0x14;

    // Channel F group: locking / remote key
    pub const SELECTIVE_UNLOCK: u8 = 0x20;
    pub const AUTO_RELOCK_TIME: u8 = 0x21;
    pub const KEY_RESPONSE_HORN: u8 = 0x22;
    pub const KEY_RESPONSE_LIGHTS: u8 = 0x23;

    /// Restore factory defaults (both channels)
    pub const FACTORY_RESET: u8 = 0x1F;
}

// ============================================================================
// TIMING
// ============================================================================

pub mod timing {
    /// A sequencer step that has not seen its response within this window
    /// abandons the whole sequence back to READY
    pub const SEQUENCE_TIMEOUT_MS: u64 = 500;

    /// The settings state frame is re-broadcast at least this often even
    /// without a change, so late-joining listeners converge
    pub const STATE_HEARTBEAT_MS: u64 = 1000;

    /// Daemon poll period
    pub const TICK_MS: u64 = 10;

    /// Serial cable baud rate in CAN mode
    pub const CAN_MODE_BAUD: u32 = 500_000;
}
