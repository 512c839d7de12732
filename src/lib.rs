//! Dashboard / body-control-module settings bridge.
//!
//! Translates between a vehicle BCM's bit-packed diagnostic CAN frames and
//! the simplified settings frames an aftermarket dashboard understands. The
//! heart of the crate is a scripted request/response sequencing engine that
//! drives "enter session -> read/write parameter -> exit session" exchanges
//! on two independent command channels, recovering from lost or stray frames
//! purely by timeout.

pub mod bitfield;
pub mod clock;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod frame;
pub mod sequencer;
pub mod settings;
pub mod transport;


pub use coordinator::SettingsCoordinator;
pub use error::{BridgeError, Result};
pub use frame::CanFrame;
pub use sequencer::{Channel, SequenceKind, SequenceStep, Sequencer};
pub use settings::SettingsState;
