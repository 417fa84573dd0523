//! Two node ping-pong
//!
//! Node A and node B bounce a fixed payload back and forth: every received
//! frame is answered right away, and every thousandth reception toggles an
//! indicator.

use crate::bus::{Can, CanConfigurable, ConfigurationError, TransmitError};
use crate::config::{BitTiming, DataSize, MailboxConfig, Mode};
use crate::reg::Registers;
use embedded_can::StandardId;
use embedded_hal::digital::v2::ToggleableOutputPin;
use flexcan_core::{CanId, Dependencies};
use fugit::RateExtU32;

/// Payload sent by both nodes
pub const PAYLOAD: [u8; 8] = [0xA5, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77];

/// Receptions between indicator toggles
pub const TOGGLE_EVERY: u32 = 1000;

/// Transceiver delay compensation offset used in FD mode
pub const TRANSCEIVER_DELAY_OFFSET: u8 = 5;

/// Identifier node A listens to
pub const NODE_A_ID: StandardId = match StandardId::new(0x511) {
    Some(id) => id,
    None => StandardId::ZERO,
};

/// Identifier node B listens to
pub const NODE_B_ID: StandardId = match StandardId::new(0x555) {
    Some(id) => id,
    None => StandardId::ZERO,
};

/// Which end of the exchange this node is
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Starts the exchange
    NodeA,
    /// Answers node A
    NodeB,
}

impl Role {
    /// Identifier of the frames this node accepts
    pub fn rx_id(self) -> StandardId {
        match self {
            Self::NodeA => NODE_A_ID,
            Self::NodeB => NODE_B_ID,
        }
    }

    /// Identifier of the frames this node sends
    pub fn tx_id(self) -> StandardId {
        match self {
            Self::NodeA => NODE_B_ID,
            Self::NodeB => NODE_A_ID,
        }
    }
}

/// Classic CAN at 500 kbit/s, 16 time quanta per bit
pub fn classic_timing() -> BitTiming {
    BitTiming::new(500.kHz())
}

/// FD arbitration phase at 500 kbit/s, 80 time quanta per bit
pub fn fd_nominal_timing() -> BitTiming {
    BitTiming {
        sjw: 16,
        prop_seg: 47,
        phase_seg_1: 16,
        phase_seg_2: 16,
        bitrate: 500.kHz(),
    }
}

/// FD data phase at 2 Mbit/s, 20 time quanta per bit
pub fn fd_data_timing() -> BitTiming {
    BitTiming {
        sjw: 4,
        prop_seg: 7,
        phase_seg_1: 8,
        phase_seg_2: 4,
        bitrate: 2.MHz(),
    }
}

/// CAN FD with bit rate switching and 64 byte message buffers
pub fn fd_mode() -> Mode {
    Mode::Fd {
        allow_bit_rate_switching: true,
        data_phase_timing: fd_data_timing(),
        data_size: DataSize::Bytes64,
        transceiver_delay_compensation: Some(TRANSCEIVER_DELAY_OFFSET),
    }
}

/// Frame format of the exchange
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Variant {
    /// 8 byte classic frames
    Classic,
    /// 64 byte FD frames with bit rate switching
    Fd,
}

/// Configure `can` for `role` and start it. Buffer 0 transmits, buffer 4
/// receives.
pub fn initialize<Id, D, R>(
    role: Role,
    variant: Variant,
    mut can: CanConfigurable<Id, D, R>,
) -> Result<Can<Id, D, R>, ConfigurationError>
where
    Id: CanId,
    D: Dependencies<Id>,
    R: Registers,
{
    let config = can.config();
    match variant {
        Variant::Classic => {
            config.mode = Mode::Classic;
            config.nominal_timing = classic_timing();
        }
        Variant::Fd => {
            config.mode = fd_mode();
            config.nominal_timing = fd_nominal_timing();
        }
    }
    config.mailboxes = MailboxConfig {
        tx: 0,
        rx: 4,
        rx_id: role.rx_id(),
    };
    can.finalize()
}

/// Failure while running the exchange
#[derive(Debug, PartialEq, Eq)]
pub enum NodeError<E> {
    /// The reply could not be queued
    Transmit(TransmitError),
    /// The indicator could not be toggled
    Indicator(E),
}

/// One participant of the exchange
pub struct Node<Id, D, R, L> {
    can: Can<Id, D, R>,
    role: Role,
    indicator: L,
    received: u32,
    reply_pending: bool,
}

impl<Id, D, R, L> Node<Id, D, R, L>
where
    Id: CanId,
    D: Dependencies<Id>,
    R: Registers,
    L: ToggleableOutputPin,
{
    /// `can` must be set up with [`initialize`] for the same `role`.
    pub fn new(role: Role, can: Can<Id, D, R>, indicator: L) -> Self {
        Self {
            can,
            role,
            indicator,
            received: 0,
            reply_pending: false,
        }
    }

    /// Send the first frame. Only node A does so; node B waits.
    pub fn start(&mut self) -> nb::Result<(), NodeError<L::Error>> {
        match self.role {
            Role::NodeA => self.send(),
            Role::NodeB => Ok(()),
        }
    }

    /// Handle at most one received frame.
    ///
    /// Returns `true` if a frame was received. A reply that finds the
    /// transmit buffer busy is retried on the next call.
    pub fn poll(&mut self) -> Result<bool, NodeError<L::Error>> {
        if self.reply_pending {
            self.reply()?;
        }

        // The content is not inspected; any frame passing the filter counts
        match self.can.receive() {
            Ok(_) => {}
            Err(nb::Error::WouldBlock) => return Ok(false),
            Err(nb::Error::Other(never)) => match never {},
        }

        self.received = self.received.wrapping_add(1);
        if self.received % TOGGLE_EVERY == 0 {
            #[cfg(feature = "defmt")]
            defmt::debug!("{} frames received, toggling indicator", self.received);
            self.indicator.toggle().map_err(NodeError::Indicator)?;
        }

        self.reply_pending = true;
        self.reply()?;
        Ok(true)
    }

    /// Frames received so far
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Give back the bus and the indicator
    pub fn free(self) -> (Can<Id, D, R>, L) {
        (self.can, self.indicator)
    }

    fn reply(&mut self) -> Result<(), NodeError<L::Error>> {
        match self.send() {
            Ok(()) => {
                self.reply_pending = false;
                Ok(())
            }
            Err(nb::Error::WouldBlock) => Ok(()),
            Err(nb::Error::Other(e)) => Err(e),
        }
    }

    fn send(&mut self) -> nb::Result<(), NodeError<L::Error>> {
        let id = self.role.tx_id();
        let sent = if self.can.config().mode.is_fd() {
            let mut payload = [0; 64];
            payload[..PAYLOAD.len()].copy_from_slice(&PAYLOAD);
            self.can.transmit_payload(id, &payload)
        } else {
            self.can.transmit_payload(id, &PAYLOAD)
        };
        sent.map_err(|e| e.map(NodeError::Transmit))
    }
}

#[cfg(test)]
mod tests;
