//! Encrypted LED commands between a master and a slave node
//!
//! A command is a single byte. With encryption on it is placed in the first
//! byte of an otherwise zeroed AES block, encrypted with AES-128-ECB and sent
//! as a 16 byte CAN FD frame. With encryption off the byte is sent as is.

use crate::bus::{Can, CanConfigurable, ConfigurationError, TransmitError};
use crate::config::{DataSize, MailboxConfig, Mode};
use crate::message::{rx, Raw};
use crate::pingpong::{fd_data_timing, fd_nominal_timing, TRANSCEIVER_DELAY_OFFSET};
use crate::reg::Registers;
use core::convert::Infallible;
use embedded_can::StandardId;
use embedded_hal::digital::v2::ToggleableOutputPin;
use flexcan_core::{CanId, Dependencies};

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Block cipher provider, usually a hardware security module holding the keys
pub trait SecurityModule {
    /// Key slot selector
    type Key: Copy;
    /// Failure reported by the module
    type Error;

    /// Encrypt `block` in place (AES-128-ECB)
    fn encrypt_block(&mut self, key: Self::Key, block: &mut [u8; BLOCK_SIZE])
        -> Result<(), Self::Error>;
    /// Decrypt `block` in place (AES-128-ECB)
    fn decrypt_block(&mut self, key: Self::Key, block: &mut [u8; BLOCK_SIZE])
        -> Result<(), Self::Error>;
}

/// Requested LED change
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Toggle LED 0
    Led0Change = 0,
    /// Toggle LED 1
    Led1Change = 1,
}

impl Command {
    /// Decode a command byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Led0Change),
            1 => Some(Self::Led1Change),
            _ => None,
        }
    }

    /// Toggle the LED this command refers to
    pub fn apply<L0, L1, E>(self, led0: &mut L0, led1: &mut L1) -> Result<(), E>
    where
        L0: ToggleableOutputPin<Error = E>,
        L1: ToggleableOutputPin<Error = E>,
    {
        match self {
            Self::Led0Change => led0.toggle(),
            Self::Led1Change => led1.toggle(),
        }
    }
}

/// Side of the exchange
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Sends with ID 1 from buffer 1, receives ID 2 in buffer 0
    Master,
    /// Sends with ID 2 from buffer 0, receives ID 1 in buffer 1
    Slave,
}

const MASTER_ID: StandardId = match StandardId::new(1) {
    Some(id) => id,
    None => StandardId::ZERO,
};
const SLAVE_ID: StandardId = match StandardId::new(2) {
    Some(id) => id,
    None => StandardId::ZERO,
};

impl Role {
    /// Message buffer used for transmission
    pub fn tx_mailbox(self) -> usize {
        match self {
            Self::Master => 1,
            Self::Slave => 0,
        }
    }

    /// Message buffer used for reception
    pub fn rx_mailbox(self) -> usize {
        match self {
            Self::Master => 0,
            Self::Slave => 1,
        }
    }

    /// Identifier of the frames this node sends
    pub fn tx_id(self) -> StandardId {
        match self {
            Self::Master => MASTER_ID,
            Self::Slave => SLAVE_ID,
        }
    }

    /// Identifier of the frames this node accepts
    pub fn rx_id(self) -> StandardId {
        match self {
            Self::Master => SLAVE_ID,
            Self::Slave => MASTER_ID,
        }
    }
}

/// Configure `can` for `role`: CAN FD with bit rate switching, 16 byte
/// message buffers.
pub fn initialize<Id, D, R>(
    role: Role,
    mut can: CanConfigurable<Id, D, R>,
) -> Result<Can<Id, D, R>, ConfigurationError>
where
    Id: CanId,
    D: Dependencies<Id>,
    R: Registers,
{
    let config = can.config();
    config.nominal_timing = fd_nominal_timing();
    config.mode = Mode::Fd {
        allow_bit_rate_switching: true,
        data_phase_timing: fd_data_timing(),
        data_size: DataSize::Bytes16,
        transceiver_delay_compensation: Some(TRANSCEIVER_DELAY_OFFSET),
    };
    config.mailboxes = MailboxConfig {
        tx: role.tx_mailbox(),
        rx: role.rx_mailbox(),
        rx_id: role.rx_id(),
    };
    can.finalize()
}

/// Failure to send a command
#[derive(Debug, PartialEq, Eq)]
pub enum Error<E> {
    /// The frame was not accepted by the transmit buffer
    Transmit(TransmitError),
    /// Encryption failed; nothing was sent
    Security(E),
}

/// Why a received frame was dropped
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Discard {
    /// Frame carries another identifier
    UnexpectedId,
    /// Frame is not one block long (encrypted) or is empty (plain)
    UnexpectedLength(usize),
    /// The security module refused to decrypt
    DecryptionFailed,
    /// First byte is not a known command
    UnknownCommand(u8),
}

/// Outcome of a reception
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reception {
    /// A valid command
    Command(Command),
    /// A frame that was dropped
    Discarded(Discard),
}

/// One end of the encrypted command exchange
pub struct SecureLink<Id, D, R, S: SecurityModule> {
    can: Can<Id, D, R>,
    security: S,
    key: S::Key,
    role: Role,
    encryption: bool,
}

impl<Id, D, R, S> SecureLink<Id, D, R, S>
where
    Id: CanId,
    D: Dependencies<Id>,
    R: Registers,
    S: SecurityModule,
{
    /// Create a link with encryption enabled. `can` must be configured with
    /// [`initialize`] for the same `role`.
    pub fn new(role: Role, can: Can<Id, D, R>, security: S, key: S::Key) -> Self {
        Self {
            can,
            security,
            key,
            role,
            encryption: true,
        }
    }

    /// Whether commands are encrypted
    pub fn encryption(&self) -> bool {
        self.encryption
    }

    /// Switch encryption on or off. Both ends must agree.
    pub fn set_encryption(&mut self, encryption: bool) {
        self.encryption = encryption;
    }

    /// Flip encryption and return the new setting
    pub fn toggle_encryption(&mut self) -> bool {
        self.encryption = !self.encryption;
        self.encryption
    }

    /// Send `command` to the peer.
    pub fn send(&mut self, command: Command) -> nb::Result<(), Error<S::Error>> {
        let id = self.role.tx_id();
        let sent = if self.encryption {
            let mut block = [0; BLOCK_SIZE];
            block[0] = command as u8;
            self.security
                .encrypt_block(self.key, &mut block)
                .map_err(|e| nb::Error::Other(Error::Security(e)))?;
            self.can.transmit_payload(id, &block)
        } else {
            self.can.transmit_payload(id, &[command as u8])
        };
        sent.map_err(|e| e.map(Error::Transmit))
    }

    /// Take a frame from the receive buffer and decode it.
    ///
    /// Fails with [`nb::Error::WouldBlock`] if nothing was received.
    pub fn receive(&mut self) -> nb::Result<Reception, Infallible> {
        let message = self.can.receive()?;
        Ok(self.decode(&message))
    }

    fn decode(&mut self, message: &rx::Message) -> Reception {
        if message.id() != embedded_can::Id::Standard(self.role.rx_id()) {
            return discard(Discard::UnexpectedId);
        }

        let data = message.data();
        let byte = if self.encryption {
            let mut block = [0; BLOCK_SIZE];
            if data.len() != BLOCK_SIZE {
                return discard(Discard::UnexpectedLength(data.len()));
            }
            block.copy_from_slice(data);
            if self.security.decrypt_block(self.key, &mut block).is_err() {
                return discard(Discard::DecryptionFailed);
            }
            block[0]
        } else {
            match data.first() {
                Some(byte) => *byte,
                None => return discard(Discard::UnexpectedLength(0)),
            }
        };

        match Command::from_byte(byte) {
            Some(command) => Reception::Command(command),
            None => discard(Discard::UnknownCommand(byte)),
        }
    }

    /// Give back the bus and the security module
    pub fn free(self) -> (Can<Id, D, R>, S) {
        (self.can, self.security)
    }
}

fn discard(reason: Discard) -> Reception {
    #[cfg(feature = "defmt")]
    defmt::warn!("dropping frame: {}", reason);
    Reception::Discarded(reason)
}
