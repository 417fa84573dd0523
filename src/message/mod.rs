//! Handling of messages/frames

pub mod rx;
pub mod tx;

use crate::reg::{MbCs, MbId};
use core::cmp::min;
use embedded_can::{ExtendedId, Frame, Id, StandardId};

/// Largest payload of a CAN FD frame
pub const MAX_PAYLOAD: usize = 64;

/// Data does not fit in the backing buffer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TooMuchData;

/// CAN frame/message.
pub enum Message {
    /// Message received from a CAN bus
    Rx(rx::Message),
    /// Message that may be transmitted to a CAN bus
    Tx(tx::Message),
}

impl Message {
    fn raw(&self) -> &RawMessage {
        match self {
            Self::Rx(rx::Message(m)) | Self::Tx(tx::Message(m)) => m,
        }
    }
}

impl Frame for Message {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        tx::MessageBuilder {
            id: id.into(),
            frame_type: tx::FrameType::Classic(tx::ClassicFrameType::Data(data)),
        }
        .build()
        .ok()
        .map(Self::Tx)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 15 {
            return None;
        }
        tx::MessageBuilder {
            id: id.into(),
            frame_type: tx::FrameType::Classic(tx::ClassicFrameType::Remote {
                desired_len: dlc_to_len(dlc as u8, false),
            }),
        }
        .build()
        .ok()
        .map(Self::Tx)
    }

    fn is_extended(&self) -> bool {
        self.raw().is_extended()
    }

    fn is_remote_frame(&self) -> bool {
        self.raw().is_remote_frame()
    }

    fn id(&self) -> Id {
        self.raw().id()
    }

    fn dlc(&self) -> usize {
        self.raw().dlc().into()
    }

    fn data(&self) -> &[u8] {
        self.raw().data()
    }
}

/// RX or TX message in the message buffer representation
#[derive(Copy, Clone, Debug)]
pub(crate) struct RawMessage {
    pub(crate) cs: MbCs,
    pub(crate) id: MbId,
    pub(crate) data: [u8; MAX_PAYLOAD],
    /// Payload bytes the backing message buffer holds
    pub(crate) capacity: usize,
}

impl RawMessage {
    pub(crate) fn empty() -> Self {
        Self {
            cs: MbCs::default(),
            id: MbId::default(),
            data: [0; MAX_PAYLOAD],
            capacity: MAX_PAYLOAD,
        }
    }

    /// Payload word `index` as stored in the message buffer: the first
    /// payload byte is the most significant byte of the word.
    pub(crate) fn word(&self, index: usize) -> u32 {
        let at = 4 * index;
        u32::from_be_bytes([
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ])
    }

    pub(crate) fn set_word(&mut self, index: usize, word: u32) {
        let at = 4 * index;
        self.data[at..at + 4].copy_from_slice(&word.to_be_bytes());
    }

    /// Number of payload words covering the decoded data length
    pub(crate) fn word_count(&self) -> usize {
        (self.decoded_dlc() + 3) / 4
    }
}

/// Common functionality for all raw messages.
pub trait Raw {
    /// Returns the CAN identifier of the message
    fn id(&self) -> Id;
    /// Data length in bytes
    fn decoded_dlc(&self) -> usize;
    /// Data length code
    fn dlc(&self) -> u8;
    /// True if the header indicates that the frame uses the CAN FD format
    fn fd_format(&self) -> bool;
    /// Remote Transmission Request
    fn is_remote_frame(&self) -> bool;
    /// Data field
    fn data(&self) -> &[u8];
    /// Check if the frame uses and extended (29-bit) ID
    fn is_extended(&self) -> bool;
    /// `true` if the sender of the message indicates that it is in "error
    /// passive" state.
    fn is_transmitter_error_passive(&self) -> bool;
    /// `true` if bit rate switching is used
    fn bit_rate_switching(&self) -> bool;
}

impl Raw for RawMessage {
    fn id(&self) -> Id {
        if self.is_extended() {
            // The field is 29 bits wide
            Id::Extended(unsafe { ExtendedId::new_unchecked(self.id.ext_id()) })
        } else {
            // The field is 11 bits wide
            Id::Standard(unsafe { StandardId::new_unchecked(self.id.std_id()) })
        }
    }

    fn decoded_dlc(&self) -> usize {
        dlc_to_len(self.dlc(), self.fd_format())
    }

    fn dlc(&self) -> u8 {
        self.cs.dlc()
    }

    fn fd_format(&self) -> bool {
        self.cs.edl()
    }

    fn is_remote_frame(&self) -> bool {
        self.cs.rtr()
    }

    fn data(&self) -> &[u8] {
        if !self.is_remote_frame() {
            self.data
                .get(..min(self.decoded_dlc(), self.capacity))
                .unwrap_or(&[])
        } else {
            &[]
        }
    }

    fn is_extended(&self) -> bool {
        self.cs.ide()
    }

    fn is_transmitter_error_passive(&self) -> bool {
        self.cs.esi()
    }

    fn bit_rate_switching(&self) -> bool {
        self.cs.brs()
    }
}

macro_rules! forward_raw {
    ($message:ty) => {
        impl Raw for $message {
            fn id(&self) -> Id {
                self.0.id()
            }
            fn decoded_dlc(&self) -> usize {
                self.0.decoded_dlc()
            }
            fn dlc(&self) -> u8 {
                self.0.dlc()
            }
            fn fd_format(&self) -> bool {
                self.0.fd_format()
            }
            fn is_remote_frame(&self) -> bool {
                self.0.is_remote_frame()
            }
            fn data(&self) -> &[u8] {
                self.0.data()
            }
            fn is_extended(&self) -> bool {
                self.0.is_extended()
            }
            fn is_transmitter_error_passive(&self) -> bool {
                self.0.is_transmitter_error_passive()
            }
            fn bit_rate_switching(&self) -> bool {
                self.0.bit_rate_switching()
            }
        }
    };
}

forward_raw!(rx::Message);
forward_raw!(tx::Message);

/// Finds the smallest data length code that encodes at least len bytes
pub(crate) fn len_to_dlc(len: usize, fd_format: bool) -> Result<u8, TooMuchData> {
    if fd_format {
        match len {
            0..=8 => Ok(len as u8),
            9..=12 => Ok(9),
            13..=16 => Ok(10),
            17..=20 => Ok(11),
            21..=24 => Ok(12),
            25..=32 => Ok(13),
            33..=48 => Ok(14),
            49..=64 => Ok(15),
            _ => Err(TooMuchData),
        }
    } else {
        match len {
            0..=8 => Ok(len as u8),
            _ => Err(TooMuchData),
        }
    }
}

/// Converts data length code to a length in bytes
pub(crate) fn dlc_to_len(dlc: u8, fd_format: bool) -> usize {
    if fd_format {
        match dlc {
            0..=8 => dlc.into(),
            9 => 12,
            10 => 16,
            11 => 20,
            12 => 24,
            13 => 32,
            14 => 48,
            15.. => 64,
        }
    } else {
        match dlc {
            0..=8 => dlc.into(),
            9.. => 8,
        }
    }
}
