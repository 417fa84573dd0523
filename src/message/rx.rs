//! Messages received from the bus.

use super::*;
use crate::mailbox::Code;

/// RX message in the message buffer representation
#[derive(Copy, Clone, Debug)]
pub struct Message(pub(crate) RawMessage);

impl Message {
    /// Create a transmission object from rx object
    pub fn as_tx_builder(&'_ self) -> tx::MessageBuilder<'_> {
        tx::MessageBuilder {
            id: self.id(),
            frame_type: if self.fd_format() {
                tx::FrameType::FlexibleDatarate {
                    payload: self.data(),
                    bit_rate_switching: self.bit_rate_switching(),
                    force_error_state_indicator: false,
                }
            } else {
                tx::FrameType::Classic(if self.is_remote_frame() {
                    tx::ClassicFrameType::Remote {
                        desired_len: dlc_to_len(self.dlc(), self.fd_format()),
                    }
                } else {
                    tx::ClassicFrameType::Data(self.data())
                })
            },
        }
    }

    /// Free running timer value captured at the start of the frame
    pub fn timestamp(&self) -> u16 {
        self.0.cs.timestamp()
    }

    /// Message buffer code at the time the frame was read
    pub fn code(&self) -> Code {
        Code::from(self.0.cs.code())
    }

    /// `true` if an earlier frame in the message buffer was overwritten before
    /// it was read
    pub fn overrun(&self) -> bool {
        self.code() == Code::RxOverrun
    }

    /// `true` if the frame carried more payload than the message buffer
    /// holds. [`Raw::data`] only returns the stored part.
    pub fn truncated(&self) -> bool {
        !self.is_remote_frame() && self.decoded_dlc() > self.0.capacity
    }

    /// Payload word `index`, first payload byte most significant
    ///
    /// # Panics
    /// If `index` is not below 16.
    pub fn word(&self, index: usize) -> u32 {
        self.0.word(index)
    }
}
