//! Messages to be sent on the bus

use super::*;

/// TX message in the message buffer representation
#[derive(Copy, Clone, Debug)]
pub struct Message(pub(super) RawMessage);

impl Message {
    pub(crate) fn raw(&self) -> &RawMessage {
        &self.0
    }
}

/// Selects the type of the Classic CAN frame.
pub enum ClassicFrameType<'a> {
    /// 0-8 byte message payload
    Data(&'a [u8]),
    /// Requests transmission of the identified frame
    Remote {
        /// Length, in bytes, of the requested frame
        desired_len: usize,
    },
}

/// Selects frame type along with the valid payload type and configuration
/// specific to the chosen format.
pub enum FrameType<'a> {
    /// Classic CAN
    Classic(ClassicFrameType<'a>),
    /// CAN FD frame. Note that the peripheral must be initialized with CAN FD
    /// enabled to support this format.
    FlexibleDatarate {
        /// 0-64 byte message payload. The payload must not be bigger than the
        /// configured [`DataSize`](crate::config::DataSize).
        payload: &'a [u8],
        /// Parts of the frame are transmitted at a higher bit rate. Note that
        /// bit rate switching must be enabled in the peripheral configuration
        /// as well.
        bit_rate_switching: bool,
        /// If `true`, the error state indicator of the message will indicate
        /// 'error passive'. If `false`, the actual state of the
        /// peripheral will be indicated.
        force_error_state_indicator: bool,
    },
}

/// Describes a CAN message/frame that is not yet converted to the
/// representation the peripheral understands.
pub struct MessageBuilder<'a> {
    /// CAN identifier for the frame
    pub id: Id,
    /// Message frame type with a payload
    pub frame_type: FrameType<'a>,
}

impl<'a> MessageBuilder<'a> {
    /// Create the message in the format required by the peripheral.
    ///
    /// The control word is complete apart from the code, which is written
    /// when the message is handed to a message buffer.
    pub fn build(self) -> Result<Message, TooMuchData> {
        let mut raw = RawMessage::empty();

        let mut copy_payload = |d: &[u8]| {
            if d.len() > MAX_PAYLOAD {
                return Err(TooMuchData);
            }
            raw.data[..d.len()].copy_from_slice(d);
            Ok(())
        };

        let (edl, brs, esi, rtr, len) = match self.frame_type {
            FrameType::Classic(payload) => {
                let (rtr, len) = match payload {
                    ClassicFrameType::Data(payload) => {
                        copy_payload(payload)?;
                        (false, payload.len())
                    }
                    ClassicFrameType::Remote { desired_len } => (true, desired_len),
                };
                (false, false, false, rtr, len)
            }
            FrameType::FlexibleDatarate {
                payload,
                bit_rate_switching: brs,
                force_error_state_indicator: esi,
            } => {
                copy_payload(payload)?;
                (true, brs, esi, false, payload.len())
            }
        };
        let dlc = len_to_dlc(len, edl)?;

        match self.id {
            Id::Standard(id) => raw.id.set_std_id(id.as_raw()),
            Id::Extended(id) => raw.id.set_ext_id(id.as_raw()),
        }
        raw.cs.set_edl(edl);
        raw.cs.set_brs(brs);
        raw.cs.set_esi(esi);
        raw.cs.set_srr(true);
        raw.cs.set_ide(matches!(self.id, Id::Extended(_)));
        raw.cs.set_rtr(rtr);
        raw.cs.set_dlc(dlc);
        Ok(Message(raw))
    }
}
