//! Message buffers
//!
//! A message buffer is a control/status word, an identifier word and the
//! payload words, laid out back to back in the message buffer RAM. Ownership
//! of a buffer is handed between software and the peripheral through the code
//! field of the control word.

use crate::config::DataSize;
use crate::message::RawMessage;
use crate::reg::{MbCs, MbId, Registers};
use embedded_can::StandardId;

/// Message buffer code
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Code {
    /// Receive buffer not taking part in matching
    RxInactive,
    /// Receive buffer holding a frame
    RxFull,
    /// Receive buffer armed and empty
    RxEmpty,
    /// Receive buffer holding a frame that overwrote an unread one
    RxOverrun,
    /// Receive buffer configured to answer remote requests
    RxRanswer,
    /// Receive buffer being updated by the peripheral
    RxBusy(u8),
    /// Transmit buffer not taking part in arbitration
    TxInactive,
    /// Transmit buffer aborted
    TxAbort,
    /// Transmit buffer pending transmission
    TxData,
    /// Transmit buffer answering a remote request
    TxTanswer,
    /// Undefined code
    Reserved(u8),
}

impl From<u8> for Code {
    fn from(bits: u8) -> Self {
        match bits & 0xF {
            0x0 => Self::RxInactive,
            0x2 => Self::RxFull,
            0x4 => Self::RxEmpty,
            0x6 => Self::RxOverrun,
            0xA => Self::RxRanswer,
            0x8 => Self::TxInactive,
            0x9 => Self::TxAbort,
            0xC => Self::TxData,
            0xE => Self::TxTanswer,
            busy @ (0x1 | 0x3 | 0x5 | 0x7) => Self::RxBusy(busy),
            other => Self::Reserved(other),
        }
    }
}

impl From<Code> for u8 {
    fn from(code: Code) -> Self {
        match code {
            Code::RxInactive => 0x0,
            Code::RxFull => 0x2,
            Code::RxEmpty => 0x4,
            Code::RxOverrun => 0x6,
            Code::RxRanswer => 0xA,
            Code::TxInactive => 0x8,
            Code::TxAbort => 0x9,
            Code::TxData => 0xC,
            Code::TxTanswer => 0xE,
            Code::RxBusy(bits) | Code::Reserved(bits) => bits,
        }
    }
}

impl Code {
    /// `true` if software may reprogram the buffer
    pub fn is_inactive(self) -> bool {
        matches!(self, Self::RxInactive | Self::TxInactive)
    }
}

/// A message buffer within the layout given by a [`DataSize`]
#[derive(Copy, Clone, Debug)]
pub(crate) struct MessageBuffer {
    index: usize,
    data_size: DataSize,
}

impl MessageBuffer {
    /// `None` if `index` is beyond the last buffer of the layout
    pub(crate) fn new(index: usize, data_size: DataSize) -> Option<Self> {
        (index < data_size.mailbox_count()).then_some(Self { index, data_size })
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn data_size(&self) -> DataSize {
        self.data_size
    }

    fn cs_word(&self) -> usize {
        self.index * self.data_size.words_per_mailbox()
    }

    fn id_word(&self) -> usize {
        self.cs_word() + 1
    }

    fn data_word(&self, n: usize) -> usize {
        self.cs_word() + 2 + n
    }

    fn capacity_words(&self) -> usize {
        self.data_size.bytes() / 4
    }

    pub(crate) fn code(&self, regs: &impl Registers) -> Code {
        Code::from(MbCs::from(regs.read_ram(self.cs_word())).code())
    }

    /// Payload first, then identifier, then the control word carrying `code`.
    /// Writing the control word hands the buffer over to the peripheral.
    pub(crate) fn write(&self, regs: &impl Registers, message: &RawMessage, code: Code) {
        let words = message.word_count().min(self.capacity_words());
        for n in 0..words {
            regs.write_ram(self.data_word(n), message.word(n));
        }
        regs.write_ram(self.id_word(), message.id.into());
        let mut cs = message.cs;
        cs.set_code(code.into());
        regs.write_ram(self.cs_word(), cs.into());
    }

    /// Bind the buffer to a standard identifier and make it ready for
    /// reception.
    pub(crate) fn arm_rx(&self, regs: &impl Registers, id: StandardId, fd: bool) {
        let mut mb_id = MbId::default();
        mb_id.set_std_id(id.as_raw());
        regs.write_ram(self.id_word(), mb_id.into());

        let mut cs = MbCs::default();
        cs.set_edl(fd);
        cs.set_brs(fd);
        cs.set_code(Code::RxEmpty.into());
        regs.write_ram(self.cs_word(), cs.into());
    }

    /// Control word first; reading it locks the buffer until the free running
    /// timer is read. The control word is read again while the peripheral is
    /// still moving a frame in, at most `poll_limit` times.
    pub(crate) fn read(&self, regs: &impl Registers, poll_limit: u32) -> Option<RawMessage> {
        let cs = (0..poll_limit)
            .map(|_| MbCs::from(regs.read_ram(self.cs_word())))
            .find(|cs| !matches!(Code::from(cs.code()), Code::RxBusy(_)))?;

        let mut message = RawMessage::empty();
        message.capacity = self.data_size.bytes();
        message.cs = cs;
        message.id = MbId::from(regs.read_ram(self.id_word()));
        let words = message.word_count().min(self.capacity_words());
        for n in 0..words {
            message.set_word(n, regs.read_ram(self.data_word(n)));
        }
        Some(message)
    }
}
