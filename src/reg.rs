//! FlexCAN register map
//!
//! Registers are plain `u32` newtypes with named fields. Access goes through
//! the [`Registers`] trait, which is implemented by [`Mmio`] for the real
//! peripheral.

use bitfield::bitfield;
use core::marker::PhantomData;
use flexcan_core::CanId;
use vcell::VolatileCell;

/// Byte offset of the message buffer RAM
pub const RAM_OFFSET: usize = 0x80;
/// Size of the message buffer RAM in words
pub const RAM_WORDS: usize = 128;
/// Byte offset of the individual receive masks (RXIMR0)
pub const RXIMR_OFFSET: usize = 0x880;
/// Number of individual receive masks
pub const RXIMR_COUNT: usize = 32;

/// A register at a fixed offset in the FlexCAN register block
pub trait Register: Copy + From<u32> + Into<u32> {
    /// Byte offset from the start of the register block
    const OFFSET: usize;
}

macro_rules! register {
    ($name:ident, $offset:literal) => {
        impl Register for $name {
            const OFFSET: usize = $offset;
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

/// Word level access to a FlexCAN register block
///
/// The typed accessors are provided on top of [`Self::read_word`] and
/// [`Self::write_word`]. Both must be volatile accesses; reads of some
/// registers (TIMER, IFLAG1) have side effects in hardware.
pub trait Registers {
    /// Read the word at byte `offset`
    fn read_word(&self, offset: usize) -> u32;
    /// Write the word at byte `offset`
    fn write_word(&self, offset: usize, value: u32);

    /// Read a register
    fn read<R: Register>(&self) -> R {
        R::from(self.read_word(R::OFFSET))
    }

    /// Write a register
    fn write<R: Register>(&self, value: R) {
        self.write_word(R::OFFSET, value.into())
    }

    /// Read-modify-write a register
    ///
    /// Not suitable for write-one-to-clear registers such as [`Iflag1`].
    fn modify<R: Register>(&self, f: impl FnOnce(&mut R)) {
        let mut value = self.read::<R>();
        f(&mut value);
        self.write(value);
    }

    /// Read a word of the message buffer RAM
    fn read_ram(&self, word: usize) -> u32 {
        self.read_word(RAM_OFFSET + 4 * word)
    }

    /// Write a word of the message buffer RAM
    fn write_ram(&self, word: usize, value: u32) {
        self.write_word(RAM_OFFSET + 4 * word, value)
    }

    /// Write an individual receive mask
    fn write_rximr(&self, index: usize, value: u32) {
        self.write_word(RXIMR_OFFSET + 4 * index, value)
    }
}

/// Memory mapped register block of the peripheral identified by `Id`
pub struct Mmio<Id> {
    _id: PhantomData<Id>,
}

impl<Id: CanId> Mmio<Id> {
    /// # Safety
    /// The caller must own the peripheral referenced by `Id`; no other code
    /// may access the register block while this exists.
    pub unsafe fn new() -> Self {
        Self { _id: PhantomData }
    }

    fn cell(&self, offset: usize) -> &VolatileCell<u32> {
        // Safety: `CanId::ADDRESS` points to a valid register block and every
        // offset used by this crate lies inside it and is word aligned.
        unsafe { &*((Id::ADDRESS as *const u8).add(offset) as *const VolatileCell<u32>) }
    }
}

impl<Id: CanId> Registers for Mmio<Id> {
    fn read_word(&self, offset: usize) -> u32 {
        self.cell(offset).get()
    }

    fn write_word(&self, offset: usize, value: u32) {
        self.cell(offset).set(value)
    }
}

bitfield! {
    /// Module Configuration Register
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Mcr(u32);
    impl Debug;
    /// Module disable
    pub mdis, set_mdis: 31;
    /// Freeze enable
    pub frz, set_frz: 30;
    /// Legacy RX FIFO enable
    pub rfen, set_rfen: 29;
    /// Halt FlexCAN
    pub halt, set_halt: 28;
    /// FlexCAN not ready
    pub notrdy, _: 27;
    /// Soft reset
    pub softrst, set_softrst: 25;
    /// Freeze mode acknowledge
    pub frzack, _: 24;
    /// Supervisor mode
    pub supv, set_supv: 23;
    /// Low-power mode acknowledge
    pub lpmack, _: 20;
    /// Self reception disable
    pub srxdis, set_srxdis: 17;
    /// Individual RX masking and queue enable
    pub irmq, set_irmq: 16;
    /// Abort enable
    pub aen, set_aen: 12;
    /// CAN FD operation enable
    pub fden, set_fden: 11;
    /// Number of the last message buffer
    pub u8, maxmb, set_maxmb: 6, 0;
}
register!(Mcr, 0x00);

bitfield! {
    /// Control 1 Register (classic bit timing)
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Ctrl1(u32);
    impl Debug;
    /// Prescaler division factor, minus one
    pub u8, presdiv, set_presdiv: 31, 24;
    /// Resync jump width, minus one
    pub u8, rjw, set_rjw: 23, 22;
    /// Phase segment 1, minus one
    pub u8, pseg1, set_pseg1: 21, 19;
    /// Phase segment 2, minus one
    pub u8, pseg2, set_pseg2: 18, 16;
    /// Bus off interrupt mask
    pub boffmsk, set_boffmsk: 15;
    /// Error interrupt mask
    pub errmsk, set_errmsk: 14;
    /// Protocol engine clock source, set for the peripheral clock
    pub clksrc, set_clksrc: 13;
    /// Loop back mode
    pub lpb, set_lpb: 12;
    /// Sampling mode
    pub smp, set_smp: 7;
    /// Bus off recovery disabled
    pub boffrec, set_boffrec: 6;
    /// Timer sync
    pub tsyn, set_tsyn: 5;
    /// Lowest buffer transmitted first
    pub lbuf, set_lbuf: 4;
    /// Listen-only mode
    pub lom, set_lom: 3;
    /// Propagation segment, minus one
    pub u8, propseg, set_propseg: 2, 0;
}
register!(Ctrl1, 0x04);

bitfield! {
    /// Free running timer
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Timer(u32);
    impl Debug;
    /// Timer value
    pub u16, timer, _: 15, 0;
}
register!(Timer, 0x08);

bitfield! {
    /// RX message buffers global mask
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct RxMgMask(u32);
    impl Debug;
    /// Mask bits, one per bit of the ID word
    pub u32, mg, set_mg: 31, 0;
}
register!(RxMgMask, 0x10);

bitfield! {
    /// Error counter
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Ecr(u32);
    impl Debug;
    /// Receive error counter for the fast bits
    pub u8, rxerrcnt_fast, _: 31, 24;
    /// Transmit error counter for the fast bits
    pub u8, txerrcnt_fast, _: 23, 16;
    /// Receive error counter
    pub u8, rxerrcnt, _: 15, 8;
    /// Transmit error counter
    pub u8, txerrcnt, _: 7, 0;
}
register!(Ecr, 0x1C);

bitfield! {
    /// Error and Status 1 register
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Esr1(u32);
    impl Debug;
    /// Error overrun
    pub errovr, _: 21;
    /// Error interrupt for errors detected in the data phase
    pub errint_fast, _: 20;
    /// Bus off done interrupt
    pub boffdoneint, _: 19;
    /// CAN synchronization status
    pub synch, _: 18;
    /// TX warning interrupt flag
    pub twrnint, _: 17;
    /// RX warning interrupt flag
    pub rwrnint, _: 16;
    /// Bit1 error
    pub bit1err, _: 15;
    /// Bit0 error
    pub bit0err, _: 14;
    /// Acknowledge error
    pub ackerr, _: 13;
    /// Cyclic redundancy check error
    pub crcerr, _: 12;
    /// Form error
    pub frmerr, _: 11;
    /// Stuffing error
    pub stferr, _: 10;
    /// TX error warning
    pub txwrn, _: 9;
    /// RX error warning
    pub rxwrn, _: 8;
    /// Idle
    pub idle, _: 7;
    /// FlexCAN in transmission
    pub tx, _: 6;
    /// Fault confinement state
    pub u8, fltconf, _: 5, 4;
    /// FlexCAN in reception
    pub rx, _: 3;
    /// Bus off interrupt
    pub boffint, _: 2;
    /// Error interrupt
    pub errint, _: 1;
}
register!(Esr1, 0x20);

/// Interrupt masks 1 register, one bit per message buffer
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Imask1(pub u32);
register!(Imask1, 0x28);

/// Interrupt flags 1 register, one write-one-to-clear bit per message buffer
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Iflag1(pub u32);
register!(Iflag1, 0x30);

impl Iflag1 {
    /// Value with only the flag of message buffer `index` set
    pub fn mailbox(index: usize) -> Self {
        Self(1 << index)
    }

    /// Whether the flag of message buffer `index` is set
    pub fn is_set(&self, index: usize) -> bool {
        self.0 & (1 << index) != 0
    }
}

bitfield! {
    /// Control 2 register
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Ctrl2(u32);
    impl Debug;
    /// Mailboxes reception priority
    pub mrp, set_mrp: 18;
    /// Remote request storing
    pub rrs, set_rrs: 17;
    /// Entire frame arbitration field comparison enable for RX mailboxes
    pub eacen, set_eacen: 16;
    /// ISO CAN FD enable
    pub isocanfden, set_isocanfden: 12;
}
register!(Ctrl2, 0x34);

bitfield! {
    /// CAN bit timing register (extended nominal timing)
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Cbt(u32);
    impl Debug;
    /// Bit timing format enable
    pub btf, set_btf: 31;
    /// Extended prescaler division factor, minus one
    pub u16, epresdiv, set_epresdiv: 30, 21;
    /// Extended resync jump width, minus one
    pub u8, erjw, set_erjw: 20, 16;
    /// Extended propagation segment, minus one
    pub u8, epropseg, set_epropseg: 15, 10;
    /// Extended phase segment 1, minus one
    pub u8, epseg1, set_epseg1: 9, 5;
    /// Extended phase segment 2, minus one
    pub u8, epseg2, set_epseg2: 4, 0;
}
register!(Cbt, 0x50);

bitfield! {
    /// CAN FD control register
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct FdCtrl(u32);
    impl Debug;
    /// Bit rate switch enable
    pub fdrate, set_fdrate: 31;
    /// Message buffer data size for region 0
    pub u8, mbdsr0, set_mbdsr0: 17, 16;
    /// Transceiver delay compensation enable
    pub tdcen, set_tdcen: 15;
    /// Transceiver delay compensation fail
    pub tdcfail, _: 14;
    /// Transceiver delay compensation offset
    pub u8, tdcoff, set_tdcoff: 12, 8;
    /// Transceiver delay compensation value
    pub u8, tdcval, _: 5, 0;
}
register!(FdCtrl, 0xC00);

bitfield! {
    /// CAN FD bit timing register (data phase)
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct FdCbt(u32);
    impl Debug;
    /// Fast prescaler division factor, minus one
    pub u16, fpresdiv, set_fpresdiv: 29, 20;
    /// Fast resync jump width, minus one
    pub u8, frjw, set_frjw: 18, 16;
    /// Fast propagation segment
    pub u8, fpropseg, set_fpropseg: 14, 10;
    /// Fast phase segment 1, minus one
    pub u8, fpseg1, set_fpseg1: 7, 5;
    /// Fast phase segment 2, minus one
    pub u8, fpseg2, set_fpseg2: 2, 0;
}
register!(FdCbt, 0xC04);

bitfield! {
    /// Control and status word of a message buffer
    #[derive(Copy, Clone, PartialEq, Eq, Default)]
    pub struct MbCs(u32);
    impl Debug;
    /// Extended data length (FD frame)
    pub edl, set_edl: 31;
    /// Bit rate switch
    pub brs, set_brs: 30;
    /// Error state indicator
    pub esi, set_esi: 29;
    /// Message buffer code
    pub u8, code, set_code: 27, 24;
    /// Substitute remote request
    pub srr, set_srr: 22;
    /// ID extended bit
    pub ide, set_ide: 21;
    /// Remote transmission request
    pub rtr, set_rtr: 20;
    /// Data length code
    pub u8, dlc, set_dlc: 19, 16;
    /// Free running timer value captured at the frame's start
    pub u16, timestamp, _: 15, 0;
}

bitfield! {
    /// Identifier word of a message buffer
    #[derive(Copy, Clone, PartialEq, Eq, Default)]
    pub struct MbId(u32);
    impl Debug;
    /// Local priority
    pub u8, prio, set_prio: 31, 29;
    /// Standard identifier
    pub u16, std_id, set_std_id: 28, 18;
    /// Extended identifier
    pub u32, ext_id, set_ext_id: 28, 0;
}

impl From<u32> for MbCs {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<MbCs> for u32 {
    fn from(value: MbCs) -> Self {
        value.0
    }
}

impl From<u32> for MbId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<MbId> for u32 {
    fn from(value: MbId) -> Self {
        value.0
    }
}
