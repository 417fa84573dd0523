//! CAN bus configuration

use crate::reg::RAM_WORDS;
use core::ops::RangeInclusive;
use embedded_can::StandardId;
use fugit::HertzU32;

/// Default upper bound on the number of status register polls spent waiting
/// for a hardware handshake
pub const DEFAULT_POLL_LIMIT: u32 = 100_000;

/// Configuration for the CAN bus
#[derive(Copy, Clone, Debug)]
pub struct CanConfig {
    /// Run peripheral in CAN-FD mode
    pub mode: Mode,
    /// Internal loop back; transmitted frames are received by this node only
    pub loopback: bool,
    /// Bit timing parameters for everything except the data phase of bit rate
    /// switched FD frames.
    pub nominal_timing: BitTiming,
    /// Message buffers used for transmission and reception
    pub mailboxes: MailboxConfig,
    /// How many times a status flag is polled before giving up with
    /// [`ConfigurationError::Timeout`](crate::bus::ConfigurationError::Timeout).
    /// Also bounds how often a busy receive buffer is read again.
    pub poll_limit: u32,
}

impl CanConfig {
    /// Create an instance
    ///
    /// Nominal bitrate value must be provided, all other settings come
    /// pre-populated with default values.
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            mode: Default::default(),
            loopback: Default::default(),
            nominal_timing: BitTiming::new(bitrate),
            mailboxes: Default::default(),
            poll_limit: DEFAULT_POLL_LIMIT,
        }
    }
}

/// Assignment of the dedicated message buffers
#[derive(Copy, Clone, Debug)]
pub struct MailboxConfig {
    /// Index of the transmit message buffer
    pub tx: usize,
    /// Index of the receive message buffer
    pub rx: usize,
    /// Standard identifier accepted by the receive message buffer
    pub rx_id: StandardId,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            tx: 0,
            rx: 4,
            rx_id: StandardId::ZERO,
        }
    }
}

/// Payload size of every message buffer (FDCTRL.MBDSR0)
///
/// The message buffer RAM is 128 words; bigger buffers mean fewer of them.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataSize {
    /// 8 bytes, 32 message buffers
    #[default]
    Bytes8,
    /// 16 bytes, 21 message buffers
    Bytes16,
    /// 32 bytes, 12 message buffers
    Bytes32,
    /// 64 bytes, 7 message buffers
    Bytes64,
}

impl DataSize {
    /// Payload capacity of a message buffer in bytes
    pub fn bytes(self) -> usize {
        match self {
            Self::Bytes8 => 8,
            Self::Bytes16 => 16,
            Self::Bytes32 => 32,
            Self::Bytes64 => 64,
        }
    }

    /// Size of a message buffer in words, control and ID words included
    pub fn words_per_mailbox(self) -> usize {
        2 + self.bytes() / 4
    }

    /// Number of message buffers that fit in the RAM
    pub fn mailbox_count(self) -> usize {
        RAM_WORDS / self.words_per_mailbox()
    }

    pub(crate) fn mbdsr(self) -> u8 {
        match self {
            Self::Bytes8 => 0,
            Self::Bytes16 => 1,
            Self::Bytes32 => 2,
            Self::Bytes64 => 3,
        }
    }
}

/// Bit-timing parameters
///
/// The bit time is determined by
/// - the time quantum `t_q`, which is a fraction of the protocol engine clock
/// - the number of time quanta in a bit time, determined by `prop_seg`,
///   `phase_seg_1` and `phase_seg_2`
/// The configurable ranges of the parameters depend on which timing is changed.
///
/// This struct expects *real* values, extra subtractions and additions expected
/// by the HW registers are handled within the HAL.
///
/// Default values are:
/// - sjw: 4
/// - prop_seg: 7
/// - phase_seg_1: 4
/// - phase_seg_2: 4
///
/// Default time quanta in a bit time is 16 (prop_seg + phase_seg_1 +
/// phase_seg_2 + synchronization segment (1))
#[derive(Copy, Clone, Debug)]
pub struct BitTiming {
    /// Synchronization jump width
    pub sjw: u8,
    /// Propagation segment
    pub prop_seg: u8,
    /// Phase time before sample point
    pub phase_seg_1: u8,
    /// Time after sample point
    pub phase_seg_2: u8,
    /// The bitrate of the bus. This needs to be chosen so that the clock to the
    /// protocol engine is divisible into time quanta such that the bit time is
    /// a whole number of time quanta.
    pub bitrate: HertzU32,
}

impl BitTiming {
    /// Create an instance
    ///
    /// Bitrate value must be provided, all other settings come pre-populated
    /// with default values.
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            sjw: 4,
            prop_seg: 7,
            phase_seg_1: 4,
            phase_seg_2: 4,
            bitrate,
        }
    }
}

/// Misconfigurations of [`BitTiming`].
#[derive(Debug, PartialEq)]
pub enum BitTimingError {
    /// SJW is outside the wrapped `RangeInclusive`
    SynchronizationJumpWidthOutOfRange(RangeInclusive<u32>),
    /// Propagation segment is outside the wrapped `RangeInclusive`
    PropagationSegmentOutOfRange(RangeInclusive<u32>),
    /// Phase segment 1 is outside the wrapped `RangeInclusive`
    PhaseSeg1OutOfRange(RangeInclusive<u32>),
    /// Phase segment 2 is outside the wrapped `RangeInclusive`
    PhaseSeg2OutOfRange(RangeInclusive<u32>),
    /// Total bit time quanta is outside the wrapped `RangeInclusive`
    BitTimeOutOfRange(RangeInclusive<u32>),
    /// Prescaler is outside the wrapped `RangeInclusive`
    PrescalerOutOfRange(RangeInclusive<u32>),
    /// No valid prescaler could be found
    ///
    /// The following requirement must be met:
    /// - `can_clock` must be divisible by `bitrate * bit_time_quanta`
    NoValidPrescaler {
        /// Provided protocol engine clock
        can_clock: HertzU32,
        /// Bitrate requested in [`BitTiming`]
        bitrate: HertzU32,
        /// Time quanta per bit selected by [`BitTiming`]
        bit_time_quanta: u32,
    },
}

/// Valid values of a BitTiming struct
#[derive(Clone)]
pub(crate) struct BitTimingRanges {
    sjw: RangeInclusive<u32>,
    prop_seg: RangeInclusive<u32>,
    phase_seg_1: RangeInclusive<u32>,
    phase_seg_2: RangeInclusive<u32>,
    /// The bit time, in time quanta
    time_quanta_per_bit: RangeInclusive<u32>,
    prescaler: RangeInclusive<u32>,
}

/// CTRL1 fields, used when CAN FD is off
pub(crate) const CLASSIC_BIT_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    sjw: 1..=4,
    prop_seg: 1..=8,
    phase_seg_1: 1..=8,
    phase_seg_2: 2..=8,
    time_quanta_per_bit: 8..=25,
    prescaler: 1..=256,
};
/// CBT fields
pub(crate) const NOMINAL_BIT_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    sjw: 1..=32,
    prop_seg: 1..=64,
    phase_seg_1: 1..=32,
    phase_seg_2: 2..=32,
    time_quanta_per_bit: 8..=129,
    prescaler: 1..=1024,
};
/// FDCBT fields
pub(crate) const DATA_BIT_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    sjw: 1..=8,
    prop_seg: 0..=31,
    phase_seg_1: 1..=8,
    phase_seg_2: 2..=8,
    time_quanta_per_bit: 5..=48,
    prescaler: 1..=1024,
};

impl BitTiming {
    /// Returns the number of time quanta that make up one bit time, `t_bit /
    /// t_q`
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.prop_seg) + u32::from(self.phase_seg_1) + u32::from(self.phase_seg_2)
    }

    fn check(&self, valid: &BitTimingRanges) -> Result<(), BitTimingError> {
        if !valid.sjw.contains(&self.sjw.into()) {
            Err(BitTimingError::SynchronizationJumpWidthOutOfRange(
                valid.sjw.clone(),
            ))
        } else if !valid.prop_seg.contains(&self.prop_seg.into()) {
            Err(BitTimingError::PropagationSegmentOutOfRange(
                valid.prop_seg.clone(),
            ))
        } else if !valid.phase_seg_1.contains(&self.phase_seg_1.into()) {
            Err(BitTimingError::PhaseSeg1OutOfRange(
                valid.phase_seg_1.clone(),
            ))
        } else if !valid.phase_seg_2.contains(&self.phase_seg_2.into()) {
            Err(BitTimingError::PhaseSeg2OutOfRange(
                valid.phase_seg_2.clone(),
            ))
        } else if !valid
            .time_quanta_per_bit
            .contains(&self.time_quanta_per_bit())
        {
            Err(BitTimingError::BitTimeOutOfRange(
                valid.time_quanta_per_bit.clone(),
            ))
        } else {
            Ok(())
        }
    }

    pub(crate) fn prescaler(
        &self,
        f_can: HertzU32,
        valid: &BitTimingRanges,
    ) -> Result<u16, BitTimingError> {
        self.check(valid)?;
        let f_out = self.bitrate;
        let bit_time_quanta = self.time_quanta_per_bit();
        let f_q = f_out * bit_time_quanta;
        if let Some(0) = f_can.to_Hz().checked_rem(f_q.to_Hz()) {
            let prescaler = f_can / f_q;
            if !valid.prescaler.contains(&prescaler) {
                Err(BitTimingError::PrescalerOutOfRange(valid.prescaler.clone()))
            } else {
                Ok(prescaler as u16)
            }
        } else {
            Err(BitTimingError::NoValidPrescaler {
                can_clock: f_can,
                bitrate: f_out,
                bit_time_quanta,
            })
        }
    }
}

/// Enable/disable CAN-FD and related features
#[derive(Default, Copy, Clone, Debug)]
pub enum Mode {
    /// Classic mode with 8-bytes data. Reception of an FD frame is considered
    /// an error.
    #[default]
    Classic,
    /// Transmission and reception of CAN FD frames (with up to 64 bytes of
    /// data) is enabled. This does not prevent use of classic CAN frames.
    Fd {
        /// If `true`, FD frames can be transmitted with bit rate switching.
        /// Otherwise, attempts to transmit them will return errors.
        ///
        /// Regardless of this setting, data phase timing still must be
        /// configured as *reception* of bit-rate-switched messages is still
        /// possible.
        allow_bit_rate_switching: bool,
        /// Bit timing parameters for the data phase of bit rate switched FD
        /// frames.
        data_phase_timing: BitTiming,
        /// Payload size of the message buffers
        data_size: DataSize,
        /// Transceiver delay compensation offset in protocol engine clock
        /// cycles (0..=31), or `None` to leave compensation off
        transceiver_delay_compensation: Option<u8>,
    },
}

impl Mode {
    /// Payload size of the message buffers in this mode
    pub fn data_size(&self) -> DataSize {
        match self {
            Self::Classic => DataSize::Bytes8,
            Self::Fd { data_size, .. } => *data_size,
        }
    }

    /// `true` in CAN FD mode
    pub fn is_fd(&self) -> bool {
        matches!(self, Self::Fd { .. })
    }
}
