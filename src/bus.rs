//! The FlexCAN message-buffer controller

use crate::config::{
    BitTimingError, CanConfig, Mode, CLASSIC_BIT_TIMING_RANGES, DATA_BIT_TIMING_RANGES,
    NOMINAL_BIT_TIMING_RANGES,
};
use crate::mailbox::{Code, MessageBuffer};
use crate::message::{rx, tx, Raw, TooMuchData};
use crate::reg::{
    Cbt, Ctrl1, Ctrl2, Ecr, Esr1, FdCbt, FdCtrl, Iflag1, Mcr, Mmio, Registers, RxMgMask, Timer,
    RAM_WORDS, RXIMR_COUNT,
};
use core::convert::{From, Infallible};
use core::fmt::{self, Debug};
use core::marker::PhantomData;
use flexcan_core::{CanId, ClockSource, Dependencies};
use fugit::HertzU32;

/// Printable ESR1 field
pub struct ProtocolStatus(pub Esr1);

impl From<Esr1> for ProtocolStatus {
    fn from(value: Esr1) -> Self {
        Self(value)
    }
}

impl Debug for ProtocolStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> fmt::Result {
        let esr = &self.0;

        f.debug_struct("ProtocolStatus")
            .field("fltconf", &esr.fltconf())
            .field("synch", &esr.synch())
            .field("idle", &esr.idle())
            .field("tx", &esr.tx())
            .field("rx", &esr.rx())
            .field("txwrn", &esr.txwrn())
            .field("rxwrn", &esr.rxwrn())
            .field("bit1err", &esr.bit1err())
            .field("bit0err", &esr.bit0err())
            .field("ackerr", &esr.ackerr())
            .field("crcerr", &esr.crcerr())
            .field("frmerr", &esr.frmerr())
            .field("stferr", &esr.stferr())
            .field("boffint", &esr.boffint())
            .field("errint_fast", &esr.errint_fast())
            .finish()
    }
}

/// Printable ECR field
pub struct ErrorCounters(pub Ecr);

impl From<Ecr> for ErrorCounters {
    fn from(value: Ecr) -> Self {
        Self(value)
    }
}

impl Debug for ErrorCounters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> fmt::Result {
        let ecr = &self.0;

        f.debug_struct("ErrorCounters")
            .field("rec", &ecr.rxerrcnt())
            .field("tec", &ecr.txerrcnt())
            .field("rec_fast", &ecr.rxerrcnt_fast())
            .field("tec_fast", &ecr.txerrcnt_fast())
            .finish()
    }
}

/// Hardware handshake that is waited upon
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wait {
    /// MCR.LPMACK after setting MCR.MDIS
    LowPowerEntry,
    /// MCR.LPMACK clearing after clearing MCR.MDIS
    LowPowerExit,
    /// MCR.FRZACK after requesting freeze
    FreezeEntry,
    /// MCR.FRZACK clearing after leaving freeze
    FreezeExit,
    /// MCR.NOTRDY clearing
    Ready,
}

/// Errors that may occur during configuration
#[derive(Debug, PartialEq)]
pub enum ConfigurationError {
    /// Problems with the bit timing configuration
    BitTiming(BitTimingError),
    /// The peripheral did not acknowledge a mode change in time
    Timeout(Wait),
    /// A dedicated message buffer lies outside of the configured layout, or
    /// transmission and reception share a buffer
    InvalidMailbox,
    /// Transceiver delay compensation offset is not in the range [0, 31]
    InvalidTransceiverDelayOffset,
}

impl From<BitTimingError> for ConfigurationError {
    fn from(value: BitTimingError) -> Self {
        Self::BitTiming(value)
    }
}

/// Reasons a message cannot be transmitted
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitError {
    /// FD frame while the peripheral runs in classic mode
    FdNotEnabled,
    /// Bit rate switched frame while bit rate switching is disabled
    BitRateSwitchingNotEnabled,
    /// Payload is bigger than the message buffer
    TooMuchData,
    /// Remote frames are not supported. After sending one the peripheral
    /// turns the transmit buffer into a receive buffer waiting for the answer.
    RemoteFrame,
}

impl From<TooMuchData> for TransmitError {
    fn from(_: TooMuchData) -> Self {
        Self::TooMuchData
    }
}

/// Common CANbus functionality
pub trait CanBus {
    /// Read error counters
    fn error_counters(&self) -> ErrorCounters;
    /// Read additional status information
    fn protocol_status(&self) -> ProtocolStatus;
    /// Get current time
    ///
    /// Reading the timer also releases a locked receive message buffer.
    fn ts_count(&self) -> u16;
}

/// A CAN bus that is not in freeze mode. Frames matching the receive message
/// buffer are accepted, and frames can be transmitted.
pub struct Can<Id, D, R = Mmio<Id>> {
    /// Implementation details. The field is public to allow destructuring.
    pub internals: Internals<Id, D, R>,
    tx: MessageBuffer,
    rx: MessageBuffer,
}

/// Implementation details.
pub struct Internals<Id, D, R> {
    regs: R,
    dependencies: D,
    config: CanConfig,
    _id: PhantomData<Id>,
}

impl<Id: CanId, D: Dependencies<Id>, R: Registers> Internals<Id, D, R> {
    /// Poll MCR until `done` holds, at most `poll_limit` times.
    fn wait(&self, what: Wait, done: impl Fn(Mcr) -> bool) -> Result<(), ConfigurationError> {
        for _ in 0..self.config.poll_limit {
            if done(self.regs.read::<Mcr>()) {
                return Ok(());
            }
        }
        #[cfg(feature = "defmt")]
        defmt::warn!("FlexCAN did not acknowledge {}", what);
        Err(ConfigurationError::Timeout(what))
    }

    /// Disable the module, select the protocol engine clock and enable it
    /// again. The clock source can only be changed while disabled.
    fn select_clock(&mut self) -> Result<(), ConfigurationError> {
        self.regs.modify::<Mcr>(|mcr| mcr.set_mdis(true));
        self.wait(Wait::LowPowerEntry, |mcr| mcr.lpmack())?;

        let peripheral = self.dependencies.clock_source() == ClockSource::Peripheral;
        self.regs.modify::<Ctrl1>(|ctrl1| ctrl1.set_clksrc(peripheral));

        self.regs.modify::<Mcr>(|mcr| mcr.set_mdis(false));
        self.wait(Wait::LowPowerExit, |mcr| !mcr.lpmack())
    }

    /// Enter freeze mode. Configuration registers are writable and the bus is
    /// left alone until [`Self::leave_freeze`].
    pub fn enter_freeze(&mut self) -> Result<(), ConfigurationError> {
        self.regs.modify::<Mcr>(|mcr| {
            mcr.set_frz(true);
            mcr.set_halt(true);
        });
        self.wait(Wait::FreezeEntry, |mcr| mcr.frzack())
    }

    /// Leave freeze mode and wait until the module synchronized to the bus.
    pub fn leave_freeze(&mut self) -> Result<(), ConfigurationError> {
        self.regs.modify::<Mcr>(|mcr| {
            mcr.set_frz(false);
            mcr.set_halt(false);
        });
        self.wait(Wait::FreezeExit, |mcr| !mcr.frzack())?;
        self.wait(Wait::Ready, |mcr| !mcr.notrdy())
    }
}

/// A CAN bus in freeze mode. Before messages can be sent and received, it
/// needs to be [`Self::finalize`]d.
pub struct CanConfigurable<Id, D, R = Mmio<Id>>(
    /// The bus is frozen while this is wrapped.
    Internals<Id, D, R>,
);

impl<Id: CanId, D: Dependencies<Id>> CanConfigurable<Id, D, Mmio<Id>> {
    /// Create new can peripheral.
    ///
    /// The returned peripheral is not operational; use [`Self::finalize`] to
    /// finish configuration and start transmitting and receiving.
    pub fn new(bitrate: HertzU32, dependencies: D) -> Result<Self, ConfigurationError> {
        // Safety: `dependencies` implies ownership of the register block
        // pointed to by `Id`, so `regs` has unique access to it.
        let regs = unsafe { Mmio::<Id>::new() };
        Self::with_registers(regs, bitrate, dependencies)
    }
}

impl<Id: CanId, D: Dependencies<Id>, R: Registers> CanConfigurable<Id, D, R> {
    /// Create a peripheral on top of an arbitrary register access
    /// implementation.
    ///
    /// Selects the clock from `dependencies` and enters freeze mode.
    pub fn with_registers(
        regs: R,
        bitrate: HertzU32,
        dependencies: D,
    ) -> Result<Self, ConfigurationError> {
        let mut internals = Internals {
            regs,
            dependencies,
            config: CanConfig::new(bitrate),
            _id: PhantomData,
        };
        internals.select_clock()?;
        internals.enter_freeze()?;
        Ok(Self(internals))
    }

    /// Raw access to the registers.
    ///
    /// # Safety
    /// The abstraction assumes that it has exclusive ownership of the
    /// registers. Direct access can break such assumptions.
    pub unsafe fn registers(&self) -> &R {
        &self.0.regs
    }

    /// Allows adjusting the configuration before [`Self::finalize`]
    pub fn config(&mut self) -> &mut CanConfig {
        &mut self.0.config
    }

    fn mailboxes(&self) -> Result<(MessageBuffer, MessageBuffer), ConfigurationError> {
        let config = &self.0.config;
        let data_size = config.mode.data_size();
        let tx = MessageBuffer::new(config.mailboxes.tx, data_size);
        let rx = MessageBuffer::new(config.mailboxes.rx, data_size);
        match (tx, rx) {
            (Some(tx), Some(rx)) if tx.index() != rx.index() => Ok((tx, rx)),
            _ => Err(ConfigurationError::InvalidMailbox),
        }
    }

    /// Apply parameters from a bus config struct
    fn apply_bus_config(&mut self) -> Result<(), ConfigurationError> {
        let regs = &self.0.regs;
        let config = &self.0.config;
        let can_clock = self.0.dependencies.can_clock();
        let nominal = &config.nominal_timing;

        match config.mode {
            Mode::Classic => {
                let prescaler = nominal.prescaler(can_clock, &CLASSIC_BIT_TIMING_RANGES)?;
                // The ranges are checked when computing the prescaler
                regs.modify::<Ctrl1>(|ctrl1| {
                    ctrl1.set_presdiv((prescaler - 1) as u8);
                    ctrl1.set_rjw(nominal.sjw - 1);
                    ctrl1.set_pseg1(nominal.phase_seg_1 - 1);
                    ctrl1.set_pseg2(nominal.phase_seg_2 - 1);
                    ctrl1.set_propseg(nominal.prop_seg - 1);
                });
                regs.modify::<Cbt>(|cbt| cbt.set_btf(false));
                regs.modify::<Ctrl2>(|ctrl2| ctrl2.set_isocanfden(false));
            }
            Mode::Fd {
                allow_bit_rate_switching,
                data_phase_timing,
                data_size,
                transceiver_delay_compensation,
            } => {
                let prescaler = nominal.prescaler(can_clock, &NOMINAL_BIT_TIMING_RANGES)?;
                let data_prescaler =
                    data_phase_timing.prescaler(can_clock, &DATA_BIT_TIMING_RANGES)?;
                if transceiver_delay_compensation.map_or(false, |offset| offset > 31) {
                    return Err(ConfigurationError::InvalidTransceiverDelayOffset);
                }

                regs.modify::<Cbt>(|cbt| {
                    cbt.set_btf(true);
                    cbt.set_epresdiv(prescaler - 1);
                    cbt.set_erjw(nominal.sjw - 1);
                    cbt.set_epropseg(nominal.prop_seg - 1);
                    cbt.set_epseg1(nominal.phase_seg_1 - 1);
                    cbt.set_epseg2(nominal.phase_seg_2 - 1);
                });
                // FPROPSEG is the only field stored without the offset of one
                regs.modify::<FdCbt>(|fdcbt| {
                    fdcbt.set_fpresdiv(data_prescaler - 1);
                    fdcbt.set_frjw(data_phase_timing.sjw - 1);
                    fdcbt.set_fpropseg(data_phase_timing.prop_seg);
                    fdcbt.set_fpseg1(data_phase_timing.phase_seg_1 - 1);
                    fdcbt.set_fpseg2(data_phase_timing.phase_seg_2 - 1);
                });
                regs.modify::<FdCtrl>(|fdctrl| {
                    fdctrl.set_fdrate(allow_bit_rate_switching);
                    fdctrl.set_mbdsr0(data_size.mbdsr());
                    fdctrl.set_tdcen(transceiver_delay_compensation.is_some());
                    fdctrl.set_tdcoff(transceiver_delay_compensation.unwrap_or(0));
                });
                regs.modify::<Ctrl2>(|ctrl2| ctrl2.set_isocanfden(true));
            }
        }

        regs.modify::<Ctrl1>(|ctrl1| ctrl1.set_lpb(config.loopback));
        Ok(())
    }

    /// Clear the message buffer RAM, open the acceptance masks and arm the
    /// receive buffer.
    fn apply_ram_config(&mut self, rx: &MessageBuffer) {
        let regs = &self.0.regs;
        let config = &self.0.config;

        for word in 0..RAM_WORDS {
            regs.write_ram(word, 0);
        }
        // Every identifier bit takes part in matching
        for index in 0..RXIMR_COUNT {
            regs.write_rximr(index, 0xFFFF_FFFF);
        }
        regs.write(RxMgMask::from(0x1FFF_FFFF));

        rx.arm_rx(regs, config.mailboxes.rx_id, config.mode.is_fd());
    }

    /// Locks the configuration and enters normal operation.
    pub fn finalize(mut self) -> Result<Can<Id, D, R>, ConfigurationError> {
        let (tx, rx) = self.mailboxes()?;
        self.apply_bus_config()?;
        self.apply_ram_config(&rx);

        let mut internals = self.0;
        let fd = internals.config.mode.is_fd();
        let last = tx.data_size().mailbox_count() - 1;
        internals.regs.modify::<Mcr>(|mcr| {
            mcr.set_fden(fd);
            mcr.set_maxmb(last as u8);
        });
        internals.leave_freeze()?;

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "FlexCAN running: tx buffer {}, rx buffer {}, {} buffers",
            tx.index(),
            rx.index(),
            last + 1
        );
        Ok(Can { internals, tx, rx })
    }
}

impl<Id: CanId, D: Dependencies<Id>, R: Registers> Can<Id, D, R> {
    /// Raw access to the registers.
    ///
    /// # Safety
    /// The abstraction assumes that it has exclusive ownership of the
    /// registers. Direct access can break such assumptions.
    pub unsafe fn registers(&self) -> &R {
        &self.internals.regs
    }

    /// Configuration the bus runs with
    pub fn config(&self) -> &CanConfig {
        &self.internals.config
    }

    /// Enter freeze mode for reconfiguration.
    pub fn configure(mut self) -> Result<CanConfigurable<Id, D, R>, ConfigurationError> {
        self.internals.enter_freeze()?;
        Ok(CanConfigurable(self.internals))
    }

    /// Give back the register access and the dependencies.
    pub fn release(self) -> (R, D) {
        (self.internals.regs, self.internals.dependencies)
    }

    /// Puts a frame in the transmit message buffer to be sent on the bus.
    ///
    /// Fails with [`nb::Error::WouldBlock`] if the buffer still holds a frame
    /// that has not been transmitted.
    pub fn transmit(&mut self, message: &tx::Message) -> nb::Result<(), TransmitError> {
        let regs = &self.internals.regs;
        if message.is_remote_frame() {
            return Err(nb::Error::Other(TransmitError::RemoteFrame));
        }
        match self.internals.config.mode {
            Mode::Classic if message.fd_format() => {
                return Err(nb::Error::Other(TransmitError::FdNotEnabled))
            }
            Mode::Fd {
                allow_bit_rate_switching: false,
                ..
            } if message.bit_rate_switching() => {
                return Err(nb::Error::Other(
                    TransmitError::BitRateSwitchingNotEnabled,
                ))
            }
            _ => {}
        }
        if message.decoded_dlc() > self.tx.data_size().bytes() {
            return Err(nb::Error::Other(TransmitError::TooMuchData));
        }
        if !self.tx.code(regs).is_inactive() {
            return Err(nb::Error::WouldBlock);
        }

        regs.write(Iflag1::mailbox(self.tx.index()));
        self.tx.write(regs, message.raw(), Code::TxData);
        Ok(())
    }

    /// Transmit `payload` as a data frame: classic in classic mode, FD (bit
    /// rate switched if allowed) in FD mode.
    pub fn transmit_payload(
        &mut self,
        id: impl Into<embedded_can::Id>,
        payload: &[u8],
    ) -> nb::Result<(), TransmitError> {
        let frame_type = match self.internals.config.mode {
            Mode::Classic => tx::FrameType::Classic(tx::ClassicFrameType::Data(payload)),
            Mode::Fd {
                allow_bit_rate_switching,
                ..
            } => tx::FrameType::FlexibleDatarate {
                payload,
                bit_rate_switching: allow_bit_rate_switching,
                force_error_state_indicator: false,
            },
        };
        let message = tx::MessageBuilder {
            id: id.into(),
            frame_type,
        }
        .build()
        .map_err(|e| nb::Error::Other(e.into()))?;
        self.transmit(&message)
    }

    /// Take the frame out of the receive message buffer.
    ///
    /// Fails with [`nb::Error::WouldBlock`] if nothing was received, or if the
    /// peripheral is still busy storing the frame.
    pub fn receive(&mut self) -> nb::Result<rx::Message, Infallible> {
        let regs = &self.internals.regs;
        if !regs.read::<Iflag1>().is_set(self.rx.index()) {
            return Err(nb::Error::WouldBlock);
        }

        let raw = self
            .rx
            .read(regs, self.internals.config.poll_limit)
            .ok_or(nb::Error::WouldBlock)?;
        // Unlocks the message buffer; the value itself is of no interest
        let _ = regs.read::<Timer>();
        regs.write(Iflag1::mailbox(self.rx.index()));
        Ok(rx::Message(raw))
    }
}

impl<Id: CanId, D: Dependencies<Id>, R: Registers> CanBus for Can<Id, D, R> {
    fn error_counters(&self) -> ErrorCounters {
        self.internals.regs.read::<Ecr>().into()
    }

    fn protocol_status(&self) -> ProtocolStatus {
        self.internals.regs.read::<Esr1>().into()
    }

    fn ts_count(&self) -> u16 {
        self.internals.regs.read::<Timer>().timer()
    }
}
