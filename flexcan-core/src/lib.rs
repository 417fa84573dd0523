#![no_std]
#![warn(missing_docs)]

//! `flexcan-core` provides the thin integration layer between the platform
//! independent [`flexcan`] crate and platform specific HAL crates (in
//! documentation also referred to as _target HALs_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by target HALs.
//!
//! Integrators of this crate into any given target HAL are responsible for
//! soundness of trait implementations and conforming to their respective safety
//! prerequisites.
//!
//! [`flexcan`]: <https://docs.rs/crate/flexcan/>

pub use fugit;

/// Trait representing FlexCAN peripheral identity
///
/// Types implementing this trait are expected to be used as marker types that
/// identify a specific FlexCAN instance available on the platform. It only
/// conveys *where* the register block is located, not that it can be
/// accessed. The latter is expressed by the [`Dependencies`] trait.
///
/// # Safety
/// `CanId::ADDRESS` points to the start of a valid FlexCAN register block,
/// including the message buffer RAM and the CAN FD registers.
///
/// # Examples
/// ```no_run
/// use flexcan_core::CanId;
///
/// pub enum Can0 {}
///
/// unsafe impl CanId for Can0 {
///     const ADDRESS: *const () = 0x4002_4000 as *const _;
/// }
/// ```
pub unsafe trait CanId {
    /// Static address of the FlexCAN register block
    const ADDRESS: *const ();
}

/// Clock feeding the protocol engine (CTRL1.CLKSRC)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// Oscillator clock (SOSCDIV2 on S32K1)
    Oscillator,
    /// Peripheral (bus) clock
    Peripheral,
}

/// Trait representing FlexCAN peripheral dependencies
///
/// Structs implementing [`Dependencies`] should
/// - enclose all object representable dependencies of [`CanId`] and release
///   them upon destruction
/// - be constructible only when it is safe and sound to interact with the
///   peripheral (clock gate enabled, pins muxed)
/// - be a singleton for a specific [`CanId`]
///
/// # Safety
/// While a [`Dependencies`] instance exists
/// - the clock selected by [`Dependencies::clock_source`] must not change
/// - CAN related pin modes must not change
/// - the register block must not be accessed elsewhere
pub unsafe trait Dependencies<Id: CanId> {
    /// Which clock the protocol engine should run from.
    fn clock_source(&self) -> ClockSource;
    /// Frequency of the clock selected by [`Self::clock_source`].
    ///
    /// All bit timing is derived from it.
    fn can_clock(&self) -> fugit::HertzU32;
}
