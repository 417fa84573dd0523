#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//! # FlexCAN
//!
//! ## Overview
//! This crate provides a HAL for the FlexCAN controller found in NXP S32K1
//! microcontrollers.
//!
//! It provides the following features:
//!
//! - classical CAN and CAN FD with bitrate switching support
//! - a typed register map with named fields
//! - one dedicated transmit and one dedicated receive message buffer, using
//!   any of the 8, 16, 32 or 64 byte buffer layouts
//! - bounded waiting on every hardware handshake
//! - a two node ping-pong exchange, see [`pingpong`]
//! - encrypted commands over CAN FD backed by the CSEc engine, see [`secure`]
//!   and [`csec`]
//!
//! FlexCAN is embedded in the MCU like all other peripherals. Its clock has to
//! be enabled and routed, and the pins have to be muxed, before it can be used.
//! This is assured through the safety requirements of the [`flexcan_core`]
//! traits which platform-specific HALs are expected to implement.
//!
//! In order to use FlexCAN, one has to instantiate [`CanConfigurable`] and
//! [`finalize`] it. Its constructor requires an instance of an
//! [`Dependencies`] implementing struct and holds onto it until it's
//! [`released`].
//!
//! ## General usage example
//!
//! ```no_run
//! # struct Can0;
//! # unsafe impl flexcan::core::CanId for Can0 {
//! #     const ADDRESS: *const () = 0x4002_4000 as *const _;
//! # }
//! # struct Dependencies;
//! # unsafe impl flexcan::core::Dependencies<Can0> for Dependencies {
//! #     fn clock_source(&self) -> flexcan::core::ClockSource {
//! #         flexcan::core::ClockSource::Oscillator
//! #     }
//! #     fn can_clock(&self) -> fugit::HertzU32 {
//! #         fugit::HertzU32::MHz(8)
//! #     }
//! # }
//! use flexcan::bus::CanConfigurable;
//! use flexcan::config::MailboxConfig;
//! use flexcan::embedded_can::StandardId;
//! use flexcan::prelude::*;
//! use fugit::RateExtU32 as _;
//!
//! // Leaves the module frozen; the config struct can be modified
//! let mut can = CanConfigurable::<Can0, _>::new(500.kHz(), Dependencies).unwrap();
//! can.config().mailboxes = MailboxConfig {
//!     tx: 0,
//!     rx: 4,
//!     rx_id: StandardId::new(0x511).unwrap(),
//! };
//!
//! // Call to `finalize` puts FlexCAN into operational mode
//! let mut can = can.finalize().unwrap();
//!
//! let id = StandardId::new(0x555).unwrap();
//! nb::block!(can.transmit_payload(id, &[0xA5, 0x11, 0x22, 0x33])).unwrap();
//! let message = nb::block!(can.receive()).unwrap();
//! let _payload = message.data();
//! ```
//!
//! [`CanConfigurable`]: crate::bus::CanConfigurable
//! [`finalize`]: crate::bus::CanConfigurable::finalize
//! [`released`]: crate::bus::Can::release
//! [`Dependencies`]: flexcan_core::Dependencies

pub mod bus;
pub mod config;
pub mod csec;
pub mod mailbox;
pub mod message;
pub mod pingpong;
pub mod prelude;
pub mod reg;
pub mod secure;

#[cfg(test)]
mod sim;

pub use embedded_can;
pub use flexcan_core as core;
