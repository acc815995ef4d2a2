#![cfg_attr(not(feature = "std"), no_std)]

//! Cooperative single-threaded runtime plus a driver for a framed,
//! checksummed packet radio spoken over SPI.
//!
//! The [`executor::Scheduler`] runs tasks written as ordinary `async` blocks.
//! Tasks suspend by issuing syscalls (sleep, block on a [`future::Future`],
//! stop the loop) which the scheduler interprets between polls. The
//! [`radio::RadioLink`] builds on it: a background pump task turns bytes read
//! from the bus into frames, and frames into resolved futures.

extern crate alloc;

pub extern crate heapless;

pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod future;
pub mod platform;
pub mod radio;
pub mod task;

pub use crate::{
    codec::FrameCodec,
    config::{RadioConfig, SchedulerConfig},
    error::{Error, Result},
    executor::{Handle, Scheduler},
    future::Future,
    platform::{Clock, Millis},
    radio::RadioLink,
    task::defer,
};
