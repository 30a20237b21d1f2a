#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod board;
pub mod bus;
pub mod capacitive_sensor;
pub mod config;
pub mod device;
pub mod error;
pub mod humidity_sensor;
pub mod schedule;
pub mod sensor;
pub mod sink;
pub mod soil_sensor;

#[cfg(test)]
mod mock;
