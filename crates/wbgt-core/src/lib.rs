//! Core logic of the wbgt-node heat-stress sensor
//!
//! Encrypted settings persistence, the boot-time choice between the
//! provisioning access point and joining a network, heat-stress metrics,
//! sensor aggregation and the telemetry HTTP surface. Nothing in here
//! touches a peripheral directly; drivers and the radio come in through
//! traits.
//!
//! Builds `no_std` + `alloc` for the ESP32-S3 and with `std` under test.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bus;
pub mod codec;
pub mod config;
pub mod context;
pub mod http;
pub mod identity;
pub mod link;
pub mod metrics;
pub mod mode;
pub mod sensors;
pub mod settings;
pub mod storage;
pub mod telemetry;
