// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Thermal control for Dell G15 laptops.
//!
//! The daemon owns the WMAX ACPI interface and the `dell_smm` hwmon device,
//! and serves power mode, fan boost and G-Mode control to unprivileged
//! clients over a Unix domain socket.

pub mod acpi;
pub mod client;
pub mod config;
pub mod controller;
pub mod hardware;
pub mod hwmon;
pub mod keylistener;
pub mod mode;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;
