//! Command line front end for mindctrl.

pub mod cli;
pub mod commands;
pub mod logging;
