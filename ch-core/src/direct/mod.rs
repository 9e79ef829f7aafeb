//! Direct serial-line backend
//!
//! Talks the controller's text protocol over a local serial port: one command
//! line out, one reply line back.

mod backend;
pub mod command;
mod line;

pub use backend::{DirectLineBackend, LinkOptions, SharedLine};
pub use line::{available_ports, Line, LineOpener, PortSummary, SerialLine, SerialOpener};

#[cfg(test)]
pub use line::{MockLine, MockLineOpener};
