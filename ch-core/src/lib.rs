//! Chambers Core Library
//!
//! Control of ESPEC-style temperature chambers, either on a local serial line
//! or through a `chamberd` relay.
//!
//! # Modules
//!
//! - `chamber`: the [`Chamber`] façade applications hold
//! - `backend`: the transport contract and shared polling helpers
//! - `direct`: serial-line backend and controller command text
//! - `remote`: relay client and remote backend
//! - `descriptor`: connection descriptors and channels
//! - `settings`: persistent JSON settings
//! - `point_log`: saving recorded readings

pub mod backend;
pub mod chamber;
pub mod constants;
pub mod descriptor;
pub mod direct;
pub mod identity;
pub mod point;
pub mod point_log;
pub mod remote;
pub mod settings;

pub use ch_error::{ChamberError, Result};
pub use ch_protocol::RefMode;

pub use backend::ChamberBackend;
pub use chamber::{BackendFactory, Chamber, DefaultBackendFactory};
pub use descriptor::{Channel, ConnectionDescriptor};
pub use direct::{DirectLineBackend, LinkOptions};
pub use identity::model_label;
pub use point::TemperaturePoint;
pub use point_log::save_points;
pub use remote::{RelayClient, RemoteBackend};
pub use settings::{load_settings, ClientSettings, RelaySettings, Settings};
