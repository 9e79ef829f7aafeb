//! Chamber backend contract
//!
//! Both transports (a local serial line and a `chamberd` relay) implement
//! [`ChamberBackend`]. The polling helpers here are shared by the backends
//! and by the [`Chamber`](crate::Chamber) façade.

use std::time::Duration;

use ch_error::Result;
use tracing::warn;

use crate::constants::convergence::{SETTLE_POLLS, TOLERANCE};
use crate::descriptor::Channel;
use crate::point::TemperaturePoint;
use crate::RefMode;

/// Capability contract of a chamber transport
///
/// Every method takes `&self`; implementations serialize access to their
/// transport internally so one backend can be shared between threads.
#[cfg_attr(test, mockall::automock)]
pub trait ChamberBackend: Send + Sync {
    /// Open `port` (a serial port name or a relay device id). Any previously
    /// open resource is closed first.
    fn open(&self, port: &str, channel: Channel) -> Result<()>;

    /// Release the transport. Never fails; problems are logged.
    fn close(&self);

    fn turn_on(&self) -> Result<()>;

    fn turn_off(&self) -> Result<()>;

    /// Hold `target` and block until the reported target is within tolerance
    fn go_temp(&self, target: f64, ref_mode: RefMode) -> Result<()>;

    /// Ramp linearly from the current monitored value to `target` over `duration`
    fn go_temp_ramp(&self, target: f64, duration: Duration, ref_mode: RefMode) -> Result<()>;

    /// Read monitored/target, retrying once on a transport fault
    fn temperature(&self) -> Result<TemperaturePoint>;

    /// Canonical model label, or "Unknown Chamber"
    fn info(&self) -> String;
}

/// Run `op`, running it a second time if the first attempt hit a transport
/// fault. Device-reported errors are returned immediately.
pub fn retry_once<T>(what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    match op() {
        Err(e) if e.is_transport_fault() => {
            warn!("{} failed, retrying once: {}", what, e);
            op()
        }
        other => other,
    }
}

/// Poll until the reported target is within [`TOLERANCE`] of `target`.
///
/// Tight loop with no sleep; the controller answers slowly enough on its own.
/// The first read error aborts the wait.
pub fn wait_for_target(
    target: f64,
    mut read: impl FnMut() -> Result<TemperaturePoint>,
) -> Result<TemperaturePoint> {
    loop {
        let point = read()?;
        if (point.target() - target).abs() <= TOLERANCE {
            return Ok(point);
        }
    }
}

/// Discard [`SETTLE_POLLS`] readings after a ramp program is issued
pub fn settle(mut read: impl FnMut() -> Result<TemperaturePoint>) -> Result<()> {
    for _ in 0..SETTLE_POLLS {
        read()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ch_error::ChamberError;
    use std::collections::VecDeque;
    use std::io;

    fn timeout() -> ChamberError {
        ChamberError::connection("TEMP?", io::Error::new(io::ErrorKind::TimedOut, "timed out"))
    }

    #[test]
    fn test_retry_once_recovers_from_single_fault() {
        let mut attempts = 0;
        let value = retry_once("read", || {
            attempts += 1;
            if attempts == 1 { Err(timeout()) } else { Ok(42) }
        })
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_retry_once_propagates_second_fault() {
        let mut attempts = 0;
        let err = retry_once::<()>("read", || {
            attempts += 1;
            Err(timeout())
        })
        .unwrap_err();
        assert!(matches!(err, ChamberError::ConnectionFailure { .. }));
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_retry_once_skips_protocol_errors() {
        let mut attempts = 0;
        let err = retry_once::<()>("read", || {
            attempts += 1;
            Err(ChamberError::protocol("E123"))
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "E123");
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_wait_for_target_stops_on_first_converged_reading() {
        let mut readings: VecDeque<f64> = VecDeque::from(vec![20.0, 24.0, 24.94, 25.04, 25.0, 25.0]);
        let mut reads = 0;
        let point = wait_for_target(25.0, || {
            reads += 1;
            let target = readings.pop_front().expect("loop read past convergence");
            Ok(TemperaturePoint::now(22.0, target))
        })
        .unwrap();
        assert_eq!(reads, 4);
        assert_eq!(point.target(), 25.04);
        assert_eq!(readings.len(), 2);
    }

    #[test]
    fn test_wait_for_target_aborts_on_error() {
        let mut reads = 0;
        let err = wait_for_target(25.0, || {
            reads += 1;
            if reads < 3 { Ok(TemperaturePoint::now(20.0, 20.0)) } else { Err(timeout()) }
        })
        .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(reads, 3);
    }

    #[test]
    fn test_settle_polls_exactly_five_times() {
        let mut reads = 0;
        settle(|| {
            reads += 1;
            Ok(TemperaturePoint::now(20.0, 85.0))
        })
        .unwrap();
        assert_eq!(reads, 5);
    }
}
