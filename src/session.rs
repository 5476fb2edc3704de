// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Transfer session wiring: transmit phase, then sampler plus receive phase

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use crate::receiver::{ReceiverError, ReceiverFsm};
use crate::sampler::{RateSink, ThroughputSampler};
use crate::sender::{SenderError, SenderFsm};
use crate::serial::SerialLink;

// ============================================================================
// Configuration
// ============================================================================

pub struct SessionConfig {
    /// Sampling interval for the throughput reporter
    pub sample_interval: Duration,
    /// Consecutive retransmissions tolerated per byte, unbounded when None
    pub retry_limit: Option<usize>,
    /// Enable debug output
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            sample_interval: Duration::from_secs(1),
            retry_limit: None,
            debug: false,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum SessionError {
    Send(SenderError),
    Receive(ReceiverError),
    Io(std::io::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Send(e) => write!(f, "Transmit phase failed: {}", e),
            SessionError::Receive(e) => write!(f, "Receive phase failed: {}", e),
            SessionError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Send(e) => Some(e),
            SessionError::Receive(e) => Some(e),
            SessionError::Io(e) => Some(e),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Run one complete transfer: stream the payload to the peer byte by byte,
/// then collect its reply until the sentinel, sampling throughput while the
/// reply is in flight.
///
/// The two phases are strictly sequential, the link is half duplex. Only the
/// sampler runs concurrently with the receive phase, and it touches nothing
/// but the byte counter and the link's queue-depth query.
///
/// On a fatal link error the partial reply is discarded.
pub fn run(
    link: &mut dyn SerialLink,
    source: Box<dyn Iterator<Item = u8> + Send>,
    sink: Box<dyn RateSink>,
    config: &SessionConfig,
) -> Result<Vec<u8>, SessionError> {
    transmit(link, source, config)?;
    println!("Transmission complete, awaiting reply...");

    let byte_counter = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let monitor = link.monitor().map_err(SessionError::Io)?;
    let sampler = ThroughputSampler::new(
        Arc::clone(&byte_counter),
        Arc::clone(&stop),
        monitor,
        config.sample_interval,
        sink,
    );
    let handle = sampler.spawn().map_err(SessionError::Io)?;

    let mut received = Vec::new();
    let result = receive(link, &mut received, byte_counter, config);

    // Receiver completion, clean or not, ends the sampling window. The
    // sampler notices within one interval.
    stop.store(true, Ordering::Relaxed);
    let _ = handle.join();

    result.map(|()| received)
}

fn transmit(
    link: &mut dyn SerialLink,
    source: Box<dyn Iterator<Item = u8> + Send>,
    config: &SessionConfig,
) -> Result<(), SessionError> {
    let mut state = SenderFsm::new(link, source, config.retry_limit, config.debug);

    loop {
        match state.step() {
            Ok(next) => state = next,
            Err(SenderError::TransferComplete) => return Ok(()),
            Err(e) => return Err(SessionError::Send(e)),
        }
    }
}

fn receive(
    link: &mut dyn SerialLink,
    received: &mut Vec<u8>,
    byte_counter: Arc<AtomicUsize>,
    config: &SessionConfig,
) -> Result<(), SessionError> {
    let mut state = ReceiverFsm::new(link, received, byte_counter, config.retry_limit, config.debug);

    loop {
        match state.step() {
            Ok(next) => state = next,
            Err(ReceiverError::TransferComplete) => return Ok(()),
            Err(e) => return Err(SessionError::Receive(e)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::SystemTime;
    use crate::checksum;
    use crate::protocol::*;
    use crate::serial::MockSerialPort;

    struct CollectingSink {
        rates: Arc<Mutex<Vec<f64>>>,
    }

    impl RateSink for CollectingSink {
        fn report(&mut self, _timestamp: SystemTime, bits_per_second: f64) {
            self.rates.lock().unwrap().push(bits_per_second);
        }
    }

    fn unit(byte: u8) -> [u8; 2] {
        [byte, checksum::generate(byte)]
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            sample_interval: Duration::from_millis(10),
            retry_limit: None,
            debug: true,
        }
    }

    #[test]
    fn test_session_round_trip() {
        // Peer acks "AB" plus the sentinel, then replies "OK" plus the
        // sentinel
        let mut responses = vec![ACK, ACK, ACK];
        responses.extend_from_slice(&unit(b'O'));
        responses.extend_from_slice(&unit(b'K'));
        responses.extend_from_slice(&unit(SENTINEL));

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(&unit(b'A'));
        expected_writes.extend_from_slice(&unit(b'B'));
        expected_writes.extend_from_slice(&unit(SENTINEL));
        expected_writes.extend_from_slice(&[ACK, ACK, ACK]);

        let mut mock = MockSerialPort::new(responses, expected_writes);
        let rates = Arc::new(Mutex::new(Vec::new()));
        let sink = Box::new(CollectingSink { rates: Arc::clone(&rates) });

        let reply = run(&mut mock, Box::new(b"AB".to_vec().into_iter()), sink, &test_config())
            .expect("Session should complete");

        assert_eq!(reply, vec![b'O', b'K', SENTINEL]);
        // The sampler ticks at least once before it is told to stop
        assert!(!rates.lock().unwrap().is_empty());
    }

    #[test]
    fn test_session_with_retransmissions_both_directions() {
        let good = unit(b'Q');

        // One NAK on our 'A', one corrupt delivery of the peer's 'Q'
        let mut responses = vec![NAK, ACK, ACK];
        responses.extend_from_slice(&[b'Q', good[1] ^ 0xFF]);
        responses.extend_from_slice(&good);
        responses.extend_from_slice(&unit(SENTINEL));

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(&unit(b'A'));
        expected_writes.extend_from_slice(&unit(b'A'));
        expected_writes.extend_from_slice(&unit(SENTINEL));
        expected_writes.extend_from_slice(&[NAK, ACK, ACK]);

        let mut mock = MockSerialPort::new(responses, expected_writes);
        let rates = Arc::new(Mutex::new(Vec::new()));
        let sink = Box::new(CollectingSink { rates });

        let reply = run(&mut mock, Box::new(vec![b'A'].into_iter()), sink, &test_config())
            .expect("Session should complete");

        assert_eq!(reply, vec![b'Q', SENTINEL]);
    }

    #[test]
    fn test_session_transmit_failure_aborts_before_receive() {
        let responses = vec![NAK];
        let expected_writes = unit(b'A').to_vec();

        let mut mock = MockSerialPort::new(responses, expected_writes);
        let rates = Arc::new(Mutex::new(Vec::new()));
        let sink = Box::new(CollectingSink { rates: Arc::clone(&rates) });

        let config = SessionConfig {
            retry_limit: Some(0),
            ..test_config()
        };

        match run(&mut mock, Box::new(vec![b'A'].into_iter()), sink, &config) {
            Err(SessionError::Send(SenderError::RetryLimitExceeded(1))) => {}
            other => panic!("Expected transmit failure, got: {:?}", other.map(|_| ())),
        }

        // Sampler never started
        assert!(rates.lock().unwrap().is_empty());
    }
}
