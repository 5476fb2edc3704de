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

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::checksum;
use crate::protocol::*;
use crate::serial::SerialLink;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum ReceiverError {
    Io(std::io::Error),
    RetryLimitExceeded(usize),
    TransferComplete,
}

impl std::fmt::Display for ReceiverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiverError::Io(e) => write!(f, "I/O error: {}", e),
            ReceiverError::RetryLimitExceeded(n) => {
                write!(f, "Gave up after {} rejected deliveries of one byte", n)
            }
            ReceiverError::TransferComplete => write!(f, "Transfer complete"),
        }
    }
}

impl std::error::Error for ReceiverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReceiverError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReceiverError {
    fn from(err: std::io::Error) -> Self {
        ReceiverError::Io(err)
    }
}

// ============================================================================
// States
// ============================================================================

pub struct ReadUnit;
pub struct VerifyUnit;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<'a, State> {
    state: PhantomData<State>,
    link: &'a mut dyn SerialLink,
    received: &'a mut Vec<u8>,
    byte_counter: Arc<AtomicUsize>,
    unit: [u8; 2],
    retries: usize,
    retry_limit: Option<usize>,
    debug: bool,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState<'a>: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState<'a> + 'a>, ReceiverError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<'a, S> ReceiverFsm<'a, S> {
    fn transition<T>(self) -> Box<ReceiverFsm<'a, T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            link: self.link,
            received: self.received,
            byte_counter: self.byte_counter,
            unit: self.unit,
            retries: self.retries,
            retry_limit: self.retry_limit,
            debug: self.debug,
        })
    }

    fn io_error(&self, e: std::io::Error) -> ReceiverError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        ReceiverError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, ReadUnit> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState<'a> + 'a>, ReceiverError> {
        let mut fsm = *self;

        let mut unit = [0u8; 2];
        match fsm.link.read_exact(&mut unit) {
            Ok(()) => {
                fsm.unit = unit;
                // Retransmitted traffic counts toward the observed rate,
                // so the counter is bumped before verification
                fsm.byte_counter.fetch_add(2, Ordering::Relaxed);
                if fsm.debug {
                    println!("Received: 0x{:02X} checksum 0x{:02X}", fsm.unit[0], fsm.unit[1]);
                }
                let next = fsm.transition::<VerifyUnit>();
                Ok(next as Box<dyn ReceiverState<'a> + 'a>)
            }
            Err(e) => Err(fsm.io_error(e)),
        }
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, VerifyUnit> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState<'a> + 'a>, ReceiverError> {
        let mut fsm = *self;

        if checksum::verify(fsm.unit[0], fsm.unit[1]) {
            fsm.received.push(fsm.unit[0]);
            fsm.retries = 0;

            match fsm.link.write_all(&[ACK]) {
                Ok(()) => {
                    if fsm.debug { println!("Sent: '1' (ack)"); }
                }
                Err(e) => return Err(fsm.io_error(e)),
            }

            if fsm.unit[0] == SENTINEL {
                if fsm.debug { println!("Sentinel accepted, stream complete"); }
                Err(ReceiverError::TransferComplete)
            } else {
                let next = fsm.transition::<ReadUnit>();
                Ok(next as Box<dyn ReceiverState<'a> + 'a>)
            }
        } else {
            if fsm.debug { println!("Checksum mismatch!"); }

            match fsm.link.write_all(&[NAK]) {
                Ok(()) => {
                    if fsm.debug { println!("Sent: '0' (nak)"); }
                }
                Err(e) => return Err(fsm.io_error(e)),
            }

            fsm.retries += 1;
            if let Some(limit) = fsm.retry_limit {
                if fsm.retries > limit {
                    return Err(ReceiverError::RetryLimitExceeded(fsm.retries));
                }
            }

            let next = fsm.transition::<ReadUnit>();
            Ok(next as Box<dyn ReceiverState<'a> + 'a>)
        }
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl<'a> ReceiverFsm<'a, ReadUnit> {
    pub fn new(
        link: &'a mut dyn SerialLink,
        received: &'a mut Vec<u8>,
        byte_counter: Arc<AtomicUsize>,
        retry_limit: Option<usize>,
        debug: bool,
    ) -> Box<dyn ReceiverState<'a> + 'a> {
        Box::new(ReceiverFsm {
            state: PhantomData::<ReadUnit>,
            link,
            received,
            byte_counter,
            unit: [0; 2],
            retries: 0,
            retry_limit,
            debug,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;

    fn run_receiver(
        link: &mut dyn SerialLink,
        received: &mut Vec<u8>,
        byte_counter: Arc<AtomicUsize>,
        retry_limit: Option<usize>,
    ) -> Result<(), ReceiverError> {
        let mut fsm = ReceiverFsm::new(link, received, byte_counter, retry_limit, true);
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(ReceiverError::TransferComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn unit(byte: u8) -> [u8; 2] {
        [byte, checksum::generate(byte)]
    }

    #[test]
    fn test_receiver_full_transfer() {
        let mut responses = Vec::new();
        responses.extend_from_slice(&unit(b'h'));
        responses.extend_from_slice(&unit(b'i'));
        responses.extend_from_slice(&unit(SENTINEL));

        let expected_writes = vec![ACK, ACK, ACK];

        let mut mock = MockSerialPort::new(responses, expected_writes);
        let mut received = Vec::new();
        let counter = Arc::new(AtomicUsize::new(0));

        run_receiver(&mut mock, &mut received, Arc::clone(&counter), None)
            .expect("Transfer should complete");

        assert_eq!(received, vec![b'h', b'i', SENTINEL]);
        assert_eq!(counter.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_receiver_corrupt_unit_naked_then_accepted() {
        let good = unit(b'Q');

        let mut responses = Vec::new();
        responses.extend_from_slice(&[b'Q', good[1] ^ 0xFF]);
        responses.extend_from_slice(&good);
        responses.extend_from_slice(&unit(SENTINEL));

        // Exactly one NAK then one ACK for the corrupted position
        let expected_writes = vec![NAK, ACK, ACK];

        let mut mock = MockSerialPort::new(responses, expected_writes);
        let mut received = Vec::new();
        let counter = Arc::new(AtomicUsize::new(0));

        run_receiver(&mut mock, &mut received, Arc::clone(&counter), None)
            .expect("Transfer should complete");

        assert_eq!(received, vec![b'Q', SENTINEL]);
        // The rejected pair still counts: three reads of two bytes each
        assert_eq!(counter.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_receiver_corrupt_sentinel_does_not_terminate() {
        let mut responses = Vec::new();
        responses.extend_from_slice(&[SENTINEL, 0x55]);
        responses.extend_from_slice(&unit(SENTINEL));

        let expected_writes = vec![NAK, ACK];

        let mut mock = MockSerialPort::new(responses, expected_writes);
        let mut received = Vec::new();
        let counter = Arc::new(AtomicUsize::new(0));

        run_receiver(&mut mock, &mut received, Arc::clone(&counter), None)
            .expect("Transfer should complete");

        assert_eq!(received, vec![SENTINEL]);
        assert_eq!(counter.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_receiver_retry_limit_exceeded() {
        let good = unit(b'Q');

        let mut responses = Vec::new();
        responses.extend_from_slice(&[b'Q', good[1] ^ 0x01]);
        responses.extend_from_slice(&[b'Q', good[1] ^ 0x01]);

        let expected_writes = vec![NAK, NAK];

        let mut mock = MockSerialPort::new(responses, expected_writes);
        let mut received = Vec::new();
        let counter = Arc::new(AtomicUsize::new(0));

        match run_receiver(&mut mock, &mut received, counter, Some(1)) {
            Err(ReceiverError::RetryLimitExceeded(2)) => {}
            other => panic!("Expected retry limit error, got: {:?}", other),
        }

        assert!(received.is_empty());
    }
}
