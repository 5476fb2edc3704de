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
use crate::checksum;
use crate::protocol::*;
use crate::serial::SerialLink;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum SenderError {
    Io(std::io::Error),
    RetryLimitExceeded(usize),
    TransferComplete,
}

impl std::fmt::Display for SenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderError::Io(e) => write!(f, "I/O error: {}", e),
            SenderError::RetryLimitExceeded(n) => {
                write!(f, "Gave up after {} retransmissions of one byte", n)
            }
            SenderError::TransferComplete => write!(f, "Transfer complete"),
        }
    }
}

impl std::error::Error for SenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SenderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SenderError {
    fn from(err: std::io::Error) -> Self {
        SenderError::Io(err)
    }
}

// ============================================================================
// States
// ============================================================================

pub struct LoadUnit;
pub struct SendUnit;
pub struct AwaitAck;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<'a, State> {
    state: PhantomData<State>,
    link: &'a mut dyn SerialLink,
    source: Box<dyn Iterator<Item = u8> + Send>,
    unit: [u8; 2],
    finishing: bool,
    retries: usize,
    retry_limit: Option<usize>,
    debug: bool,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState<'a>: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<'a, S> SenderFsm<'a, S> {
    fn transition<T>(self) -> Box<SenderFsm<'a, T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            link: self.link,
            source: self.source,
            unit: self.unit,
            finishing: self.finishing,
            retries: self.retries,
            retry_limit: self.retry_limit,
            debug: self.debug,
        })
    }

    fn io_error(&self, e: std::io::Error) -> SenderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        SenderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> SenderState<'a> for SenderFsm<'a, LoadUnit> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError> {
        let mut fsm = *self;

        let next_byte = match fsm.source.next() {
            Some(byte) => Some(byte),
            None if !fsm.finishing => {
                // Payload exhausted, one final unit carries the sentinel
                fsm.finishing = true;
                Some(SENTINEL)
            }
            None => None,
        };

        match next_byte {
            Some(byte) => {
                fsm.unit = [byte, checksum::generate(byte)];
                fsm.retries = 0;
                if fsm.debug {
                    println!("Loaded unit: 0x{:02X} checksum 0x{:02X}", fsm.unit[0], fsm.unit[1]);
                }
                let next = fsm.transition::<SendUnit>();
                Ok(next as Box<dyn SenderState<'a> + 'a>)
            }
            None => Err(SenderError::TransferComplete),
        }
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, SendUnit> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError> {
        let mut fsm = *self;

        match fsm.link.write_all(&fsm.unit) {
            Ok(()) => {
                if fsm.debug {
                    println!("Sent: 0x{:02X} 0x{:02X}", fsm.unit[0], fsm.unit[1]);
                }
                let next = fsm.transition::<AwaitAck>();
                Ok(next as Box<dyn SenderState<'a> + 'a>)
            }
            Err(e) => Err(fsm.io_error(e)),
        }
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, AwaitAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError> {
        let mut fsm = *self;

        let mut buf = [0u8; 1];
        match fsm.link.read_exact(&mut buf) {
            Ok(()) if buf[0] == ACK => {
                if fsm.debug { println!("Received: '1' (ack)"); }
                let next = fsm.transition::<LoadUnit>();
                Ok(next as Box<dyn SenderState<'a> + 'a>)
            }
            Ok(()) => {
                // Anything other than ACK, including garbage, retransmits.
                // The stored unit goes out again unchanged, the checksum is
                // not recomputed.
                if fsm.debug {
                    println!("Received: 0x{:02X} - retransmitting", buf[0]);
                }
                fsm.retries += 1;
                if let Some(limit) = fsm.retry_limit {
                    if fsm.retries > limit {
                        return Err(SenderError::RetryLimitExceeded(fsm.retries));
                    }
                }
                let next = fsm.transition::<SendUnit>();
                Ok(next as Box<dyn SenderState<'a> + 'a>)
            }
            Err(e) => Err(fsm.io_error(e)),
        }
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl<'a> SenderFsm<'a, LoadUnit> {
    pub fn new(
        link: &'a mut dyn SerialLink,
        source: Box<dyn Iterator<Item = u8> + Send>,
        retry_limit: Option<usize>,
        debug: bool,
    ) -> Box<dyn SenderState<'a> + 'a> {
        Box::new(SenderFsm {
            state: PhantomData::<LoadUnit>,
            link,
            source,
            unit: [0; 2],
            finishing: false,
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

    fn run_sender(
        link: &mut dyn SerialLink,
        payload: Vec<u8>,
        retry_limit: Option<usize>,
    ) -> Result<(), SenderError> {
        let mut fsm = SenderFsm::new(link, Box::new(payload.into_iter()), retry_limit, true);
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(SenderError::TransferComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn unit(byte: u8) -> [u8; 2] {
        [byte, checksum::generate(byte)]
    }

    #[test]
    fn test_sender_full_transfer() {
        let responses = vec![ACK, ACK, ACK];

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(&unit(b'A'));
        expected_writes.extend_from_slice(&unit(b'B'));
        expected_writes.extend_from_slice(&unit(SENTINEL));

        let mut mock = MockSerialPort::new(responses, expected_writes);

        run_sender(&mut mock, b"AB".to_vec(), None).expect("Transfer should complete");
    }

    #[test]
    fn test_sender_empty_payload_sends_only_sentinel() {
        let responses = vec![ACK];
        let expected_writes = unit(SENTINEL).to_vec();

        let mut mock = MockSerialPort::new(responses, expected_writes);

        run_sender(&mut mock, Vec::new(), None).expect("Transfer should complete");
    }

    #[test]
    fn test_sender_nak_retransmits_identical_unit() {
        // Two NAKs, so the same unit must appear three times before the
        // sentinel round
        let responses = vec![NAK, NAK, ACK, ACK];

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(&unit(b'Z'));
        expected_writes.extend_from_slice(&unit(b'Z'));
        expected_writes.extend_from_slice(&unit(b'Z'));
        expected_writes.extend_from_slice(&unit(SENTINEL));

        let mut mock = MockSerialPort::new(responses, expected_writes);

        run_sender(&mut mock, vec![b'Z'], None).expect("Transfer should complete");
    }

    #[test]
    fn test_sender_malformed_ack_treated_as_nak() {
        let responses = vec![b'?', ACK, ACK];

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(&unit(b'Q'));
        expected_writes.extend_from_slice(&unit(b'Q'));
        expected_writes.extend_from_slice(&unit(SENTINEL));

        let mut mock = MockSerialPort::new(responses, expected_writes);

        run_sender(&mut mock, vec![b'Q'], None).expect("Transfer should complete");
    }

    #[test]
    fn test_sender_retry_limit_exceeded() {
        let responses = vec![NAK, NAK, NAK];

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(&unit(b'Q'));
        expected_writes.extend_from_slice(&unit(b'Q'));
        expected_writes.extend_from_slice(&unit(b'Q'));

        let mut mock = MockSerialPort::new(responses, expected_writes);

        match run_sender(&mut mock, vec![b'Q'], Some(2)) {
            Err(SenderError::RetryLimitExceeded(3)) => {}
            other => panic!("Expected retry limit error, got: {:?}", other),
        }
    }
}
