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

use std::time::{Duration, Instant};
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};

// ============================================================================
// SerialLink Trait
// ============================================================================

/// Trait for serial link operations needed by the bytelink protocol
pub trait SerialLink: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Fill `buf` completely. Blocks until enough bytes arrive, or until the
    /// link's optional read deadline expires.
    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()>;

    /// Detach a handle for the throughput sampler. The handle only queries
    /// the receive queue depth and never touches the data path.
    fn monitor(&self) -> std::io::Result<Box<dyn LinkMonitor>>;
}

/// Non-mutating view of a link held by the sampler thread
pub trait LinkMonitor: Send {
    /// Bytes received by the driver but not yet read by the transfer loop
    fn buffered(&self) -> std::io::Result<usize>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Poll granularity for the blocking read loop
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
    read_deadline: Option<Duration>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
        read_deadline: Option<Duration>,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(POLL_TIMEOUT)
            .open()?;

        Ok(RealSerialPort { port, read_deadline })
    }
}

impl SerialLink for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        let deadline = self.read_deadline.map(|limit| Instant::now() + limit);
        let mut filled = 0;

        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => {}
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return Err(std::io::Error::new(
                                std::io::ErrorKind::TimedOut,
                                "no data from peer before read deadline",
                            ));
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn monitor(&self) -> std::io::Result<Box<dyn LinkMonitor>> {
        let handle = self.port.try_clone()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(Box::new(RealPortMonitor { port: handle }))
    }
}

/// Cloned device handle used only for the input-queue depth query
struct RealPortMonitor {
    port: Box<dyn SerialPortTrait>,
}

impl LinkMonitor for RealPortMonitor {
    fn buffered(&self) -> std::io::Result<usize> {
        self.port.bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Bytes the peer will produce, in read order
    read_buffer: Vec<u8>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<u8>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl SerialLink for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        for slot in buf.iter_mut() {
            if self.read_pos >= self.read_buffer.len() {
                // A real link would block forever here
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "Mock out of scripted bytes",
                ));
            }
            *slot = self.read_buffer[self.read_pos];
            self.read_pos += 1;
        }
        Ok(())
    }

    fn monitor(&self) -> std::io::Result<Box<dyn LinkMonitor>> {
        // Scripted reads are consumed synchronously, nothing ever queues
        Ok(Box::new(MockMonitor { buffered: 0 }))
    }
}

#[cfg(test)]
pub struct MockMonitor {
    pub buffered: usize,
}

#[cfg(test)]
impl LinkMonitor for MockMonitor {
    fn buffered(&self) -> std::io::Result<usize> {
        Ok(self.buffered)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
