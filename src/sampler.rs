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

//! Periodic throughput sampling for the receive phase

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};
use crate::protocol::BITS_PER_WIRE_BYTE;
use crate::serial::LinkMonitor;

/// Receives one throughput figure per sampling tick
pub trait RateSink: Send {
    fn report(&mut self, timestamp: SystemTime, bits_per_second: f64);
}

/// Background task reporting the observed line rate while a receive is in
/// flight.
///
/// Ticks once immediately on start and then once per interval. Each tick
/// drains the shared byte counter, adds the bytes sitting unread in the
/// link's receive queue, and converts the total to wire bits per second.
/// The stop flag is only checked between ticks, so the final tick can fire
/// up to one interval after the transfer finishes.
pub struct ThroughputSampler {
    byte_counter: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    monitor: Box<dyn LinkMonitor>,
    interval: Duration,
    sink: Box<dyn RateSink>,
}

impl ThroughputSampler {
    pub fn new(
        byte_counter: Arc<AtomicUsize>,
        stop: Arc<AtomicBool>,
        monitor: Box<dyn LinkMonitor>,
        interval: Duration,
        sink: Box<dyn RateSink>,
    ) -> Self {
        ThroughputSampler {
            byte_counter,
            stop,
            monitor,
            interval,
            sink,
        }
    }

    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("throughput-sampler".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        loop {
            self.tick();
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            thread::sleep(self.interval);
        }
    }

    fn tick(&mut self) {
        // Swap-to-zero: increments landing between a read and a separate
        // reset would be lost
        let delta = self.byte_counter.swap(0, Ordering::Relaxed);
        let buffered = self.monitor.buffered().unwrap_or(0);
        let bits = (delta + buffered) * BITS_PER_WIRE_BYTE;
        let rate = bits as f64 / self.interval.as_secs_f64();
        self.sink.report(SystemTime::now(), rate);
    }
}

// ============================================================================
// Tests
// ============================================================================
