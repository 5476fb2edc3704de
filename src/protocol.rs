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

//! BYTELINK protocol constants

/// Acknowledge - receiver accepted the unit, sender advances to the next byte
pub const ACK: u8 = b'1';

/// Negative acknowledge - checksum failed, sender retransmits the same unit
pub const NAK: u8 = b'0';

/// End of stream - terminates a transfer in either direction
pub const SENTINEL: u8 = 0x00;

/// CRC-8 generator polynomial, MSB-first, no reflection, no init/final XOR
pub const POLYNOMIAL: u8 = 0xE7;

/// Bits on the wire per payload byte (8 data bits plus start and stop bits),
/// used to convert byte counts into line-rate bits
pub const BITS_PER_WIRE_BYTE: usize = 10;
