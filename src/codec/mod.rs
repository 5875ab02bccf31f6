// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Byte-level plumbing for the serialization envelope.
//!
//! The wire format is little-endian throughout, so only the LE accessors
//! exist here.

use std::io;
use std::io::Cursor;
use std::io::Read;

/// A growable byte sink used when serializing a sketch.
pub(crate) struct SketchWriter {
    bytes: Vec<u8>,
}

impl SketchWriter {
    /// Constructs an empty writer with at least the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Consumes the writer and returns the underlying bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_u8(&mut self, n: u8) {
        self.bytes.push(n);
    }

    pub fn write_u16_le(&mut self, n: u16) {
        self.bytes.extend_from_slice(&n.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, n: u32) {
        self.bytes.extend_from_slice(&n.to_le_bytes());
    }

    pub fn write_f64_le(&mut self, n: f64) {
        self.bytes.extend_from_slice(&n.to_le_bytes());
    }
}

/// A cursor over a serialized sketch.
pub(crate) struct SketchReader<'a> {
    slice: Cursor<&'a [u8]>,
}

impl SketchReader<'_> {
    pub fn new(slice: &[u8]) -> SketchReader<'_> {
        SketchReader {
            slice: Cursor::new(slice),
        }
    }

    /// The number of bytes not yet consumed.
    pub fn remaining(&self) -> u64 {
        (self.slice.get_ref().len() as u64).saturating_sub(self.slice.position())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.slice.read_exact(buf)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16_le(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32_le(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_f64_le(&mut self) -> io::Result<f64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }
}
