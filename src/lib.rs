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

//! # Compressed Probabilistic Counting sketch
//!
//! A compact, mergeable data structure that estimates the number of distinct
//! elements in a stream using memory far smaller than the stream's
//! cardinality, with principled confidence intervals and a binary
//! interchange format shared with the sister implementations.
//!
//! ```
//! use cpc_sketch::cpc::CpcSketch;
//!
//! let mut sketch = CpcSketch::new(11)?;
//! for id in 0u64..1000 {
//!     sketch.update_u64(id)?;
//! }
//! let estimate = sketch.estimate();
//! assert!(estimate > 900.0 && estimate < 1100.0);
//!
//! let bytes = sketch.serialize()?;
//! let restored = CpcSketch::deserialize(&bytes)?;
//! assert_eq!(restored.num_coupons(), sketch.num_coupons());
//! # Ok::<(), cpc_sketch::error::Error>(())
//! ```

#![deny(missing_docs)]

pub mod cpc;
pub mod error;

mod codec;
mod common;
mod hash;
