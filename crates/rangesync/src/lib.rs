//! The partial-transfer core of a peer-to-peer file synchronization client.
//!
//! When a file changes on one peer, the other peers download it. This crate
//! keeps track of which bytes of that file are already here, which ones were
//! asked for, and which ones are still missing. That is what allows a client
//! to:
//!
//! * pull different parts of the same file from many peers at once
//!   (swarming)
//! * pull only the parts that changed since the previous version
//!   (delta-sync)
//!
//! The building blocks are usable on their own: [`range_tree::RangeTree`]
//! maps every byte of a file to a value, [`ring_buffer::CircularByteBuffer`]
//! streams bytes from a connection, [`counter::TransferCounter`] measures
//! throughput and ETA and [`wire`] encodes the messages peers exchange.
//! [`session::TransferSession`] ties them together for one download.
//!
//! # Example
//!
//! ```
//! use rangesync::{
//!     parts::{FilePartsState, PartState},
//!     policy::{self, Link, PartialTransfers},
//!     range::Range,
//! };
//!
//! let cfg = PartialTransfers::default();
//! assert!(policy::use_partial_transfers(true, Link::Lan, &cfg));
//!
//! let mut parts = FilePartsState::new(1024);
//! let first = parts.find_first_part(PartState::Needed).unwrap();
//! assert_eq!(first, Range::by_length(0, 1024));
//!
//! // ask a source for the first half
//! parts.set_part_state(Range::by_length(0, 512), PartState::Pending);
//! assert_eq!(
//!     parts.find_first_part(PartState::Needed),
//!     Some(Range::by_length(512, 512))
//! );
//! ```

pub mod config;
pub mod counter;
pub mod error;
pub mod parts;
pub mod policy;
pub mod range;
pub mod range_tree;
pub mod ring_buffer;
pub mod session;
pub mod utils;
pub mod wire;
