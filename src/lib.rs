//! Physical page allocator built on the buddy system.
//!
//! The allocator manages a fixed table of [page descriptors](mem::Page),
//! one for every physical page frame, and hands out physically contiguous
//! blocks of `2^order` pages.

#![deny(rust_2018_idioms, rustdoc::broken_intra_doc_links)]
#![allow(clippy::missing_safety_doc)]
#![cfg_attr(not(test), no_std)]

pub mod mem;
pub mod unit;
