#![no_std]
extern crate alloc;

pub mod endian;
pub mod sync;
pub mod time;
