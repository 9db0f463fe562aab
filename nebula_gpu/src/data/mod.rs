/// Data module - index-space primitives shared by GPU allocators

pub mod range_set;

pub use range_set::*;
