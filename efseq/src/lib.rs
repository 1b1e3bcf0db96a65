#![doc = include_str!("../README.md")]

mod elias_fano;
pub use elias_fano::{Builder, Sequence, Iter};
