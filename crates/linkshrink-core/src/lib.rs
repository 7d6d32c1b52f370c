#![doc = include_str!("../README.md")]

mod common;
pub mod storage;

pub use common::*;
