#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod app;
