#![no_std]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

pub mod adc;
pub mod counter;
pub mod quadrature;
pub mod smoothing;

pub use counter::{DebouncedButton, EventCounter, LongPress};
pub use quadrature::QuadratureDecoder;
pub use smoothing::ExponentialAverage;
