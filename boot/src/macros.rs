//! Logging.
//!
//! With the `defmt` feature the macros forward to defmt, which the board
//! binary wires to RTT.  Without it they vanish, which is what host tests and
//! size-constrained builds get.

#[cfg(feature = "defmt")]
macro_rules! debug {
    ($($arg:tt)*) => { defmt::debug!($($arg)*) };
}

#[cfg(feature = "defmt")]
macro_rules! info {
    ($($arg:tt)*) => { defmt::info!($($arg)*) };
}

#[cfg(feature = "defmt")]
macro_rules! warn {
    ($($arg:tt)*) => { defmt::warn!($($arg)*) };
}

#[cfg(not(feature = "defmt"))]
macro_rules! debug {
    ($($_e:expr),+ $(,)?) => {{ $( let _ = &$_e; )+ }};
}

#[cfg(not(feature = "defmt"))]
macro_rules! info {
    ($($_e:expr),+ $(,)?) => {{ $( let _ = &$_e; )+ }};
}

#[cfg(not(feature = "defmt"))]
macro_rules! warn {
    ($($_e:expr),+ $(,)?) => {{ $( let _ = &$_e; )+ }};
}
