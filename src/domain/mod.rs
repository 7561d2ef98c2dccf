//! Pure business rules: no I/O, no clock reads. Every function takes the
//! current instant as a parameter so the route layer owns the time source.

pub mod billing;
pub mod lifecycle;
pub mod ownership;
pub mod scheduling;
