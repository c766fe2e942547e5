//! Integration test modules

mod delay;
mod fan_in;
mod leaks;
mod wait_for;
