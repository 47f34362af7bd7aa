pub mod commands;
pub mod controller;
pub mod device_cache;
pub mod entities;
pub mod homie;
pub mod output;
pub mod poll;
pub mod replay;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;
