pub mod buffer;
pub mod codec;
pub mod config;
pub mod event;
pub mod identity;
pub mod output;
pub mod remote;
pub mod session;
pub mod status;
pub mod writer;

#[cfg(test)]
mod testing;
