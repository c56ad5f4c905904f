pub mod cli;
pub mod config;
pub mod runtime;

mod device;
mod indicator;
mod output;
mod pcm;
mod reconnect;
mod replay;
mod resample;
mod store;
