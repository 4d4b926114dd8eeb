#![allow(dead_code)]

pub mod helpers;
pub mod memory_store;
pub mod scripted_chain;
