//! Integration tests for bstk_butler
//!
//! Most tests run against the in-process `MemoryServer` and need nothing
//! external. `live_server` additionally talks to a real beanstalkd when
//! `TEST_BSTK_ADDR` is set (e.g. `TEST_BSTK_ADDR=127.0.0.1:11300`).
//!
//! Run with: cargo test --test integration

mod helpers;

mod facade;
mod live_server;
mod roulette;
