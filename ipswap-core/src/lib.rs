#![doc = "ipswap-core: core pipeline library for ipswap."]

//! This crate holds the batch transformation driver and everything it leans on:
//! loading images into data payloads, extracting the result image from a free-form
//! model response, and the append-only ledger that makes a run resumable.
//!
//! # Usage
//! The `ipswap` binary wires the real HTTP client into [`batch::BatchDriver`].
//! Tests substitute the ports in [`contract`] with mocks or hand-written fakes.

pub mod asset;
pub mod batch;
pub mod client;
pub mod config;
pub mod contract;
pub mod discover;
pub mod extract;
pub mod failure;
pub mod ledger;
pub mod naming;
pub mod prompt;
