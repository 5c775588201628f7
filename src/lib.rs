//! Refractor: a blockchain-agnostic pending-transaction store and
//! multi-signature aggregator.
//!
//! A client submits an unsigned or partially signed transaction; Refractor
//! computes its canonical hash, discovers which signers may satisfy the
//! signing policy, accepts further signatures from independent co-signers,
//! and once the threshold is met submits the transaction to the target
//! network and/or delivers it to a client-supplied callback URL.
//!
//! # Modules
//!
//! - [`registry`] – Static catalog of blockchains, networks, passphrases,
//!   chain ids and default encodings.
//! - [`tx_uri`] – Simple and CAIP-2 transaction URI codec.
//! - [`request`] – Normalizer folding the three accepted submission shapes
//!   into one internal record.
//! - [`chain`] – The per-chain handler capability set, with Stellar, EVM
//!   family and 1Money implementations.
//! - [`engine`] – The signer engine orchestrating hash, signature merge
//!   and feasibility per submission.
//! - [`store`] – The data provider abstraction with Postgres and in-memory
//!   implementations.
//! - [`queue`] – The adaptive finalization worker pool.
//! - [`finalizer`] – The polling loop, finalization task body and
//!   expiration sweep.
//! - [`submit`] – Chain submission and callback delivery clients.
//! - [`handlers`] – The Axum HTTP surface.
//! - [`config`] – Environment and CLI configuration.

pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod finalizer;
pub mod handlers;
pub mod queue;
pub mod registry;
pub mod request;
pub mod store;
pub mod submit;
pub mod tx_uri;
pub mod types;
pub mod util;
