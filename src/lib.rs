//! Crash-resumable bulk download of genomic alignment files.
//!
//! A tab-separated requests file (the ledger) lists one file per row. Each
//! run scans it for rows that still need work, checks availability with the
//! remote catalog, drives the transfer client with bounded retries, and in
//! cached mode stages and checksum-verifies the file before promoting it.
//! Every state change is written back to the ledger before the next step, so
//! an interrupted run resumes from the last recorded state.

pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod output;
pub mod process;
pub mod reaper;
pub mod scanner;
pub mod staging;
pub mod summary;
pub mod transfer;
