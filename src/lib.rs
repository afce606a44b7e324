//! Nalu - Single-use discount vouchers
//!
//! This library provides the voucher store, the staff session gate and the
//! HTTP API around them.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
