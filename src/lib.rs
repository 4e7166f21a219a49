//! Data manager for a small MQTT smart-home setup: ingests sensor readings, keeps a SQLite
//! history, drives a relay with hysteresis and raises high-temperature alerts.

pub mod config;
pub mod manager;
pub mod mqtt;
pub mod persistence;
