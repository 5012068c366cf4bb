//! Backend of the kiosk room display.
//!
//! Listens for Teams presence events on an MQTT topic derived from the host
//! name and pushes connection, call and meeting state to the display surface.

pub mod config;
pub mod controller;
pub mod display;
pub mod ingestion;
pub mod models;
pub mod mqtt_service;
pub mod payload;
pub mod reconcile;
pub mod rest_server;
pub mod service_utils;
pub mod topic;
pub mod transport;
