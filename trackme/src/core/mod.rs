/*!
Core architecture modules for the consent-gated tracker
*/

pub mod config;
pub mod consent;
pub mod error;
pub mod event;
pub mod listener;
pub mod sink;
pub mod tracker;
