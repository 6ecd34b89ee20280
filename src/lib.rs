pub mod app;
pub mod catalog;
pub mod config;
pub mod documents;
pub mod domain;
pub mod encoding;
pub mod error;
mod http;
pub mod output;
pub mod starter;
pub mod storage;
