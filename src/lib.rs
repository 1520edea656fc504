pub mod cli;
pub mod config;
pub mod crawler;
pub mod relay;
pub mod source;
pub mod storage;
pub mod web;
