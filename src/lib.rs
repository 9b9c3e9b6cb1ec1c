pub mod app;
pub mod catalog;
pub mod columnar;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod gbfs;
pub mod http;
pub mod memo;
pub mod normalize;
pub mod output;
pub mod publish;
pub mod retry;
pub mod store;
