pub mod analysis;
pub mod config;
pub mod consts;
pub mod data;
pub mod docs;
pub mod handlers;
pub mod optimization;
pub mod portfolio;
pub mod series;
pub mod web_app;
