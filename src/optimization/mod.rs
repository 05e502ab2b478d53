pub mod constraints;
pub mod objective;
pub mod portfolio_search;
pub mod portfolio_service;
