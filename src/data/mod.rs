pub mod csv_store;
pub mod data_service;
pub mod fees;
pub mod info_api_client;
