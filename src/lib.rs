pub mod auth;
pub mod cnpj_finder;
pub mod config;
pub mod enrichment_service;
pub mod pipeline;
pub mod report;
pub mod seller;
pub mod spreadsheet;
