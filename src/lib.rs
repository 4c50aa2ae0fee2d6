// Library interface for rust_manga_multisrc
// Listing/filter adapters and the translated-page overlay compositor

pub mod adapter;
pub mod config;
pub mod dates;
pub mod discovery;
pub mod error;
pub mod filters;
pub mod http_client;
pub mod listing;
pub mod listing_parser;
pub mod models;
pub mod overlay;

pub use error::{Result, SourceError};
