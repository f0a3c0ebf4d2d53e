pub mod archive;
pub mod compositor;
pub mod config;
pub mod db;
pub mod db_pool;
pub mod db_schema;
pub mod export;
pub mod export_error;
pub mod fetcher;
pub mod handlers_collections;
pub mod handlers_export;
pub mod handlers_health;
pub mod handlers_watermark;
pub mod paging;
pub mod retry;
pub mod routes;
pub mod warp_helpers;
