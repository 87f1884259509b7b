pub mod codec;
pub mod db;
pub mod engine;
pub mod history;
pub mod models;
pub mod remote;
