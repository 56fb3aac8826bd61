pub mod ledger;
pub mod migration_ops;
pub mod normalization;
pub mod platform;
pub mod tracing;

pub mod util {
    pub mod db;
    pub mod env;
}
