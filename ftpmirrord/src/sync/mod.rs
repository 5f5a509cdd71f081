pub mod engine;
pub mod ledger;
pub mod paths;
pub mod policy;
