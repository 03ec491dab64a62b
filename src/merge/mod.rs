pub mod config;
pub mod decision;
pub mod executor;
pub mod fingerprint;
pub mod fsops;
pub mod index;
pub mod plan;
pub mod report;
pub mod scan;
pub mod similarity;
pub mod strategy;
pub mod util;
pub mod warn;
