pub mod encryption;
pub mod executor;
pub mod ledger;
pub mod orchestrator;
pub mod pipeline;
pub mod preprocess;
pub mod queue;
pub mod rate_limit;
pub mod storage;
pub mod vision;
pub mod voucher;
pub mod workers_ai;
