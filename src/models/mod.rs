pub mod account;
pub mod job;
pub mod verification;
pub mod voucher;
