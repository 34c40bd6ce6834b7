pub mod assignment;
pub mod journey;
pub mod ledger;
pub mod queue;
pub mod staff;
pub mod vehicle;
