pub mod assignment;
pub mod auto_assign;
pub mod auto_release;
pub mod availability;
pub mod ledger;
pub mod notifier;
pub mod queue;
pub mod ranking;
pub mod sweeps;
