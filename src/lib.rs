pub mod config;
pub mod env;
pub mod ledger;
pub mod payment;
pub mod rabbitmq;
pub mod supervisor;
pub mod transaction;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
#[doc(hidden)]
pub mod testing;
