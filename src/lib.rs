pub mod api;
pub mod collect;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod external;
pub mod orchestration;

pub use collect::{RequestCollector, SubmitError, ValidationError};
pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    Address, BatchRecord, Decimal, Epoch, OpType, OperationRequest, PoolId, PoolLedgerState,
    RequestId, RoundId,
};
pub use error::AppError;
pub use orchestration::{LedgerRegistry, RoundCoordinator, RoundReport};
