//! Kernel error type.

use thiserror::Error;

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Types(#[from] legator_types::TypesError),

    #[error(transparent)]
    Store(#[from] legator_store::StoreError),

    #[error(transparent)]
    Runtime(#[from] legator_runtime::RuntimeError),

    #[error("multicluster: {0}")]
    Multicluster(String),
}
