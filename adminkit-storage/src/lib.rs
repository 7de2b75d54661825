//! # adminkit-storage — uniform CRUD behind varied backends
//!
//! Every backend implements the same [`Storage`] contract and advertises
//! [`Capabilities`]; entity managers consume the contract and never care
//! where the data lives.
//!
//! | Adapter | Backend |
//! |---------|---------|
//! | [`ApiStorage`] | An HTTP-like client ([`HttpClient`]; [`ReqwestClient`] is the stock impl) |
//! | [`MemoryStorage`] | In-process rows |
//! | [`LocalStorage`] | A [`KeyValueStore`] holding the collection as one JSON array |
//! | [`MockApiStorage`] | In-memory with write-through persistence under `mockapi:<entity>:data` |
//! | [`SdkStorage`] | A generated SDK ([`SdkClient`]) with declarative operation mapping |
//!
//! The [`storage_factory`] turns config (pattern strings such as
//! `api:/api/books`, `local:books`, `sdk:books`, or structured
//! [`StorageConfig`]) into adapter instances via an extensible
//! [`StorageResolver`].

pub mod api;
pub mod error;
pub mod factory;
pub mod filtering;
pub mod kv;
pub mod local;
pub mod memory;
pub mod mock;
pub mod params;
pub mod sdk;
pub mod storage;

pub use api::{ApiStorage, HttpClient, ReqwestClient};
pub use error::StorageError;
pub use factory::{parse_pattern, storage_factory, StorageConfig, StorageResolver};
pub use kv::{KeyValueStore, MemoryKeyValueStore};
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use mock::MockApiStorage;
pub use params::{ListParams, ListResult, SortOrder};
pub use sdk::{SdkClient, SdkOperation, SdkResponseFormat, SdkStorage};
pub use storage::{
    id_to_key, record_id, Capabilities, Record, RequestOptions, Storage, StorageContext,
};

pub mod prelude {
    //! Re-exports of the most commonly used storage types.
    pub use crate::{
        Capabilities, ListParams, ListResult, Record, Storage, StorageConfig, StorageError,
        StorageResolver,
    };
}
