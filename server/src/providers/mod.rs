//! Clients for the external identity platform and object storage.
//!
//! Both sit behind traits so the HTTP layer and the admin utilities can be
//! run against the in-memory fakes in [`memory`].

pub mod identity;
pub mod memory;
pub mod storage;
pub mod token;

pub use identity::{
    FirebaseIdentity, IdentityError, IdentityProvider, IdentityRecord, VerifiedToken,
};
pub use memory::{MemoryObjectStorage, StaticIdentityProvider};
pub use storage::{GcsStorage, ObjectStorage, StorageError};
pub use token::AccessTokenSource;
