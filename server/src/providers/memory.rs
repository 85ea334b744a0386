//! In-process providers for tests and offline runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{
    IdentityError, IdentityProvider, IdentityRecord, ObjectStorage, StorageError, VerifiedToken,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Accounts {
    /// bearer token -> uid
    tokens: HashMap<String, String>,
    records: HashMap<String, IdentityRecord>,
    claims: HashMap<String, Map<String, Value>>,
}

/// Identity provider backed by a fixed table of tokens and accounts.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    accounts: Mutex<Accounts>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account reachable through `token`.
    pub fn with_account(
        self,
        token: impl Into<String>,
        record: IdentityRecord,
        claims: Map<String, Value>,
    ) -> Self {
        {
            let mut accounts = lock(&self.accounts);
            accounts.tokens.insert(token.into(), record.uid.clone());
            accounts.claims.insert(record.uid.clone(), claims);
            accounts.records.insert(record.uid.clone(), record);
        }
        self
    }

    pub fn claims_of(&self, uid: &str) -> Option<Map<String, Value>> {
        lock(&self.accounts).claims.get(uid).cloned()
    }

    pub fn has_account(&self, uid: &str) -> bool {
        lock(&self.accounts).records.contains_key(uid)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify_token(&self, token: &str) -> Result<VerifiedToken, IdentityError> {
        let accounts = lock(&self.accounts);
        let uid = accounts.tokens.get(token).ok_or(IdentityError::InvalidToken)?;
        if !accounts.records.contains_key(uid) {
            return Err(IdentityError::InvalidToken);
        }
        let claims = accounts.claims.get(uid).cloned().unwrap_or_default();
        Ok(VerifiedToken::new(uid.clone(), claims))
    }

    async fn get_user_record(&self, uid: &str) -> Result<IdentityRecord, IdentityError> {
        lock(&self.accounts)
            .records
            .get(uid)
            .cloned()
            .ok_or(IdentityError::UserNotFound)
    }

    async fn set_custom_claims(
        &self,
        uid: &str,
        claims: Map<String, Value>,
    ) -> Result<(), IdentityError> {
        let mut accounts = lock(&self.accounts);
        if !accounts.records.contains_key(uid) {
            return Err(IdentityError::UserNotFound);
        }
        accounts.claims.insert(uid.to_string(), claims);
        Ok(())
    }

    async fn delete_user(&self, uid: &str) -> Result<(), IdentityError> {
        let mut accounts = lock(&self.accounts);
        if accounts.records.remove(uid).is_none() {
            return Err(IdentityError::UserNotFound);
        }
        accounts.claims.remove(uid);
        accounts.tokens.retain(|_, owner| owner != uid);
        Ok(())
    }
}

/// Object storage that keeps uploads in memory.
#[derive(Debug)]
pub struct MemoryObjectStorage {
    base_url: String,
    objects: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryObjectStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Content type and bytes of a stored object.
    pub fn object(&self, name: &str) -> Option<(String, Vec<u8>)> {
        lock(&self.objects).get(name).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryObjectStorage {
    fn default() -> Self {
        Self::new("memory://bucket")
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put_object(
        &self,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError> {
        lock(&self.objects).insert(name.to_string(), (content_type.to_string(), bytes));
        Ok(format!("{}/{}", self.base_url, name))
    }

    async fn delete_object(&self, name: &str) -> Result<(), StorageError> {
        lock(&self.objects).remove(name);
        Ok(())
    }
}
