use dashmap::DashMap;

use async_trait::async_trait;
use roomgate_core::{SecuredRoom, expiry};
use roomgate_storage::{Grant, GrantStore, PolicyStore, StorageError};

/// In-memory policy and grant store backed by concurrent maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    policies: DashMap<String, SecuredRoom>,
    grants: DashMap<(String, String), Grant>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user_id: &str, room_id: &str) -> (String, String) {
        (user_id.to_owned(), room_id.to_owned())
    }
}

fn room_id_of(policy: &SecuredRoom) -> Result<&str, StorageError> {
    policy
        .room_id
        .as_deref()
        .ok_or_else(|| StorageError::invalid_data("policy has no room_id"))
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn create(&self, policy: &SecuredRoom) -> Result<(), StorageError> {
        let room_id = room_id_of(policy)?;
        if self.policies.contains_key(room_id) {
            return Err(StorageError::already_exists(room_id));
        }
        self.policies.insert(room_id.to_owned(), policy.clone());
        Ok(())
    }

    async fn get(&self, room_id: &str) -> Result<Option<SecuredRoom>, StorageError> {
        Ok(self.policies.get(room_id).map(|entry| entry.clone()))
    }

    async fn list(&self) -> Result<Vec<SecuredRoom>, StorageError> {
        let mut rooms: Vec<SecuredRoom> =
            self.policies.iter().map(|entry| entry.clone()).collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        Ok(rooms)
    }

    async fn update(&self, policy: &SecuredRoom) -> Result<(), StorageError> {
        let room_id = room_id_of(policy)?;
        match self.policies.get_mut(room_id) {
            Some(mut entry) => {
                *entry = policy.clone();
                Ok(())
            }
            None => Err(StorageError::not_found(room_id)),
        }
    }

    async fn delete(&self, room_id: &str) -> Result<(), StorageError> {
        match self.policies.remove(room_id) {
            Some(_) => Ok(()),
            None => Err(StorageError::not_found(room_id)),
        }
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn is_allowed(&self, user_id: &str, room_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .grants
            .get(&Self::key(user_id, room_id))
            .map(|grant| !grant.expired)
            .unwrap_or(false))
    }

    async fn allow(&self, user_id: &str, room_id: &str, now: i64) -> Result<(), StorageError> {
        self.grants
            .entry(Self::key(user_id, room_id))
            .and_modify(|grant| {
                grant.join_time = now;
                grant.expired = false;
            })
            .or_insert_with(|| Grant {
                user_id: user_id.to_owned(),
                room_id: room_id.to_owned(),
                join_time: now,
                expired: false,
            });
        Ok(())
    }

    async fn sweep_expired(&self, now: i64) -> Result<Vec<(String, String)>, StorageError> {
        let mut newly_marked = Vec::new();
        for mut entry in self.grants.iter_mut() {
            if entry.expired {
                continue;
            }
            // Orphaned grants (policy deleted) never match the sweep.
            let Some(policy) = self.policies.get(&entry.room_id) else {
                continue;
            };
            if expiry::is_past_ttl(entry.join_time, now, policy.expiration_time_days) {
                entry.expired = true;
                newly_marked.push((entry.user_id.clone(), entry.room_id.clone()));
            }
        }
        newly_marked.sort();
        Ok(newly_marked)
    }

    async fn list_expired(&self) -> Result<Vec<(String, String)>, StorageError> {
        let mut expired: Vec<(String, String)> = self
            .grants
            .iter()
            .filter(|entry| entry.expired)
            .map(|entry| (entry.user_id.clone(), entry.room_id.clone()))
            .collect();
        expired.sort();
        Ok(expired)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Grant>, StorageError> {
        let mut grants: Vec<Grant> = self
            .grants
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect();
        grants.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        Ok(grants)
    }

    async fn dismiss(&self, room_id: &str, user_id: &str) -> Result<(), StorageError> {
        self.grants.remove(&Self::key(user_id, room_id));
        Ok(())
    }

    async fn remove_all(&self, room_id: &str) -> Result<(), StorageError> {
        for mut entry in self.grants.iter_mut() {
            if entry.room_id == room_id {
                entry.expired = true;
            }
        }
        Ok(())
    }
}
