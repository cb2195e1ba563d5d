//! Domain state of the engine.

use crate::core::error::BraidResult;
use crate::record::{DeploymentRecord, MessageSubscriptionRecord};
use crate::state::{ColumnFamily, ColumnFamilyId, ReadContext, TenantKey, Transaction};
use serde::{Deserialize, Serialize};

/// Latest version of a resource within a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestVersion {
    pub key: i64,
    pub version: i32,
}

/// Deployed resources, by key and by (tenant, resource name).
#[derive(Clone, Copy)]
pub struct DeploymentState {
    by_key: ColumnFamily<i64, DeploymentRecord>,
    latest: ColumnFamily<TenantKey<String>, LatestVersion>,
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentState {
    pub const fn new() -> Self {
        Self {
            by_key: ColumnFamily::new(ColumnFamilyId::Deployments),
            latest: ColumnFamily::new(ColumnFamilyId::DeploymentVersions),
        }
    }

    pub fn get<C: ReadContext>(&self, ctx: &C, key: i64) -> BraidResult<Option<DeploymentRecord>> {
        self.by_key.get(ctx, &key)
    }

    pub fn exists<C: ReadContext>(&self, ctx: &C, key: i64) -> bool {
        self.by_key.exists(ctx, &key)
    }

    pub fn latest_version<C: ReadContext>(
        &self,
        ctx: &C,
        tenant_id: &str,
        resource_name: &str,
    ) -> BraidResult<Option<LatestVersion>> {
        self.latest
            .get(ctx, &TenantKey::new(tenant_id, resource_name.to_string()))
    }

    pub fn create(
        &self,
        tx: &mut Transaction<'_>,
        key: i64,
        record: &DeploymentRecord,
    ) -> BraidResult<()> {
        self.by_key.insert(tx, &key, record)?;
        let name = TenantKey::new(record.tenant_id.clone(), record.resource_name.clone());
        let newer = match self.latest.get(tx, &name)? {
            Some(latest) => record.version > latest.version,
            None => true,
        };
        if newer {
            self.latest.upsert(
                tx,
                &name,
                &LatestVersion {
                    key,
                    version: record.version,
                },
            )?;
        }
        Ok(())
    }

    /// Latest versions of every resource deployed for a tenant.
    pub fn latest_for_tenant<C: ReadContext>(
        &self,
        ctx: &C,
        tenant_id: &str,
    ) -> BraidResult<Vec<(String, LatestVersion)>> {
        let mut found = Vec::new();
        self.latest
            .while_equal_prefix(ctx, &tenant_id.to_string(), |key, latest| {
                found.push((key.key, latest));
                Ok(true)
            })?;
        Ok(found)
    }
}

/// Message subscriptions, by key and by (tenant, message name, key).
#[derive(Clone, Copy)]
pub struct MessageSubscriptionState {
    by_key: ColumnFamily<i64, MessageSubscriptionRecord>,
    by_name: ColumnFamily<TenantKey<(String, i64)>, ()>,
}

impl Default for MessageSubscriptionState {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSubscriptionState {
    pub const fn new() -> Self {
        Self {
            by_key: ColumnFamily::new(ColumnFamilyId::MessageSubscriptionByKey),
            by_name: ColumnFamily::new(ColumnFamilyId::MessageSubscriptionByName),
        }
    }

    pub fn get<C: ReadContext>(
        &self,
        ctx: &C,
        key: i64,
    ) -> BraidResult<Option<MessageSubscriptionRecord>> {
        self.by_key.get(ctx, &key)
    }

    pub fn create(
        &self,
        tx: &mut Transaction<'_>,
        key: i64,
        record: &MessageSubscriptionRecord,
    ) -> BraidResult<()> {
        self.by_key.insert(tx, &key, record)?;
        self.by_name.insert(
            tx,
            &TenantKey::new(record.tenant_id.clone(), (record.message_name.clone(), key)),
            &(),
        )
    }

    pub fn delete(&self, tx: &mut Transaction<'_>, key: i64) -> BraidResult<()> {
        let Some(record) = self.by_key.get(tx, &key)? else {
            return Err(crate::core::error::BraidError::NotFound {
                column_family: ColumnFamilyId::MessageSubscriptionByKey.name(),
            });
        };
        self.by_key.delete_existing(tx, &key)?;
        self.by_name.delete_existing(
            tx,
            &TenantKey::new(record.tenant_id, (record.message_name, key)),
        )
    }

    /// Visit the subscriptions of one tenant to one message, in key order.
    pub fn visit_by_name<C, F>(
        &self,
        ctx: &C,
        tenant_id: &str,
        message_name: &str,
        mut visitor: F,
    ) -> BraidResult<()>
    where
        C: ReadContext,
        F: FnMut(i64, MessageSubscriptionRecord) -> BraidResult<bool>,
    {
        let prefix = TenantKey::new(tenant_id, message_name.to_string());
        self.by_name.while_equal_prefix(ctx, &prefix, |key, ()| {
            let subscription_key = key.key.1;
            match self.by_key.get(ctx, &subscription_key)? {
                Some(record) => visitor(subscription_key, record),
                None => Ok(true),
            }
        })
    }

    /// Whether an element instance already subscribed to a message.
    pub fn exists_for_element<C: ReadContext>(
        &self,
        ctx: &C,
        tenant_id: &str,
        message_name: &str,
        element_instance_key: i64,
    ) -> BraidResult<bool> {
        let mut found = false;
        self.visit_by_name(ctx, tenant_id, message_name, |_, record| {
            found = record.element_instance_key == element_instance_key;
            Ok(!found)
        })?;
        Ok(found)
    }
}
