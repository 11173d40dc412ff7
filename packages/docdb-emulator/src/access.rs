//! Who is calling and what a resource token allows.

use docdb_client::link::trim_link;
use docdb_client::{PartitionKey, Permission, PermissionMode, ResourcePath};

use crate::error::{EmulatorError, Result};

/// Prefix of every resource token the emulator issues.
pub const RESOURCE_TOKEN_PREFIX: &str = "type=resource&ver=1.0&sig=";

/// Authenticated caller of an emulator operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Holder of the account master key
    Master,
    /// Holder of a resource token issued for one permission
    ResourceToken(String),
}

impl Principal {
    pub fn is_master(&self) -> bool {
        matches!(self, Principal::Master)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Partition reach of a document operation.
#[derive(Debug, Clone, Copy)]
pub enum PartitionScope<'a> {
    /// Not a document operation
    Unscoped,
    Single(&'a PartitionKey),
    CrossPartition,
}

/// Checks one permission against a request on `target`.
pub fn check_grant(
    permission: &Permission,
    target: &ResourcePath,
    access: Access,
    scope: PartitionScope<'_>,
) -> Result<()> {
    let granted = trim_link(&permission.resource);
    let target_path = target.path();
    let covered = target_path == granted
        || target_path
            .strip_prefix(granted)
            .is_some_and(|rest| rest.starts_with('/'));
    if !covered {
        return Err(EmulatorError::Forbidden(format!(
            "Permission '{}' does not cover '{}'",
            permission.id, target_path
        )));
    }

    if access == Access::Write && permission.mode == PermissionMode::Read {
        return Err(EmulatorError::Forbidden(format!(
            "Permission '{}' is read-only",
            permission.id
        )));
    }

    if let Some(allowed) = permission.scoped_partition() {
        match scope {
            PartitionScope::Unscoped => {}
            PartitionScope::Single(partition) if *partition == allowed => {}
            PartitionScope::Single(partition) => {
                return Err(EmulatorError::Forbidden(format!(
                    "Permission '{}' is limited to partition '{}', request targets '{}'",
                    permission.id, allowed, partition
                )));
            }
            PartitionScope::CrossPartition => {
                return Err(EmulatorError::Forbidden(format!(
                    "Permission '{}' is limited to partition '{}' and cannot query across partitions",
                    permission.id, allowed
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(link: &str) -> ResourcePath {
        ResourcePath::parse(link).unwrap()
    }

    fn scoped(mode: PermissionMode) -> Permission {
        Permission::new("p", mode, "dbs/db/colls/items/")
            .with_partition(&PartitionKey::from("partB"))
    }

    #[test]
    fn grant_covers_children_of_the_resource_only() {
        let perm = Permission::new("p", PermissionMode::All, "dbs/db/colls/items");
        let docs = path("dbs/db/colls/items/docs");
        assert!(check_grant(&perm, &docs, Access::Write, PartitionScope::Unscoped).is_ok());

        let sibling = path("dbs/db/colls/items2/docs");
        assert!(check_grant(&perm, &sibling, Access::Read, PartitionScope::Unscoped).is_err());

        let parent = path("dbs/db");
        assert!(check_grant(&perm, &parent, Access::Read, PartitionScope::Unscoped).is_err());
    }

    #[test]
    fn partition_scope_is_enforced() {
        let perm = scoped(PermissionMode::All);
        let docs = path("dbs/db/colls/items/docs");
        let part_b = PartitionKey::from("partB");
        let part_a = PartitionKey::from("partA");

        assert!(check_grant(&perm, &docs, Access::Write, PartitionScope::Single(&part_b)).is_ok());
        assert_eq!(
            check_grant(&perm, &docs, Access::Write, PartitionScope::Single(&part_a))
                .unwrap_err()
                .status(),
            403
        );
        assert!(
            check_grant(&perm, &docs, Access::Read, PartitionScope::CrossPartition).is_err()
        );
    }

    #[test]
    fn read_mode_denies_writes() {
        let perm = scoped(PermissionMode::Read);
        let docs = path("dbs/db/colls/items/docs");
        let part_b = PartitionKey::from("partB");
        assert!(check_grant(&perm, &docs, Access::Read, PartitionScope::Single(&part_b)).is_ok());
        assert!(check_grant(&perm, &docs, Access::Write, PartitionScope::Single(&part_b)).is_err());
    }
}
