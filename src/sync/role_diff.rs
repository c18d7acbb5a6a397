//! Forum roles -> Discord role changes.
//!
//! Grants and revokes are resolved by role *name*, so several forum roles may
//! map onto the same Discord role. Before diffing, the member's forum roles are
//! closed over those name groups; otherwise one half of a same-named pair would
//! grant a role that the other half revokes on the same pass.

use poise::serenity_prelude::RoleId;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::platform::PlatformRole;
use crate::state::{role_name_key, RoleDefinition};

/// Role names to grant and to revoke, independent of any guild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleNameDiff {
    pub grant: BTreeSet<String>,
    pub revoke: BTreeSet<String>,
}

/// Concrete changes for one member in one guild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolePlan {
    pub grant: Vec<PlatformRole>,
    pub revoke: Vec<PlatformRole>,
    /// Roles at or above the bot's highest role
    pub unmanageable: Vec<String>,
}

impl RolePlan {
    pub fn is_empty(&self) -> bool {
        self.grant.is_empty() && self.revoke.is_empty()
    }

    pub fn grant_names(&self) -> BTreeSet<String> {
        self.grant.iter().map(|r| r.name.clone()).collect()
    }

    pub fn revoke_names(&self) -> BTreeSet<String> {
        self.revoke.iter().map(|r| r.name.clone()).collect()
    }
}

/// Extend `desired` with every definition sharing a (case-insensitive) name
/// with one of the desired definitions.
pub fn close_collisions(desired: &HashSet<u64>, definitions: &[RoleDefinition]) -> HashSet<u64> {
    let held_names: HashSet<String> = definitions
        .iter()
        .filter(|d| desired.contains(&d.external_role_id))
        .map(|d| role_name_key(&d.name))
        .collect();

    let mut closed = desired.clone();
    closed.extend(
        definitions
            .iter()
            .filter(|d| held_names.contains(&role_name_key(&d.name)))
            .map(|d| d.external_role_id),
    );
    closed
}

/// Which role names a member should and should not have
pub fn diff_role_names(desired: &HashSet<u64>, definitions: &[RoleDefinition]) -> RoleNameDiff {
    let closed = close_collisions(desired, definitions);

    // One display name per name group: the first definition's spelling
    let mut groups: BTreeMap<String, (String, bool)> = BTreeMap::new();
    for definition in definitions {
        let wanted = closed.contains(&definition.external_role_id);
        groups
            .entry(role_name_key(&definition.name))
            .or_insert_with(|| (definition.name.clone(), wanted));
    }

    let mut diff = RoleNameDiff::default();
    for (name, wanted) in groups.into_values() {
        if wanted {
            diff.grant.insert(name);
        } else {
            diff.revoke.insert(name);
        }
    }
    diff
}

/// First guild role matching a name, in the guild's display order
pub fn resolve_role<'a>(name: &str, guild_roles: &'a [PlatformRole]) -> Option<&'a PlatformRole> {
    let key = role_name_key(name);
    guild_roles
        .iter()
        .filter(|r| role_name_key(&r.name) == key)
        .min_by_key(|r| (std::cmp::Reverse(r.position), r.id))
}

/// Turn a name diff into role calls for a member currently holding `held`.
/// Names without a guild role are skipped, and roles already in the desired
/// state produce no call, so an unchanged member yields an empty plan.
pub fn plan_role_changes(
    diff: &RoleNameDiff,
    guild_roles: &[PlatformRole],
    held: &HashSet<RoleId>,
    bot_position: u16,
) -> RolePlan {
    let mut plan = RolePlan::default();
    let mut planned: HashSet<RoleId> = HashSet::new();

    let entries = diff
        .grant
        .iter()
        .map(|n| (n, true))
        .chain(diff.revoke.iter().map(|n| (n, false)));

    for (name, grant) in entries {
        let Some(role) = resolve_role(name, guild_roles) else {
            continue;
        };
        if !planned.insert(role.id) {
            continue;
        }
        if role.position >= bot_position {
            plan.unmanageable.push(role.name.clone());
            continue;
        }

        let has_role = held.contains(&role.id);
        if grant && !has_role {
            plan.grant.push(role.clone());
        } else if !grant && has_role {
            plan.revoke.push(role.clone());
        }
    }

    plan
}
