use std::collections::hash_map;
use std::collections::{HashMap, HashSet};

use soma_domain::{Category, PermissionId, SubjectKind};
use uuid::Uuid;

/// Key of the grant maps: who holds the grant.
pub type Subject = (SubjectKind, Uuid);

#[derive(Debug, Clone, PartialEq)]
pub struct GrantMeta {
    pub grant_id: Uuid,
    pub category: Category,
}

/// Grants without a scope object (global, system, omnipotence, …).
#[derive(Debug, Default)]
pub struct UnscopedGrantMap {
    grants: HashMap<Subject, HashMap<PermissionId, Vec<GrantMeta>>>,
}

impl UnscopedGrantMap {
    pub fn grant(
        &mut self,
        subject: Subject,
        permission_id: PermissionId,
        meta: GrantMeta,
    ) {
        self.grants
            .entry(subject)
            .or_default()
            .entry(permission_id)
            .or_default()
            .push(meta);
    }

    pub fn revoke(&mut self, subject: Subject, permission_id: PermissionId, grant_id: Uuid) {
        if let Some(perms) = self.grants.get_mut(&subject) {
            if let Some(metas) = perms.get_mut(&permission_id) {
                metas.retain(|m| m.grant_id != grant_id);
                if metas.is_empty() {
                    perms.remove(&permission_id);
                }
            }
            if perms.is_empty() {
                self.grants.remove(&subject);
            }
        }
    }

    /// Permissions the subject holds, with their categories.
    pub fn held_by<'a>(
        &'a self,
        subject: &Subject,
    ) -> impl Iterator<Item = (&'a PermissionId, &'a Vec<GrantMeta>)> {
        self.grants.get(subject).into_iter().flat_map(|m| m.iter())
    }

    pub fn holds_category(&self, subject: &Subject, category: Category) -> bool {
        self.held_by(subject)
            .any(|(_, metas)| metas.iter().any(|m| m.category == category))
    }
}

/// Grants bound to a scope object (repository tree object, team, or
/// monitoring system).
#[derive(Debug, Default)]
pub struct ScopedGrantMap {
    /// subject → permission → scope object ids
    grants: HashMap<Subject, HashMap<PermissionId, HashMap<Uuid, HashSet<Uuid>>>>,
}

impl ScopedGrantMap {
    pub fn grant(
        &mut self,
        subject: Subject,
        permission_id: PermissionId,
        scope_object: Uuid,
        grant_id: Uuid,
    ) {
        self.grants
            .entry(subject)
            .or_default()
            .entry(permission_id)
            .or_default()
            .entry(scope_object)
            .or_default()
            .insert(grant_id);
    }

    pub fn revoke(
        &mut self,
        subject: Subject,
        permission_id: PermissionId,
        scope_object: Uuid,
        grant_id: Uuid,
    ) {
        if let Some(perms) = self.grants.get_mut(&subject) {
            if let Some(scopes) = perms.get_mut(&permission_id) {
                if let Some(ids) = scopes.get_mut(&scope_object) {
                    ids.remove(&grant_id);
                    if ids.is_empty() {
                        scopes.remove(&scope_object);
                    }
                }
                if scopes.is_empty() {
                    perms.remove(&permission_id);
                }
            }
            if perms.is_empty() {
                self.grants.remove(&subject);
            }
        }
    }

    /// Permission → scope objects held by the subject.
    pub fn held_by<'a>(
        &'a self,
        subject: &Subject,
    ) -> impl Iterator<Item = (&'a PermissionId, hash_map::Keys<'a, Uuid, HashSet<Uuid>>)> {
        self.grants
            .get(subject)
            .into_iter()
            .flat_map(|m| m.iter())
            .map(|(p, scopes)| (p, scopes.keys()))
    }
}
