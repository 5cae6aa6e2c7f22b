use std::sync::RwLock;

use soma_domain::{
    Action, ActionId, Category, Grant, GrantScope, MonitoringId, Permission, PermissionId,
    Section, SectionId, SubjectKind, TeamId,
};
use tracing::warn;
use uuid::Uuid;

use crate::grants::{GrantMeta, ScopedGrantMap, Subject, UnscopedGrantMap};
use crate::lookup::{ActionLookup, SectionLookup};
use crate::mapping::PermissionMapping;

// ── Query types ───────────────────────────────────────────────────────────────

/// The scope identifiers a request carries. For tree-scoped sections the
/// caller passes the whole upward chain (node, cluster, group, bucket,
/// repository); a grant on any element of the chain authorizes.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthScope {
    None,
    Tree { object_ids: Vec<Uuid> },
    Team(TeamId),
    Monitoring(MonitoringId),
}

#[derive(Debug, Clone)]
pub struct Authorization {
    pub subject_kind: SubjectKind,
    pub subject_id: Uuid,
    /// The subject's team, for grants inherited via team membership.
    pub team_id: Option<TeamId>,
    pub section: String,
    pub action: String,
    pub scope: AuthScope,
}

// ── Updates ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum CacheUpdate {
    AddSection(Section),
    RemoveSection(SectionId),
    AddAction(Action),
    RemoveAction(ActionId),
    AddPermission(Permission),
    RemovePermission(PermissionId),
    MapSection {
        permission_id: PermissionId,
        section_id: SectionId,
    },
    UnmapSection {
        permission_id: PermissionId,
        section_id: SectionId,
    },
    MapAction {
        permission_id: PermissionId,
        section_id: SectionId,
        action_id: ActionId,
    },
    UnmapAction {
        permission_id: PermissionId,
        section_id: SectionId,
        action_id: ActionId,
    },
    Grant(Grant),
    Revoke(Grant),
}

// ── Cache ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CacheInner {
    sections: SectionLookup,
    actions: ActionLookup,
    pmap: PermissionMapping,
    grant_global: UnscopedGrantMap,
    grant_repository: ScopedGrantMap,
    grant_team: ScopedGrantMap,
    grant_monitoring: ScopedGrantMap,
}

/// The in-memory permission cache. Authorizes every client request.
///
/// A single lock guards all maps: updates routinely touch several of
/// them, and one lock is more robust than a lock-order scheme. The
/// cache is small and read-heavy, so the write-side cost is acceptable.
#[derive(Debug, Default)]
pub struct Cache {
    inner: RwLock<CacheInner>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update under the write lock.
    pub fn perform(&self, update: CacheUpdate) {
        let mut inner = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match update {
            CacheUpdate::AddSection(s) => inner.sections.add(s),
            CacheUpdate::RemoveSection(id) => {
                inner.actions.remove_section(id);
                inner.sections.remove(id);
            }
            CacheUpdate::AddAction(a) => inner.actions.add(a),
            CacheUpdate::RemoveAction(id) => inner.actions.remove(id),
            CacheUpdate::AddPermission(_) => {
                // the mapping structures materialise lazily; the
                // permission row itself lives in the store
            }
            CacheUpdate::RemovePermission(id) => inner.pmap.remove_permission(id),
            CacheUpdate::MapSection { permission_id, section_id } => {
                inner.pmap.map_section(section_id, permission_id)
            }
            CacheUpdate::UnmapSection { permission_id, section_id } => {
                inner.pmap.unmap_section(section_id, permission_id)
            }
            CacheUpdate::MapAction { permission_id, section_id, action_id } => {
                inner.pmap.map_action(section_id, action_id, permission_id)
            }
            CacheUpdate::UnmapAction { permission_id, section_id, action_id } => {
                inner.pmap.unmap_action(section_id, action_id, permission_id)
            }
            CacheUpdate::Grant(g) => Self::apply_grant(&mut inner, &g),
            CacheUpdate::Revoke(g) => Self::revoke_grant(&mut inner, &g),
        }
    }

    fn apply_grant(inner: &mut CacheInner, g: &Grant) {
        let subject: Subject = (g.recipient_kind, g.recipient_id);
        match (&g.scope, g.category) {
            (GrantScope::Global, c) if c.is_global_scope() || c == Category::Omnipotence => {
                inner.grant_global.grant(
                    subject,
                    g.permission_id,
                    GrantMeta { grant_id: g.id, category: g.category },
                );
            }
            (GrantScope::Tree { object_id, .. }, Category::Repository)
            | (GrantScope::Tree { object_id, .. }, Category::RepositoryGrant) => {
                inner
                    .grant_repository
                    .grant(subject, g.permission_id, *object_id, g.id);
            }
            (GrantScope::Team { team_id }, Category::Team)
            | (GrantScope::Team { team_id }, Category::TeamGrant) => {
                inner
                    .grant_team
                    .grant(subject, g.permission_id, team_id.as_uuid(), g.id);
            }
            (GrantScope::Monitoring { monitoring_id }, Category::Monitoring)
            | (GrantScope::Monitoring { monitoring_id }, Category::MonitoringGrant) => {
                inner
                    .grant_monitoring
                    .grant(subject, g.permission_id, monitoring_id.as_uuid(), g.id);
            }
            (scope, category) => {
                warn!(?scope, %category, grant = %g.id, "grant scope/category mismatch, ignored");
            }
        }
    }

    fn revoke_grant(inner: &mut CacheInner, g: &Grant) {
        let subject: Subject = (g.recipient_kind, g.recipient_id);
        match &g.scope {
            GrantScope::Global => inner.grant_global.revoke(subject, g.permission_id, g.id),
            GrantScope::Tree { object_id, .. } => {
                inner
                    .grant_repository
                    .revoke(subject, g.permission_id, *object_id, g.id)
            }
            GrantScope::Team { team_id } => {
                inner
                    .grant_team
                    .revoke(subject, g.permission_id, team_id.as_uuid(), g.id)
            }
            GrantScope::Monitoring { monitoring_id } => inner.grant_monitoring.revoke(
                subject,
                g.permission_id,
                monitoring_id.as_uuid(),
                g.id,
            ),
        }
    }

    /// Authorization decision: a pure function of the cache state at
    /// query time. Holds the read lock for the whole query so it sees
    /// one consistent snapshot.
    pub fn is_authorized(&self, q: &Authorization) -> bool {
        let inner = match self.inner.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        // subject, then the subject's team
        let mut subjects: Vec<Subject> = vec![(q.subject_kind, q.subject_id)];
        if let Some(team) = q.team_id {
            subjects.push((SubjectKind::Team, team.as_uuid()));
        }

        // 1. omnipotence
        for s in &subjects {
            if inner.grant_global.holds_category(s, Category::Omnipotence) {
                return true;
            }
        }

        let section = match inner.sections.by_name(&q.section) {
            Some(s) => s,
            None => return false,
        };
        let action = match inner.actions.by_name(section.id, &q.action) {
            Some(a) => a,
            None => return false,
        };

        let maps = |perm: PermissionId| {
            inner.pmap.maps_action(perm, section.id, action.id)
                || inner.pmap.maps_section(perm, section.id)
        };

        // 2. system grant whose permission maps the requested pair
        for s in &subjects {
            for (perm, metas) in inner.grant_global.held_by(s) {
                if metas.iter().any(|m| m.category == Category::System) && maps(*perm) {
                    return true;
                }
            }
        }

        // 3. category-matched grant whose scope object matches
        if section.category.is_global_scope() {
            for s in &subjects {
                for (perm, metas) in inner.grant_global.held_by(s) {
                    if metas.iter().any(|m| m.category == section.category) && maps(*perm) {
                        return true;
                    }
                }
            }
            return false;
        }

        let (map, scope_ids): (&ScopedGrantMap, Vec<Uuid>) = match (&q.scope, section.category) {
            (AuthScope::Tree { object_ids }, Category::Repository)
            | (AuthScope::Tree { object_ids }, Category::RepositoryGrant) => {
                (&inner.grant_repository, object_ids.clone())
            }
            (AuthScope::Team(t), Category::Team) | (AuthScope::Team(t), Category::TeamGrant) => {
                (&inner.grant_team, vec![t.as_uuid()])
            }
            (AuthScope::Monitoring(m), Category::Monitoring)
            | (AuthScope::Monitoring(m), Category::MonitoringGrant) => {
                (&inner.grant_monitoring, vec![m.as_uuid()])
            }
            _ => return false,
        };

        for s in &subjects {
            for (perm, mut scopes) in map.held_by(s) {
                if !maps(*perm) {
                    continue;
                }
                if scopes.any(|o| scope_ids.contains(o)) {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(name: &str, category: Category) -> Section {
        Section { id: SectionId::generate(), name: name.into(), category }
    }

    fn action(name: &str, section: &Section) -> Action {
        Action {
            id: ActionId::generate(),
            name: name.into(),
            section_id: section.id,
            category: section.category,
        }
    }

    fn global_grant(
        subject: Uuid,
        kind: SubjectKind,
        permission: PermissionId,
        category: Category,
    ) -> Grant {
        Grant {
            id: Uuid::new_v4(),
            permission_id: permission,
            category,
            recipient_kind: kind,
            recipient_id: subject,
            scope: GrantScope::Global,
        }
    }

    fn query(subject: Uuid, section: &str, action: &str, scope: AuthScope) -> Authorization {
        Authorization {
            subject_kind: SubjectKind::User,
            subject_id: subject,
            team_id: None,
            section: section.into(),
            action: action.into(),
            scope,
        }
    }

    #[test]
    fn omnipotence_allows_everything() {
        let cache = Cache::new();
        let user = Uuid::new_v4();
        let perm = PermissionId::generate();
        cache.perform(CacheUpdate::Grant(global_grant(
            user,
            SubjectKind::User,
            perm,
            Category::Omnipotence,
        )));

        assert!(cache.is_authorized(&query(user, "anything", "whatever", AuthScope::None)));
    }

    #[test]
    fn system_grant_requires_mapped_action() {
        let cache = Cache::new();
        let sec = section("repository", Category::Repository);
        let act = action("create", &sec);
        let other = action("destroy", &sec);
        cache.perform(CacheUpdate::AddSection(sec.clone()));
        cache.perform(CacheUpdate::AddAction(act.clone()));
        cache.perform(CacheUpdate::AddAction(other.clone()));

        let user = Uuid::new_v4();
        let perm = PermissionId::generate();
        cache.perform(CacheUpdate::MapAction {
            permission_id: perm,
            section_id: sec.id,
            action_id: act.id,
        });
        cache.perform(CacheUpdate::Grant(global_grant(
            user,
            SubjectKind::User,
            perm,
            Category::System,
        )));

        assert!(cache.is_authorized(&query(user, "repository", "create", AuthScope::None)));
        assert!(!cache.is_authorized(&query(user, "repository", "destroy", AuthScope::None)));
    }

    #[test]
    fn repository_scoped_grant_matches_chain() {
        let cache = Cache::new();
        let sec = section("bucket", Category::Repository);
        let act = action("create", &sec);
        cache.perform(CacheUpdate::AddSection(sec.clone()));
        cache.perform(CacheUpdate::AddAction(act.clone()));

        let user = Uuid::new_v4();
        let perm = PermissionId::generate();
        let repo = Uuid::new_v4();
        cache.perform(CacheUpdate::MapSection { permission_id: perm, section_id: sec.id });
        cache.perform(CacheUpdate::Grant(Grant {
            id: Uuid::new_v4(),
            permission_id: perm,
            category: Category::Repository,
            recipient_kind: SubjectKind::User,
            recipient_id: user,
            scope: GrantScope::Tree {
                object_kind: soma_domain::ScopeObjectKind::Repository,
                object_id: repo,
            },
        }));

        // the request carries the upward chain bucket → repository
        let bucket = Uuid::new_v4();
        assert!(cache.is_authorized(&query(
            user,
            "bucket",
            "create",
            AuthScope::Tree { object_ids: vec![bucket, repo] },
        )));
        // a chain that does not include the granted repository fails
        assert!(!cache.is_authorized(&query(
            user,
            "bucket",
            "create",
            AuthScope::Tree { object_ids: vec![Uuid::new_v4()] },
        )));
    }

    #[test]
    fn team_membership_resolves_grants() {
        let cache = Cache::new();
        let sec = section("bucket", Category::Repository);
        let act = action("create", &sec);
        cache.perform(CacheUpdate::AddSection(sec.clone()));
        cache.perform(CacheUpdate::AddAction(act.clone()));

        let team = TeamId::generate();
        let perm = PermissionId::generate();
        let repo = Uuid::new_v4();
        cache.perform(CacheUpdate::MapSection { permission_id: perm, section_id: sec.id });
        // grant awarded to the team, not the user
        cache.perform(CacheUpdate::Grant(Grant {
            id: Uuid::new_v4(),
            permission_id: perm,
            category: Category::Repository,
            recipient_kind: SubjectKind::Team,
            recipient_id: team.as_uuid(),
            scope: GrantScope::Tree {
                object_kind: soma_domain::ScopeObjectKind::Repository,
                object_id: repo,
            },
        }));

        let mut q = query(
            Uuid::new_v4(),
            "bucket",
            "create",
            AuthScope::Tree { object_ids: vec![repo] },
        );
        assert!(!cache.is_authorized(&q), "no team: no access");
        q.team_id = Some(team);
        assert!(cache.is_authorized(&q), "team membership grants access");
    }

    #[test]
    fn revoke_removes_access() {
        let cache = Cache::new();
        let user = Uuid::new_v4();
        let perm = PermissionId::generate();
        let grant = global_grant(user, SubjectKind::User, perm, Category::Omnipotence);
        cache.perform(CacheUpdate::Grant(grant.clone()));
        assert!(cache.is_authorized(&query(user, "x", "y", AuthScope::None)));

        cache.perform(CacheUpdate::Revoke(grant));
        assert!(!cache.is_authorized(&query(user, "x", "y", AuthScope::None)));
    }

    #[test]
    fn unknown_section_denies() {
        let cache = Cache::new();
        assert!(!cache.is_authorized(&query(Uuid::new_v4(), "ghost", "op", AuthScope::None)));
    }
}
