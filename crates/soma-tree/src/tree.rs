use std::collections::{HashMap, HashSet};

use soma_domain::{
    CheckConfig, CheckId, ElementId, Environment, ObjectState, PropertyInstanceId, PropertySpec,
    PropertyType, RepositoryId, ServiceCatalog, TeamId,
};
use tracing::debug;

use crate::element::{Element, ElementKind, Handle, PlacedCheck, PropertyInstance};
use crate::error::TreeError;
use crate::events::TreeEvent;

// ── Requests ──────────────────────────────────────────────────────────────────

/// Lookup request. Either an exact id, or a `(kind, name)` pair that is
/// matched across the whole tree. More than one `(kind, name)` hit means
/// the tree is corrupt and the fault sentinel is returned.
#[derive(Debug, Clone, Default)]
pub struct FindRequest {
    pub element_id: Option<ElementId>,
    pub kind: Option<String>,
    pub name: Option<String>,
}

impl FindRequest {
    pub fn by_id(id: ElementId) -> Self {
        FindRequest { element_id: Some(id), ..Default::default() }
    }

    pub fn by_name(kind: &str, name: &str) -> Self {
        FindRequest {
            element_id: None,
            kind: Some(kind.to_string()),
            name: Some(name.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttachRequest {
    pub parent: Handle,
    pub element_id: ElementId,
    pub kind: ElementKind,
    pub name: String,
    pub team_id: TeamId,
}

// ── Tree ──────────────────────────────────────────────────────────────────────

/// The in-memory monitoring tree of one repository.
///
/// The tree is an arena: elements are owned by the `elements` map and
/// reference each other by id. Children are held in arrival order.
/// Every mutation appends to the event sink, which the Treekeeper drains
/// after each request.
#[derive(Debug, Clone)]
pub struct Tree {
    repository_id: RepositoryId,
    root: ElementId,
    elements: HashMap<ElementId, Element>,
    events: Vec<TreeEvent>,
    /// Per-team service definitions used to resolve service and
    /// attribute constraints.
    pub service_catalog: ServiceCatalog,
}

impl Tree {
    pub fn new(repository_id: RepositoryId, name: String, team_id: TeamId) -> Self {
        let root = ElementId::new(repository_id.as_uuid());
        let mut elements = HashMap::new();
        elements.insert(
            root,
            Element::new(root, ElementKind::Repository, name, team_id),
        );
        Tree {
            repository_id,
            root,
            elements,
            events: Vec::new(),
            service_catalog: ServiceCatalog::new(),
        }
    }

    pub fn repository_id(&self) -> RepositoryId {
        self.repository_id
    }

    pub fn root_id(&self) -> ElementId {
        self.root
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn element_ids(&self) -> Vec<ElementId> {
        self.elements.keys().copied().collect()
    }

    pub(crate) fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    /// Drain the accumulated action events.
    pub fn drain_events(&mut self) -> Vec<TreeEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Traversal ─────────────────────────────────────────────────────────────

    /// Ancestors of an element, nearest first, excluding the element.
    pub fn ancestors(&self, id: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut cur = self.elements.get(&id).and_then(|e| e.parent);
        while let Some(p) = cur {
            out.push(p);
            cur = self.elements.get(&p).and_then(|e| e.parent);
        }
        out
    }

    /// Descendants in depth-first pre-order, excluding the element itself.
    pub fn descendants(&self, id: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack: Vec<ElementId> = match self.elements.get(&id) {
            Some(e) => e.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(e) = self.elements.get(&next) {
                stack.extend(e.children.iter().rev().copied());
            }
        }
        out
    }

    /// The bucket enclosing an element (self when the element is a bucket).
    pub fn enclosing_bucket(&self, id: ElementId) -> Option<ElementId> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            let el = self.elements.get(&c)?;
            if matches!(el.kind, ElementKind::Bucket { .. }) {
                return Some(c);
            }
            cur = el.parent;
        }
        None
    }

    /// Environment tag of the bucket enclosing an element.
    pub fn environment_of(&self, id: ElementId) -> Option<Environment> {
        let bucket = self.enclosing_bucket(id)?;
        match self.elements.get(&bucket)?.kind {
            ElementKind::Bucket { environment, .. } => Some(environment),
            _ => None,
        }
    }

    // ── Find ──────────────────────────────────────────────────────────────────

    /// Look an element up. Zero hits yields `Nil`, one hit the element,
    /// more than one the fault sentinel (duplicate `(kind, name)` pairs
    /// mean the tree is corrupt).
    pub fn find(&self, req: &FindRequest) -> Handle {
        if let Some(id) = req.element_id {
            return match self.elements.contains_key(&id) {
                true => Handle::Element(id),
                false => Handle::Nil,
            };
        }
        let (kind, name) = match (&req.kind, &req.name) {
            (Some(k), Some(n)) => (k.as_str(), n.as_str()),
            _ => return Handle::Nil,
        };
        let mut hits = self
            .elements
            .values()
            .filter(|e| e.kind.kind_name() == kind && e.name == name);
        match (hits.next(), hits.next()) {
            (None, _) => Handle::Nil,
            (Some(e), None) => Handle::Element(e.id),
            (Some(_), Some(_)) => {
                debug!(kind, name, "ambiguous lookup, returning fault");
                Handle::Fault
            }
        }
    }

    fn resolve(&self, handle: Handle) -> Result<ElementId, TreeError> {
        match handle {
            Handle::Element(id) if self.elements.contains_key(&id) => Ok(id),
            Handle::Element(id) => Err(TreeError::NotFound(id.to_string())),
            Handle::Fault => Err(TreeError::Fault),
            Handle::Nil => Err(TreeError::NotFound("nil handle".into())),
        }
    }

    fn get_mut(&mut self, id: ElementId) -> Result<&mut Element, TreeError> {
        self.elements
            .get_mut(&id)
            .ok_or_else(|| TreeError::NotFound(id.to_string()))
    }

    /// Reject mutations into frozen buckets.
    fn guard_writable(&self, id: ElementId) -> Result<(), TreeError> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            let el = self
                .elements
                .get(&c)
                .ok_or_else(|| TreeError::Corrupt(format!("dangling parent {}", c)))?;
            if el.is_frozen_bucket() {
                return Err(TreeError::ReadonlyBucket);
            }
            cur = el.parent;
        }
        Ok(())
    }

    // ── Attach / membership ───────────────────────────────────────────────────

    /// Create a new element under `parent`. Validates edge legality and
    /// name uniqueness within the parent, places inherited properties and
    /// checks from the ancestor chain, and emits the creation events.
    pub fn attach(&mut self, req: AttachRequest) -> Result<ElementId, TreeError> {
        let parent_id = self.resolve(req.parent)?;
        self.guard_writable(parent_id)?;

        let parent = &self.elements[&parent_id];
        if !parent.kind.may_parent(&req.kind) {
            return Err(TreeError::IllegalEdge {
                parent: parent.kind.kind_name(),
                child: req.kind.kind_name(),
            });
        }
        if parent
            .children
            .iter()
            .filter_map(|c| self.elements.get(c))
            .any(|c| c.name == req.name && c.kind.kind_name() == req.kind.kind_name())
        {
            return Err(TreeError::Conflict(format!(
                "{} '{}' already exists in '{}'",
                req.kind.kind_name(),
                req.name,
                parent.name
            )));
        }
        if self.elements.contains_key(&req.element_id) {
            return Err(TreeError::Conflict(format!(
                "element {} already attached",
                req.element_id
            )));
        }

        let mut element = Element::new(req.element_id, req.kind, req.name, req.team_id);
        element.parent = Some(parent_id);
        element.state = match self.elements[&parent_id].kind {
            ElementKind::Repository | ElementKind::Bucket { .. } => match element.kind {
                ElementKind::Bucket { .. } => ObjectState::Active,
                _ => ObjectState::Standalone,
            },
            _ => ObjectState::Grouped,
        };
        let id = element.id;

        self.events.push(TreeEvent::ElementCreated {
            element_id: id,
            kind: element.kind.clone(),
            name: element.name.clone(),
            team_id: element.team_id,
            parent_id: Some(parent_id),
        });
        self.elements.insert(id, element);
        if let Some(p) = self.elements.get_mut(&parent_id) {
            p.children.push(id);
        }

        self.extend_inheritance_into(id);
        Ok(id)
    }

    /// Move an element under a new parent. Inherited properties and
    /// checks whose source is no longer an ancestor are pruned; the new
    /// ancestor chain's inheritable carriers are placed.
    pub fn reparent(&mut self, element: Handle, new_parent: Handle) -> Result<(), TreeError> {
        let id = self.resolve(element)?;
        let new_parent_id = self.resolve(new_parent)?;
        self.guard_writable(id)?;
        self.guard_writable(new_parent_id)?;

        if id == new_parent_id || self.ancestors(new_parent_id).contains(&id) {
            return Err(TreeError::InvalidOperation(
                "cannot reparent an element under its own subtree".into(),
            ));
        }
        let child_kind = self.elements[&id].kind.clone();
        let parent_kind = self.elements[&new_parent_id].kind.clone();
        if !parent_kind.may_parent(&child_kind) {
            return Err(TreeError::IllegalEdge {
                parent: parent_kind.kind_name(),
                child: child_kind.kind_name(),
            });
        }

        let old_parent = self.elements[&id].parent;
        if let Some(op) = old_parent {
            if let Some(p) = self.elements.get_mut(&op) {
                p.children.retain(|c| *c != id);
            }
        }
        if let Some(p) = self.elements.get_mut(&new_parent_id) {
            p.children.push(id);
        }
        if let Some(el) = self.elements.get_mut(&id) {
            el.parent = Some(new_parent_id);
            let new_state = match parent_kind {
                ElementKind::Bucket { .. } => ObjectState::Standalone,
                _ => ObjectState::Grouped,
            };
            if el.state != new_state {
                let old = el.state;
                el.state = new_state;
                self.events.push(TreeEvent::StateChanged { element_id: id, old, new: new_state });
            }
        }
        self.events.push(TreeEvent::MembershipChanged {
            element_id: id,
            old_parent,
            new_parent: new_parent_id,
        });

        self.prune_stale_inheritance(id);
        self.extend_inheritance_into(id);
        Ok(())
    }

    /// Detach an element from its group or cluster, returning it to the
    /// enclosing bucket.
    pub fn detach(&mut self, element: Handle) -> Result<(), TreeError> {
        let id = self.resolve(element)?;
        let el = &self.elements[&id];
        match el.kind {
            ElementKind::Repository | ElementKind::Bucket { .. } => {
                return Err(TreeError::InvalidOperation(format!(
                    "cannot detach a {}",
                    el.kind.kind_name()
                )))
            }
            _ => {}
        }
        let bucket = self
            .enclosing_bucket(id)
            .ok_or_else(|| TreeError::Corrupt(format!("element {} has no bucket", id)))?;
        if self.elements[&id].parent == Some(bucket) {
            return Ok(()); // already at bucket level
        }
        self.reparent(Handle::Element(id), Handle::Element(bucket))
    }

    /// Remove an element and its whole subtree.
    pub fn destroy(&mut self, element: Handle) -> Result<(), TreeError> {
        let id = self.resolve(element)?;
        self.guard_writable(id)?;
        if id == self.root {
            return Err(TreeError::InvalidOperation(
                "cannot destroy the repository root".into(),
            ));
        }

        let mut doomed = self.descendants(id);
        doomed.push(id);
        // remove depth-first so events read leaves-first
        doomed.reverse();

        if let Some(parent) = self.elements[&id].parent {
            if let Some(p) = self.elements.get_mut(&parent) {
                p.children.retain(|c| *c != id);
            }
        }
        for d in doomed {
            if let Some(el) = self.elements.remove(&d) {
                self.events.push(TreeEvent::ElementRemoved {
                    element_id: d,
                    kind: el.kind,
                });
            }
        }
        Ok(())
    }

    /// Freeze or thaw a bucket. A frozen bucket rejects every mutation
    /// to itself and its descendants.
    pub fn set_bucket_frozen(&mut self, bucket: Handle, value: bool) -> Result<(), TreeError> {
        let id = self.resolve(bucket)?;
        let el = self.get_mut(id)?;
        match &mut el.kind {
            ElementKind::Bucket { frozen, .. } => {
                if *frozen != value {
                    *frozen = value;
                    let old = el.state;
                    el.state = if value { ObjectState::Frozen } else { ObjectState::Active };
                    let new = el.state;
                    self.events.push(TreeEvent::BucketFrozen { element_id: id, frozen: value });
                    self.events.push(TreeEvent::StateChanged { element_id: id, old, new });
                }
                Ok(())
            }
            _ => Err(TreeError::InvalidOperation(format!(
                "cannot freeze a {}",
                el.kind.kind_name()
            ))),
        }
    }

    // ── Properties ────────────────────────────────────────────────────────────

    /// Place a property on an element. With `inheritance` set, a copy is
    /// placed on every descendant that does not already carry one from
    /// the same source or a conflicting `(type, view, name)` property.
    /// A `children_only` source is stored on the element but does not
    /// apply to it; only its inherited copies do.
    pub fn set_property(
        &mut self,
        target: Handle,
        spec: PropertySpec,
    ) -> Result<PropertyInstanceId, TreeError> {
        let id = self.resolve(target)?;
        self.guard_writable(id)?;

        let instance_id = PropertyInstanceId::generate();
        let source = PropertyInstance {
            instance_id,
            source_instance_id: instance_id,
            view: spec.view,
            inheritance: spec.inheritance,
            children_only: spec.children_only,
            payload: spec.payload,
        };
        let key = source.conflict_key();

        let el = self.get_mut(id)?;
        if el.has_conflicting_property(&key) {
            return Err(TreeError::Conflict(format!(
                "{} property '{}' (view {}) already present on '{}'",
                key.0, key.2, key.1, el.name
            )));
        }
        el.properties.map_mut(key.0).insert(instance_id, source.clone());
        self.events.push(TreeEvent::PropertySet {
            element_id: id,
            property: source.clone(),
        });

        if source.inheritance {
            self.place_inherited_property_copies(id, &source);
        }
        Ok(instance_id)
    }

    /// Delete a directly-placed property and every inherited copy of it.
    pub fn delete_property(
        &mut self,
        target: Handle,
        instance_id: PropertyInstanceId,
    ) -> Result<(), TreeError> {
        let id = self.resolve(target)?;
        self.guard_writable(id)?;

        let source = self
            .elements
            .get(&id)
            .and_then(|e| e.property(instance_id))
            .cloned()
            .ok_or_else(|| TreeError::NotFound(format!("property {}", instance_id)))?;
        if source.is_inherited() {
            return Err(TreeError::InheritedCopy(instance_id.to_string()));
        }

        let ptype = source.payload.property_type();
        let victims: Vec<(ElementId, PropertyInstanceId)> = self
            .elements
            .values()
            .flat_map(|e| {
                e.properties
                    .map(ptype)
                    .values()
                    .filter(|p| p.source_instance_id == instance_id)
                    .map(move |p| (e.id, p.instance_id))
            })
            .collect();
        for (eid, iid) in victims {
            if let Some(el) = self.elements.get_mut(&eid) {
                el.properties.map_mut(ptype).remove(&iid);
                self.events.push(TreeEvent::PropertyDeleted {
                    element_id: eid,
                    instance_id: iid,
                    property_type: ptype,
                });
            }
        }
        Ok(())
    }

    fn place_inherited_property_copies(&mut self, source_el: ElementId, src: &PropertyInstance) {
        let targets = self.descendants(source_el);
        self.place_property_copies_on(&targets, src);
    }

    fn place_property_copies_on(&mut self, targets: &[ElementId], src: &PropertyInstance) {
        let key = src.conflict_key();
        for t in targets {
            let el = match self.elements.get(t) {
                Some(e) => e,
                None => continue,
            };
            if el
                .properties
                .iter_all()
                .any(|p| p.source_instance_id == src.source_instance_id)
                || el.has_conflicting_property(&key)
            {
                continue;
            }
            let copy = PropertyInstance {
                instance_id: PropertyInstanceId::generate(),
                source_instance_id: src.source_instance_id,
                view: src.view,
                inheritance: true,
                children_only: false,
                payload: src.payload.clone(),
            };
            if let Some(el) = self.elements.get_mut(t) {
                el.properties.map_mut(key.0).insert(copy.instance_id, copy.clone());
                self.events.push(TreeEvent::PropertySet { element_id: *t, property: copy });
            }
        }
    }

    // ── Checks ────────────────────────────────────────────────────────────────

    /// Place a check configuration on an element. Inheritance mirrors
    /// property inheritance; inherited copies share `source_check_id`.
    /// Re-issuing a configuration that already exists is a conflict.
    pub fn set_check(&mut self, target: Handle, config: CheckConfig) -> Result<CheckId, TreeError> {
        let id = self.resolve(target)?;
        self.guard_writable(id)?;

        let check_id = config.id;
        let exists = self.elements.values().any(|e| {
            e.checks
                .values()
                .any(|c| c.source_check_id == check_id || c.config.name == config.name)
        });
        if exists {
            return Err(TreeError::Conflict(format!(
                "check configuration '{}' already exists",
                config.name
            )));
        }

        let placed = PlacedCheck {
            check_id,
            source_check_id: check_id,
            config: config.clone(),
        };
        let el = self.get_mut(id)?;
        el.checks.insert(check_id, placed.clone());
        self.events.push(TreeEvent::CheckSet { element_id: id, check: placed });

        if config.inheritance {
            let targets = self.descendants(id);
            self.place_check_copies_on(&targets, check_id, &config);
        }
        Ok(check_id)
    }

    /// Delete a check configuration and its inherited copies.
    pub fn delete_check(&mut self, target: Handle, check_id: CheckId) -> Result<(), TreeError> {
        let id = self.resolve(target)?;
        self.guard_writable(id)?;

        let found = self
            .elements
            .values()
            .any(|e| e.checks.values().any(|c| c.source_check_id == check_id));
        if !found {
            return Err(TreeError::NotFound(format!("check {}", check_id)));
        }

        let victims: Vec<(ElementId, CheckId)> = self
            .elements
            .values()
            .flat_map(|e| {
                e.checks
                    .values()
                    .filter(|c| c.source_check_id == check_id)
                    .map(move |c| (e.id, c.check_id))
            })
            .collect();
        for (eid, cid) in victims {
            if let Some(el) = self.elements.get_mut(&eid) {
                el.checks.remove(&cid);
                self.events.push(TreeEvent::CheckDeleted { element_id: eid, check_id: cid });
            }
        }
        Ok(())
    }

    fn place_check_copies_on(
        &mut self,
        targets: &[ElementId],
        source_check_id: CheckId,
        config: &CheckConfig,
    ) {
        for t in targets {
            let el = match self.elements.get(t) {
                Some(e) => e,
                None => continue,
            };
            if el.checks.values().any(|c| c.source_check_id == source_check_id) {
                continue;
            }
            let copy_id = CheckId::generate();
            let mut cfg = config.clone();
            cfg.id = copy_id;
            let copy = PlacedCheck { check_id: copy_id, source_check_id, config: cfg };
            if let Some(el) = self.elements.get_mut(t) {
                el.checks.insert(copy_id, copy.clone());
                self.events.push(TreeEvent::CheckSet { element_id: *t, check: copy });
            }
        }
    }

    // ── Inheritance maintenance ───────────────────────────────────────────────

    /// Place the ancestor chain's inheritable properties and checks onto
    /// a freshly attached or moved subtree.
    fn extend_inheritance_into(&mut self, subtree_root: ElementId) {
        let ancestors = self.ancestors(subtree_root);
        let mut inheritable_props: Vec<PropertyInstance> = Vec::new();
        let mut inheritable_checks: Vec<(CheckId, CheckConfig)> = Vec::new();
        // farthest ancestor first so nearer placements can shadow
        for a in ancestors.iter().rev() {
            let el = &self.elements[a];
            for p in el.properties.iter_all().filter(|p| p.inheritance && !p.is_inherited()) {
                inheritable_props.push(p.clone());
            }
            for c in el
                .checks
                .values()
                .filter(|c| c.config.inheritance && !c.is_inherited())
            {
                inheritable_checks.push((c.source_check_id, c.config.clone()));
            }
        }

        let mut targets = vec![subtree_root];
        targets.extend(self.descendants(subtree_root));
        for p in inheritable_props {
            self.place_property_copies_on(&targets, &p);
        }
        for (source_id, cfg) in inheritable_checks {
            self.place_check_copies_on(&targets, source_id, &cfg);
        }
    }

    /// Remove inherited copies whose source is no longer on the ancestor
    /// chain after a move.
    fn prune_stale_inheritance(&mut self, subtree_root: ElementId) {
        let mut scope = vec![subtree_root];
        scope.extend(self.descendants(subtree_root));

        for t in scope {
            let ancestor_prop_sources: HashSet<PropertyInstanceId> = self
                .ancestors(t)
                .iter()
                .filter_map(|a| self.elements.get(a))
                .flat_map(|e| e.properties.iter_all())
                .map(|p| p.source_instance_id)
                .collect();
            let ancestor_check_sources: HashSet<CheckId> = self
                .ancestors(t)
                .iter()
                .filter_map(|a| self.elements.get(a))
                .flat_map(|e| e.checks.values())
                .map(|c| c.source_check_id)
                .collect();

            let el = match self.elements.get(&t) {
                Some(e) => e,
                None => continue,
            };
            let stale_props: Vec<(PropertyInstanceId, PropertyType)> = el
                .properties
                .iter_all()
                .filter(|p| p.is_inherited() && !ancestor_prop_sources.contains(&p.source_instance_id))
                .map(|p| (p.instance_id, p.payload.property_type()))
                .collect();
            let stale_checks: Vec<CheckId> = el
                .checks
                .values()
                .filter(|c| c.is_inherited() && !ancestor_check_sources.contains(&c.source_check_id))
                .map(|c| c.check_id)
                .collect();

            if let Some(el) = self.elements.get_mut(&t) {
                for (iid, ptype) in stale_props {
                    el.properties.map_mut(ptype).remove(&iid);
                    self.events.push(TreeEvent::PropertyDeleted {
                        element_id: t,
                        instance_id: iid,
                        property_type: ptype,
                    });
                }
                for cid in stale_checks {
                    el.checks.remove(&cid);
                    self.events.push(TreeEvent::CheckDeleted { element_id: t, check_id: cid });
                }
            }
        }
    }

    // ── Boot-time loading ─────────────────────────────────────────────────────
    //
    // The store persists direct placements only; inherited copies are
    // reconstructed by walking the tree after all rows are loaded.

    /// Insert an element as loaded from the store. No events, no
    /// inheritance; call [`Tree::rebuild_inheritance`] once all rows are in.
    pub fn load_element(&mut self, mut element: Element) -> Result<(), TreeError> {
        let parent_id = element
            .parent
            .ok_or_else(|| TreeError::Corrupt(format!("loaded element {} has no parent", element.id)))?;
        let parent = self
            .elements
            .get(&parent_id)
            .ok_or_else(|| TreeError::Corrupt(format!("parent {} not loaded yet", parent_id)))?;
        if !parent.kind.may_parent(&element.kind) {
            return Err(TreeError::IllegalEdge {
                parent: parent.kind.kind_name(),
                child: element.kind.kind_name(),
            });
        }
        element.children.clear();
        let id = element.id;
        self.elements.insert(id, element);
        if let Some(p) = self.elements.get_mut(&parent_id) {
            p.children.push(id);
        }
        Ok(())
    }

    /// Place a property row as loaded from the store (a direct placement).
    pub fn load_property(
        &mut self,
        element_id: ElementId,
        property: PropertyInstance,
    ) -> Result<(), TreeError> {
        let el = self.get_mut(element_id)?;
        let t = property.payload.property_type();
        el.properties.map_mut(t).insert(property.instance_id, property);
        Ok(())
    }

    /// Place a check row as loaded from the store (a direct placement).
    pub fn load_check(
        &mut self,
        element_id: ElementId,
        check: PlacedCheck,
    ) -> Result<(), TreeError> {
        let el = self.get_mut(element_id)?;
        el.checks.insert(check.check_id, check);
        Ok(())
    }

    /// Reconstruct every inherited property and check copy by walking the
    /// tree top-down. Emits no events; boot does not persist copies.
    pub fn rebuild_inheritance(&mut self) {
        let order = {
            let mut v = vec![self.root];
            v.extend(self.descendants(self.root));
            v
        };
        let before = self.events.len();
        for id in order {
            let sources: Vec<PropertyInstance> = match self.elements.get(&id) {
                Some(el) => el
                    .properties
                    .iter_all()
                    .filter(|p| p.inheritance && !p.is_inherited())
                    .cloned()
                    .collect(),
                None => continue,
            };
            let checks: Vec<(CheckId, CheckConfig)> = self.elements[&id]
                .checks
                .values()
                .filter(|c| c.config.inheritance && !c.is_inherited())
                .map(|c| (c.source_check_id, c.config.clone()))
                .collect();
            for p in &sources {
                self.place_inherited_property_copies(id, p);
            }
            for (source_id, cfg) in &checks {
                let targets = self.descendants(id);
                self.place_check_copies_on(&targets, *source_id, cfg);
            }
        }
        self.events.truncate(before);
    }

    // ── Cloning ───────────────────────────────────────────────────────────────

    /// Deep-clone this repository tree under a new identity. Every
    /// element, property placement, and check gets fresh ids; inherited
    /// copies are rebuilt rather than copied.
    pub fn clone_repository(&self, new_id: RepositoryId, new_name: String) -> Tree {
        let mut out = Tree::new(new_id, new_name, self.elements[&self.root].team_id);
        out.service_catalog = self.service_catalog.clone();

        let mut id_map: HashMap<ElementId, ElementId> = HashMap::new();
        id_map.insert(self.root, out.root);

        let mut order = vec![self.root];
        order.extend(self.descendants(self.root));
        for old_id in order {
            let old = &self.elements[&old_id];
            let new_el_id = if old_id == self.root {
                out.root
            } else {
                let fresh = ElementId::generate();
                id_map.insert(old_id, fresh);
                let mut kind = old.kind.clone();
                if let ElementKind::Bucket { repository_id, .. } = &mut kind {
                    *repository_id = new_id;
                }
                let mut el = Element::new(fresh, kind, old.name.clone(), old.team_id);
                el.state = old.state;
                el.parent = old.parent.map(|p| id_map[&p]);
                let parent = id_map[&old.parent.unwrap_or(self.root)];
                out.elements.insert(fresh, el);
                if let Some(p) = out.elements.get_mut(&parent) {
                    p.children.push(fresh);
                }
                fresh
            };

            // direct placements only; fresh ids, inheritance rebuilt below
            let direct_props: Vec<PropertyInstance> = old
                .properties
                .iter_all()
                .filter(|p| !p.is_inherited())
                .cloned()
                .collect();
            let direct_checks: Vec<CheckConfig> = old
                .checks
                .values()
                .filter(|c| !c.is_inherited())
                .map(|c| c.config.clone())
                .collect();
            if let Some(el) = out.elements.get_mut(&new_el_id) {
                for p in direct_props {
                    let iid = PropertyInstanceId::generate();
                    let copy = PropertyInstance {
                        instance_id: iid,
                        source_instance_id: iid,
                        view: p.view,
                        inheritance: p.inheritance,
                        children_only: p.children_only,
                        payload: p.payload,
                    };
                    el.properties.map_mut(copy.payload.property_type()).insert(iid, copy);
                }
                for mut cfg in direct_checks {
                    let cid = CheckId::generate();
                    cfg.id = cid;
                    el.checks.insert(cid, PlacedCheck {
                        check_id: cid,
                        source_check_id: cid,
                        config: cfg,
                    });
                }
            }
        }

        out.rebuild_inheritance();
        out.events.clear();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soma_domain::{BucketId, PropertyPayload, View};

    fn repo_tree() -> (Tree, ElementId) {
        let repo_id = RepositoryId::generate();
        let tree = Tree::new(repo_id, "testrepo".into(), TeamId::generate());
        let root = tree.root_id();
        (tree, root)
    }

    fn bucket_kind(tree: &Tree) -> ElementKind {
        ElementKind::Bucket {
            environment: Environment::Dev,
            repository_id: tree.repository_id(),
            frozen: false,
        }
    }

    fn attach_bucket(tree: &mut Tree, root: ElementId, name: &str) -> ElementId {
        let kind = bucket_kind(tree);
        tree.attach(AttachRequest {
            parent: Handle::Element(root),
            element_id: ElementId::new(BucketId::generate().as_uuid()),
            kind,
            name: name.into(),
            team_id: TeamId::generate(),
        })
        .unwrap()
    }

    fn attach_node(tree: &mut Tree, parent: ElementId, name: &str) -> ElementId {
        tree.attach(AttachRequest {
            parent: Handle::Element(parent),
            element_id: ElementId::generate(),
            kind: ElementKind::Node {
                asset_id: 42,
                server_id: soma_domain::ServerId::generate(),
                online: true,
            },
            name: name.into(),
            team_id: TeamId::generate(),
        })
        .unwrap()
    }

    #[test]
    fn attach_enforces_edge_legality() {
        let (mut tree, root) = repo_tree();
        // node directly under repository is illegal
        let err = tree
            .attach(AttachRequest {
                parent: Handle::Element(root),
                element_id: ElementId::generate(),
                kind: ElementKind::Node {
                    asset_id: 1,
                    server_id: soma_domain::ServerId::generate(),
                    online: true,
                },
                name: "n1".into(),
                team_id: TeamId::generate(),
            })
            .unwrap_err();
        assert!(matches!(err, TreeError::IllegalEdge { .. }));
    }

    #[test]
    fn find_by_name_and_ambiguity_fault() {
        let (mut tree, root) = repo_tree();
        let b1 = attach_bucket(&mut tree, root, "b-dev");
        attach_bucket(&mut tree, root, "b-live");

        assert_eq!(
            tree.find(&FindRequest::by_name("bucket", "b-dev")),
            Handle::Element(b1)
        );
        assert_eq!(tree.find(&FindRequest::by_name("bucket", "nope")), Handle::Nil);

        // same (kind, name) in two places: fault, and operations on the
        // fault handle are rejected without touching the tree
        let g1 = tree
            .attach(AttachRequest {
                parent: Handle::Element(b1),
                element_id: ElementId::generate(),
                kind: ElementKind::Group,
                name: "dup".into(),
                team_id: TeamId::generate(),
            })
            .unwrap();
        tree.attach(AttachRequest {
            parent: Handle::Element(g1),
            element_id: ElementId::generate(),
            kind: ElementKind::Group,
            name: "dup".into(),
            team_id: TeamId::generate(),
        })
        .unwrap();
        let h = tree.find(&FindRequest::by_name("group", "dup"));
        assert!(h.is_fault());
        let err = tree.destroy(h).unwrap_err();
        assert!(matches!(err, TreeError::Fault));
    }

    #[test]
    fn inherited_property_reaches_descendants_with_source_id() {
        let (mut tree, root) = repo_tree();
        let b1 = attach_bucket(&mut tree, root, "b-dev");
        let g1 = tree
            .attach(AttachRequest {
                parent: Handle::Element(b1),
                element_id: ElementId::generate(),
                kind: ElementKind::Group,
                name: "g1".into(),
                team_id: TeamId::generate(),
            })
            .unwrap();
        let n1 = attach_node(&mut tree, g1, "n1");

        let iid = tree
            .set_property(
                Handle::Element(root),
                PropertySpec {
                    view: View::Internal,
                    inheritance: true,
                    children_only: false,
                    payload: PropertyPayload::System { name: "tag".into(), value: "web".into() },
                },
            )
            .unwrap();

        for el_id in [b1, g1, n1] {
            let el = tree.element(el_id).unwrap();
            let copy = el
                .properties
                .system
                .values()
                .find(|p| p.source_instance_id == iid)
                .expect("descendant carries inherited copy");
            assert!(copy.is_inherited());
            assert_eq!(copy.payload.name(), "tag");
        }
    }

    #[test]
    fn late_attach_receives_ancestor_properties() {
        let (mut tree, root) = repo_tree();
        let iid = tree
            .set_property(
                Handle::Element(root),
                PropertySpec {
                    view: View::Internal,
                    inheritance: true,
                    children_only: false,
                    payload: PropertyPayload::System { name: "tag".into(), value: "web".into() },
                },
            )
            .unwrap();
        let b1 = attach_bucket(&mut tree, root, "b-dev");
        let el = tree.element(b1).unwrap();
        assert!(el.properties.system.values().any(|p| p.source_instance_id == iid));
    }

    #[test]
    fn children_only_source_does_not_apply_to_self_but_propagates() {
        let (mut tree, root) = repo_tree();
        let b1 = attach_bucket(&mut tree, root, "b-dev");
        let iid = tree
            .set_property(
                Handle::Element(root),
                PropertySpec {
                    view: View::Any,
                    inheritance: true,
                    children_only: true,
                    payload: PropertyPayload::System { name: "co".into(), value: "x".into() },
                },
            )
            .unwrap();

        let root_el = tree.element(root).unwrap();
        let own = root_el.property(iid).unwrap();
        assert!(own.children_only);

        let bucket_copy = tree
            .element(b1)
            .unwrap()
            .properties
            .system
            .values()
            .find(|p| p.source_instance_id == iid)
            .unwrap();
        assert!(!bucket_copy.children_only);
    }

    #[test]
    fn delete_property_removes_all_copies() {
        let (mut tree, root) = repo_tree();
        let b1 = attach_bucket(&mut tree, root, "b-dev");
        let n1 = attach_node(&mut tree, b1, "n1");
        tree.drain_events();

        let iid = tree
            .set_property(
                Handle::Element(root),
                PropertySpec {
                    view: View::Internal,
                    inheritance: true,
                    children_only: false,
                    payload: PropertyPayload::System { name: "tag".into(), value: "web".into() },
                },
            )
            .unwrap();
        tree.delete_property(Handle::Element(root), iid).unwrap();

        for id in [root, b1, n1] {
            assert!(tree.element(id).unwrap().properties.system.is_empty());
        }
    }

    #[test]
    fn deleting_an_inherited_copy_is_rejected() {
        let (mut tree, root) = repo_tree();
        let b1 = attach_bucket(&mut tree, root, "b-dev");
        tree.set_property(
            Handle::Element(root),
            PropertySpec {
                view: View::Internal,
                inheritance: true,
                children_only: false,
                payload: PropertyPayload::System { name: "tag".into(), value: "web".into() },
            },
        )
        .unwrap();
        let copy_id = tree
            .element(b1)
            .unwrap()
            .properties
            .system
            .values()
            .next()
            .unwrap()
            .instance_id;
        let err = tree.delete_property(Handle::Element(b1), copy_id).unwrap_err();
        assert!(matches!(err, TreeError::InheritedCopy(_)));
    }

    #[test]
    fn frozen_bucket_rejects_mutations_below_it() {
        let (mut tree, root) = repo_tree();
        let b1 = attach_bucket(&mut tree, root, "b-dev");
        let g1 = tree
            .attach(AttachRequest {
                parent: Handle::Element(b1),
                element_id: ElementId::generate(),
                kind: ElementKind::Group,
                name: "g1".into(),
                team_id: TeamId::generate(),
            })
            .unwrap();
        tree.set_bucket_frozen(Handle::Element(b1), true).unwrap();

        let err = tree
            .set_property(
                Handle::Element(g1),
                PropertySpec {
                    view: View::Any,
                    inheritance: false,
                    children_only: false,
                    payload: PropertyPayload::System { name: "x".into(), value: "y".into() },
                },
            )
            .unwrap_err();
        assert!(matches!(err, TreeError::ReadonlyBucket));
        assert_eq!(err.to_string(), "Readonly bucket");

        // property at repository level is still fine
        tree.set_property(
            Handle::Element(root),
            PropertySpec {
                view: View::Any,
                inheritance: false,
                children_only: false,
                payload: PropertyPayload::System { name: "x".into(), value: "y".into() },
            },
        )
        .unwrap();
    }

    #[test]
    fn duplicate_check_configuration_conflicts() {
        let (mut tree, root) = repo_tree();
        let cfg = CheckConfig {
            id: CheckId::generate(),
            name: "cpu-load".into(),
            capability_id: soma_domain::CapabilityId::generate(),
            interval_sec: 60,
            view: soma_domain::View::Internal,
            inheritance: true,
            children_only: false,
            enabled: true,
            thresholds: vec![],
            constraints: vec![],
        };
        tree.set_check(Handle::Element(root), cfg.clone()).unwrap();
        let err = tree.set_check(Handle::Element(root), cfg).unwrap_err();
        assert!(matches!(err, TreeError::Conflict(_)));
    }

    #[test]
    fn reparent_prunes_and_extends_inheritance() {
        let (mut tree, root) = repo_tree();
        let b1 = attach_bucket(&mut tree, root, "b-dev");
        let g1 = tree
            .attach(AttachRequest {
                parent: Handle::Element(b1),
                element_id: ElementId::generate(),
                kind: ElementKind::Group,
                name: "g1".into(),
                team_id: TeamId::generate(),
            })
            .unwrap();
        let g2 = tree
            .attach(AttachRequest {
                parent: Handle::Element(b1),
                element_id: ElementId::generate(),
                kind: ElementKind::Group,
                name: "g2".into(),
                team_id: TeamId::generate(),
            })
            .unwrap();
        let n1 = attach_node(&mut tree, g1, "n1");

        // group-level property on g1 only
        let iid = tree
            .set_property(
                Handle::Element(g1),
                PropertySpec {
                    view: View::Internal,
                    inheritance: true,
                    children_only: false,
                    payload: PropertyPayload::System { name: "grp".into(), value: "one".into() },
                },
            )
            .unwrap();
        assert!(tree
            .element(n1)
            .unwrap()
            .properties
            .system
            .values()
            .any(|p| p.source_instance_id == iid));

        tree.reparent(Handle::Element(n1), Handle::Element(g2)).unwrap();
        assert!(!tree
            .element(n1)
            .unwrap()
            .properties
            .system
            .values()
            .any(|p| p.source_instance_id == iid));
    }

    #[test]
    fn clone_repository_rebuilds_fresh_ids() {
        let (mut tree, root) = repo_tree();
        let b1 = attach_bucket(&mut tree, root, "b-dev");
        attach_node(&mut tree, b1, "n1");
        tree.set_property(
            Handle::Element(root),
            PropertySpec {
                view: View::Internal,
                inheritance: true,
                children_only: false,
                payload: PropertyPayload::System { name: "tag".into(), value: "web".into() },
            },
        )
        .unwrap();

        let clone = tree.clone_repository(RepositoryId::generate(), "copy".into());
        assert_eq!(clone.len(), tree.len());
        assert_ne!(clone.repository_id(), tree.repository_id());
        // inherited copies exist in the clone with their own lineage
        let cloned_node = clone
            .elements()
            .find(|e| matches!(e.kind, ElementKind::Node { .. }))
            .unwrap();
        assert_eq!(cloned_node.properties.system.len(), 1);
    }

    #[test]
    fn create_then_delete_restores_prior_shape() {
        let (mut tree, root) = repo_tree();
        let b1 = attach_bucket(&mut tree, root, "b-dev");
        let n1 = attach_node(&mut tree, b1, "n1");
        tree.drain_events();

        let before: Vec<usize> = [root, b1, n1]
            .iter()
            .map(|id| tree.element(*id).unwrap().properties.iter_all().count())
            .collect();

        let iid = tree
            .set_property(
                Handle::Element(b1),
                PropertySpec {
                    view: View::External,
                    inheritance: true,
                    children_only: false,
                    payload: PropertyPayload::System { name: "fs".into(), value: "ext4".into() },
                },
            )
            .unwrap();
        tree.delete_property(Handle::Element(b1), iid).unwrap();

        let after: Vec<usize> = [root, b1, n1]
            .iter()
            .map(|id| tree.element(*id).unwrap().properties.iter_all().count())
            .collect();
        assert_eq!(before, after);
    }
}
