use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use soma_domain::{CheckId, Constraint, ElementId, PropertyPayload};

use crate::element::{Element, PlacedCheck};
use crate::tree::Tree;

// ── Canonical hashing ─────────────────────────────────────────────────────────

/// Serialize `value` to canonical JSON (object keys sorted) and return
/// its SHA-256 hex digest. All instance dedup hashes go through this so
/// map iteration order can never leak into the digest.
pub fn canonical_hash<T: Serialize>(value: &T) -> String {
    let v = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    let canonical = sort_json_keys(v);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{:x}", digest)
}

/// Recursively sort JSON object keys so HashMap field ordering doesn't
/// affect the hash.
fn sort_json_keys(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .into_iter()
                .map(|(k, v)| (k, sort_json_keys(v)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(sort_json_keys).collect())
        }
        other => other,
    }
}

// ── Computed instances ────────────────────────────────────────────────────────

/// One instance the tree computed for a `(check, element)` pair that
/// satisfied every constraint. Identity for dedup is
/// `(check_id, constraint_hash, constraint_val_hash,
/// instance_service_cfg_hash)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedInstance {
    /// The source check configuration this instance belongs to.
    pub check_id: CheckId,
    pub element_id: ElementId,
    pub constraint_hash: String,
    pub constraint_val_hash: String,
    pub instance_service_cfg_hash: String,
    pub service_config: HashMap<String, String>,
}

impl Tree {
    /// Compute the full instance set of one check configuration:
    /// every element carrying a copy of the check and satisfying all of
    /// its constraints yields one instance.
    pub fn compute_instances_for(&self, source_check_id: CheckId) -> Vec<ComputedInstance> {
        let mut out = Vec::new();
        for el in self.elements() {
            for placed in el.checks.values() {
                if placed.source_check_id != source_check_id {
                    continue;
                }
                if let Some(inst) = self.materialise(el, placed) {
                    out.push(inst);
                }
            }
        }
        out
    }

    /// Compute the instance sets of every check in the tree.
    pub fn compute_all_instances(&self) -> Vec<ComputedInstance> {
        let mut out = Vec::new();
        for el in self.elements() {
            for placed in el.checks.values() {
                if let Some(inst) = self.materialise(el, placed) {
                    out.push(inst);
                }
            }
        }
        out
    }

    /// Every source check id currently placed somewhere in the tree.
    pub fn source_check_ids(&self) -> Vec<CheckId> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for el in self.elements() {
            for c in el.checks.values() {
                if seen.insert(c.source_check_id) {
                    out.push(c.source_check_id);
                }
            }
        }
        out
    }

    /// Source check ids whose instance set may have changed given the
    /// set of elements touched by a request.
    pub fn checks_affected_by(&self, touched: &[ElementId]) -> Vec<CheckId> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for id in touched {
            // a change on an element can affect checks placed on it and,
            // through inheritance, everything placed on its ancestors
            let mut scope = vec![*id];
            scope.extend(self.ancestors(*id));
            for eid in scope {
                if let Some(el) = self.element(eid) {
                    for c in el.checks.values() {
                        if seen.insert(c.source_check_id) {
                            out.push(c.source_check_id);
                        }
                    }
                }
            }
        }
        out
    }

    fn materialise(&self, el: &Element, placed: &PlacedCheck) -> Option<ComputedInstance> {
        if !placed.config.enabled {
            return None;
        }
        // a children_only source placement applies to descendants only
        if placed.config.children_only && !placed.is_inherited() {
            return None;
        }

        let mut identifiers: Vec<String> = Vec::new();
        let mut resolved: BTreeMap<String, String> = BTreeMap::new();
        let mut service_config: BTreeMap<String, String> = BTreeMap::new();

        for constraint in &placed.config.constraints {
            let value = self.resolve_constraint(el, constraint)?;
            identifiers.push(constraint.identifier());
            resolved.insert(constraint.identifier(), value);

            if let Constraint::Service { team_id, name } = constraint {
                // materialise the service attribute selection: catalog
                // defaults overlaid by the property's own attributes
                if let Some(defined) = self
                    .service_catalog
                    .get(team_id)
                    .and_then(|services| services.get(name))
                {
                    for attr in defined {
                        service_config.insert(attr.name.clone(), attr.value.clone());
                    }
                }
                if let Some(attrs) = service_attributes(el, name) {
                    for attr in attrs {
                        service_config.insert(attr.0, attr.1);
                    }
                }
            }
        }

        identifiers.sort();

        Some(ComputedInstance {
            check_id: placed.source_check_id,
            element_id: el.id,
            constraint_hash: canonical_hash(&identifiers),
            constraint_val_hash: canonical_hash(&resolved),
            instance_service_cfg_hash: canonical_hash(&service_config),
            service_config: service_config.into_iter().collect(),
        })
    }

    /// Evaluate one constraint against an element, returning the resolved
    /// value when it holds.
    fn resolve_constraint(&self, el: &Element, constraint: &Constraint) -> Option<String> {
        match constraint {
            Constraint::Native { property, value } => {
                let actual = match property.as_str() {
                    "environment" => self.environment_of(el.id)?.to_string(),
                    "object_state" => el.state.to_string(),
                    "object_type" => el.kind.kind_name().to_string(),
                    _ => return None,
                };
                (actual == *value).then_some(actual)
            }
            Constraint::System { name, value } => effective(el).find_map(|p| match &p.payload {
                PropertyPayload::System { name: n, value: v } if n == name && v == value => {
                    Some(v.clone())
                }
                _ => None,
            }),
            Constraint::Custom { id, value } => effective(el).find_map(|p| match &p.payload {
                PropertyPayload::Custom { id: pid, value: v, .. } if pid == id && v == value => {
                    Some(v.clone())
                }
                _ => None,
            }),
            Constraint::Service { team_id, name } => {
                if el.team_id != *team_id {
                    return None;
                }
                effective(el).find_map(|p| match &p.payload {
                    PropertyPayload::Service { name: n, .. } if n == name => Some(n.clone()),
                    _ => None,
                })
            }
            Constraint::Attribute { name, value } => effective(el).find_map(|p| match &p.payload {
                PropertyPayload::Service { attributes, .. } => attributes
                    .iter()
                    .find(|a| a.name == *name && a.value == *value)
                    .map(|a| a.value.clone()),
                _ => None,
            }),
            Constraint::Oncall { id } => effective(el).find_map(|p| match &p.payload {
                PropertyPayload::Oncall { id: oid, name, .. } if oid == id => Some(name.clone()),
                _ => None,
            }),
        }
    }
}

/// Properties that apply to the element itself: everything except
/// `children_only` source placements.
fn effective(el: &Element) -> impl Iterator<Item = &crate::element::PropertyInstance> {
    el.properties.iter_all().filter(|p| !p.children_only)
}

fn service_attributes(el: &Element, service: &str) -> Option<Vec<(String, String)>> {
    effective(el).find_map(|p| match &p.payload {
        PropertyPayload::Service { name, attributes } if name == service => Some(
            attributes
                .iter()
                .map(|a| (a.name.clone(), a.value.clone()))
                .collect(),
        ),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementKind, Handle};
    use crate::tree::{AttachRequest, Tree};
    use soma_domain::{
        CapabilityId, CheckConfig, Environment, Predicate, PropertySpec, RepositoryId,
        ServerId, ServiceAttribute, TeamId, Threshold, View,
    };

    fn scaffold() -> (Tree, ElementId, ElementId, ElementId, ElementId, TeamId) {
        let team = TeamId::generate();
        let repo_id = RepositoryId::generate();
        let mut tree = Tree::new(repo_id, "r1".into(), team);
        let root = tree.root_id();
        let b1 = tree
            .attach(AttachRequest {
                parent: Handle::Element(root),
                element_id: ElementId::generate(),
                kind: ElementKind::Bucket {
                    environment: Environment::Dev,
                    repository_id: repo_id,
                    frozen: false,
                },
                name: "b1".into(),
                team_id: team,
            })
            .unwrap();
        let g1 = tree
            .attach(AttachRequest {
                parent: Handle::Element(b1),
                element_id: ElementId::generate(),
                kind: ElementKind::Group,
                name: "g1".into(),
                team_id: team,
            })
            .unwrap();
        let n1 = tree
            .attach(AttachRequest {
                parent: Handle::Element(g1),
                element_id: ElementId::generate(),
                kind: ElementKind::Node {
                    asset_id: 42,
                    server_id: ServerId::generate(),
                    online: true,
                },
                name: "n1".into(),
                team_id: team,
            })
            .unwrap();
        (tree, root, b1, g1, n1, team)
    }

    fn httpd_check(team: TeamId) -> CheckConfig {
        CheckConfig {
            id: CheckId::generate(),
            name: "httpd-alive".into(),
            capability_id: CapabilityId::generate(),
            interval_sec: 60,
            view: View::Internal,
            inheritance: true,
            children_only: false,
            enabled: true,
            thresholds: vec![Threshold {
                predicate: Predicate::Ge,
                level: "critical".into(),
                value: 90,
            }],
            constraints: vec![Constraint::Service { team_id: team, name: "httpd".into() }],
        }
    }

    #[test]
    fn service_constraint_materialises_only_where_service_exists() {
        let (mut tree, root, _b1, _g1, n1, team) = scaffold();

        tree.set_property(
            Handle::Element(n1),
            PropertySpec {
                view: View::Internal,
                inheritance: false,
                children_only: false,
                payload: soma_domain::PropertyPayload::Service {
                    name: "httpd".into(),
                    attributes: vec![ServiceAttribute { name: "port".into(), value: "80".into() }],
                },
            },
        )
        .unwrap();

        let check_id = tree.set_check(Handle::Element(root), httpd_check(team)).unwrap();
        let instances = tree.compute_instances_for(check_id);

        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].element_id, n1);
        assert_eq!(instances[0].service_config.get("port"), Some(&"80".to_string()));
    }

    #[test]
    fn node_without_service_produces_no_instance() {
        let (mut tree, root, _b1, g1, n1, team) = scaffold();
        // second node without the service property
        tree.attach(AttachRequest {
            parent: Handle::Element(g1),
            element_id: ElementId::generate(),
            kind: ElementKind::Node {
                asset_id: 43,
                server_id: ServerId::generate(),
                online: true,
            },
            name: "n2".into(),
            team_id: team,
        })
        .unwrap();
        tree.set_property(
            Handle::Element(n1),
            PropertySpec {
                view: View::Internal,
                inheritance: false,
                children_only: false,
                payload: soma_domain::PropertyPayload::Service {
                    name: "httpd".into(),
                    attributes: vec![],
                },
            },
        )
        .unwrap();

        let check_id = tree.set_check(Handle::Element(root), httpd_check(team)).unwrap();
        let instances = tree.compute_instances_for(check_id);
        assert_eq!(instances.len(), 1, "only the node carrying the service matches");
        assert_eq!(instances[0].element_id, n1);
    }

    #[test]
    fn constraint_hashes_are_permutation_invariant() {
        let (mut tree, root, _b1, _g1, n1, team) = scaffold();
        tree.set_property(
            Handle::Element(n1),
            PropertySpec {
                view: View::Internal,
                inheritance: false,
                children_only: false,
                payload: soma_domain::PropertyPayload::Service {
                    name: "httpd".into(),
                    attributes: vec![],
                },
            },
        )
        .unwrap();
        tree.set_property(
            Handle::Element(n1),
            PropertySpec {
                view: View::Internal,
                inheritance: false,
                children_only: false,
                payload: soma_domain::PropertyPayload::System {
                    name: "fs".into(),
                    value: "ext4".into(),
                },
            },
        )
        .unwrap();

        let forward = vec![
            Constraint::Service { team_id: team, name: "httpd".into() },
            Constraint::System { name: "fs".into(), value: "ext4".into() },
            Constraint::Native { property: "environment".into(), value: "dev".into() },
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let mut cfg_a = httpd_check(team);
        cfg_a.constraints = forward;
        let mut cfg_b = httpd_check(team);
        cfg_b.id = CheckId::generate();
        cfg_b.name = "httpd-alive-2".into();
        cfg_b.constraints = reversed;

        let a = tree.set_check(Handle::Element(root), cfg_a).unwrap();
        let b = tree.set_check(Handle::Element(root), cfg_b).unwrap();

        let ia = tree.compute_instances_for(a);
        let ib = tree.compute_instances_for(b);
        assert_eq!(ia.len(), 1);
        assert_eq!(ib.len(), 1);
        assert_eq!(ia[0].constraint_hash, ib[0].constraint_hash);
        assert_eq!(ia[0].constraint_val_hash, ib[0].constraint_val_hash);
        assert_eq!(ia[0].instance_service_cfg_hash, ib[0].instance_service_cfg_hash);
    }

    #[test]
    fn native_environment_constraint_filters_buckets() {
        let (mut tree, root, _b1, _g1, n1, team) = scaffold();
        let mut cfg = httpd_check(team);
        cfg.constraints = vec![Constraint::Native {
            property: "environment".into(),
            value: "live".into(),
        }];
        let check_id = tree.set_check(Handle::Element(root), cfg).unwrap();
        // everything sits in the dev bucket; the live constraint matches nothing below it
        let instances = tree.compute_instances_for(check_id);
        assert!(instances.iter().all(|i| i.element_id != n1));
    }

    #[test]
    fn disabled_check_produces_nothing() {
        let (mut tree, root, _b1, _g1, _n1, team) = scaffold();
        let mut cfg = httpd_check(team);
        cfg.enabled = false;
        cfg.constraints = vec![];
        let check_id = tree.set_check(Handle::Element(root), cfg).unwrap();
        assert!(tree.compute_instances_for(check_id).is_empty());
    }

    #[test]
    fn canonical_hash_ignores_map_order() {
        let mut a = HashMap::new();
        a.insert("x", "1");
        a.insert("y", "2");
        let mut b = HashMap::new();
        b.insert("y", "2");
        b.insert("x", "1");
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn service_catalog_provides_attribute_defaults() {
        let (mut tree, root, _b1, _g1, n1, team) = scaffold();
        tree.service_catalog.entry(team).or_default().insert(
            "httpd".into(),
            vec![
                ServiceAttribute { name: "port".into(), value: "8080".into() },
                ServiceAttribute { name: "proto".into(), value: "http".into() },
            ],
        );
        tree.set_property(
            Handle::Element(n1),
            PropertySpec {
                view: View::Internal,
                inheritance: false,
                children_only: false,
                payload: soma_domain::PropertyPayload::Service {
                    name: "httpd".into(),
                    // overrides the catalog port, keeps the proto default
                    attributes: vec![ServiceAttribute { name: "port".into(), value: "80".into() }],
                },
            },
        )
        .unwrap();

        let check_id = tree.set_check(Handle::Element(root), httpd_check(team)).unwrap();
        let instances = tree.compute_instances_for(check_id);
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].service_config.get("port"), Some(&"80".to_string()));
        assert_eq!(instances[0].service_config.get("proto"), Some(&"http".to_string()));
    }
}
