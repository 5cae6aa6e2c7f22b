//! End-to-end lifecycle tests over the in-memory store: repository
//! creation, guided mutations, inheritance, instance materialisation,
//! and the frozen-bucket write barrier.

use std::sync::Arc;
use std::time::Duration;

use soma_domain::{
    CapabilityId, CheckConfig, CheckId, Constraint, ElementId, Environment, InstanceState,
    JobStatus, Predicate, PropertyPayload, PropertySpec, ServerId, ServiceAttribute, TeamId,
    Threshold, UserId, View,
};
use soma_keeper::bus::GUIDEPOST;
use soma_keeper::{
    load_tree, Envelope, ForestCustodian, GrimReaper, GuidePost, HandlerMap, Payload,
    ReplyPayload, Request, WorkflowEngine,
};
use soma_store::{InMemoryStore, NodeInventoryRow, RepositoryRow, Store};
use uuid::Uuid;

struct Harness {
    store: Arc<InMemoryStore>,
    handlers: Arc<HandlerMap>,
    custodian: ForestCustodian,
    team: TeamId,
    user: UserId,
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let handlers = Arc::new(HandlerMap::new());
    let reaper = Arc::new(GrimReaper::new());
    let workflow = Arc::new(WorkflowEngine::new(store.clone(), None));
    let custodian = ForestCustodian::new(
        store.clone(),
        handlers.clone(),
        workflow.clone(),
        reaper.clone(),
    );
    GuidePost::spawn(store.clone(), handlers.clone(), false, &reaper).await;
    Harness {
        store,
        handlers,
        custodian,
        team: TeamId::generate(),
        user: UserId::generate(),
    }
}

impl Harness {
    async fn submit(&self, payload: Payload) -> soma_keeper::Reply {
        let request = Request {
            id: Uuid::new_v4(),
            section: "tree".into(),
            action: payload.job_type().into(),
            user_id: self.user,
            team_id: self.team,
            job_id: None,
            payload,
        };
        let handler = self
            .handlers
            .lookup(GUIDEPOST)
            .await
            .expect("guidepost registered");
        let (env, rx) = Envelope::new(request);
        handler.intake.normal.send(env).await.unwrap();
        rx.await.expect("guidepost replies")
    }

    /// Submit a mutation and wait for its job to finish.
    async fn run(&self, payload: Payload) -> soma_store::JobRow {
        let reply = self.submit(payload).await.expect("accepted");
        let ReplyPayload::Accepted { job_id } = reply else {
            panic!("expected job acknowledgement, got {:?}", reply);
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let job = self.store.get_job(job_id).await.unwrap().unwrap();
            if matches!(job.status, JobStatus::Processed | JobStatus::Failed) {
                return job;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("job {} did not finish", job_id);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn element_by_name(&self, repo: &RepositoryRow, name: &str) -> ElementId {
        self.store
            .list_elements(repo.id)
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.id)
            .unwrap_or_else(|| panic!("element '{}' not found", name))
    }
}

fn root_of(repo: &RepositoryRow) -> ElementId {
    ElementId::new(repo.id.as_uuid())
}

async fn scaffold_repo(h: &Harness) -> (RepositoryRow, ElementId, ElementId, ElementId) {
    let repo = h.custodian.create_repository("repo-one", h.team).await.unwrap();
    h.run(Payload::CreateBucket {
        repository_id: repo.id,
        name: "repo-one-dev".into(),
        environment: Environment::Dev,
        team_id: h.team,
    })
    .await;
    let bucket = h.element_by_name(&repo, "repo-one-dev").await;
    h.run(Payload::CreateGroup {
        bucket_id: soma_domain::BucketId::new(bucket.as_uuid()),
        name: "web-frontend".into(),
        team_id: h.team,
    })
    .await;
    let group = h.element_by_name(&repo, "web-frontend").await;

    // node in the inventory, then assigned into the tree
    let node_id = ElementId::generate();
    h.store
        .upsert_node_inventory(&NodeInventoryRow {
            node_id,
            asset_id: 42,
            name: "node-one".into(),
            team_id: h.team,
            server_id: ServerId::generate(),
            online: true,
            deleted: false,
            assigned: false,
        })
        .await
        .unwrap();
    h.run(Payload::AssignNode {
        node_id,
        repository_id: repo.id,
        bucket_id: soma_domain::BucketId::new(bucket.as_uuid()),
        inventory: None,
    })
    .await;
    h.run(Payload::AddNodeToGroup {
        bucket_id: soma_domain::BucketId::new(bucket.as_uuid()),
        node_id,
        group_id: group,
    })
    .await;
    (repo, bucket, group, node_id)
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

#[tokio::test]
async fn repository_creation_brings_up_a_ready_keeper() {
    let h = harness().await;
    let repo = h.custodian.create_repository("repo-one", h.team).await.unwrap();
    assert!(repo.active);

    let handler = h
        .handlers
        .lookup(&soma_keeper::bus::repository_key("repo-one"))
        .await
        .expect("keeper registered");
    let status = handler.keeper_status.expect("keeper carries status");
    assert!(status.is_ready());
    assert!(!status.is_broken());
}

#[tokio::test]
async fn duplicate_repository_name_is_rejected() {
    let h = harness().await;
    h.custodian.create_repository("repo-one", h.team).await.unwrap();
    assert!(h.custodian.create_repository("repo-one", h.team).await.is_err());
}

#[tokio::test]
async fn short_repository_name_is_rejected() {
    let h = harness().await;
    assert!(h.custodian.create_repository("abc", h.team).await.is_err());
    assert!(h.custodian.create_repository("abcd", h.team).await.is_ok());
}

#[tokio::test]
async fn inherited_property_reaches_the_node() {
    let h = harness().await;
    let (repo, bucket, group, node) = scaffold_repo(&h).await;

    let job = h
        .run(Payload::SetProperty {
            element_id: root_of(&repo),
            spec: PropertySpec {
                view: View::Internal,
                inheritance: true,
                children_only: false,
                payload: PropertyPayload::System { name: "tag".into(), value: "web".into() },
            },
        })
        .await;
    assert_eq!(job.status, JobStatus::Processed);

    // the persisted source sits on the repository element
    let properties = h.store.list_properties(repo.id).await.unwrap();
    assert_eq!(properties.len(), 1, "only the source placement is persisted");
    let source = &properties[0].property;
    assert_eq!(properties[0].element_id, root_of(&repo));

    // a rebuilt tree carries the inherited copy on every descendant
    let tree = load_tree(h.store.as_ref() as &dyn Store, &repo).await.unwrap();
    for id in [bucket, group, node] {
        let el = tree.element(id).unwrap();
        let copy = el
            .properties
            .system
            .values()
            .find(|p| p.source_instance_id == source.instance_id)
            .unwrap_or_else(|| panic!("{} lacks the inherited copy", el.name));
        assert_eq!(copy.payload.name(), "tag");
    }
}

#[tokio::test]
async fn check_with_service_constraint_materialises_one_instance() {
    let h = harness().await;
    let (repo, _bucket, _group, node) = scaffold_repo(&h).await;

    h.run(Payload::SetProperty {
        element_id: node,
        spec: PropertySpec {
            view: View::Internal,
            inheritance: false,
            children_only: false,
            payload: PropertyPayload::Service {
                name: "httpd".into(),
                attributes: vec![ServiceAttribute { name: "port".into(), value: "80".into() }],
            },
        },
    })
    .await;

    let job = h
        .run(Payload::SetCheck {
            element_id: root_of(&repo),
            config: httpd_check(h.team),
        })
        .await;
    assert_eq!(job.status, JobStatus::Processed);

    let instances = h.store.list_instances(repo.id).await.unwrap();
    assert_eq!(instances.len(), 1, "exactly one instance for the one matching node");
    let instance = &instances[0];
    assert_eq!(instance.element_id, node);
    assert_eq!(instance.version, 0);
    // the workflow carried it through awaiting_rollout
    assert_eq!(instance.state, InstanceState::RolloutInProgress);
}

#[tokio::test]
async fn node_without_the_service_gets_no_instance() {
    let h = harness().await;
    let (repo, bucket, group, node) = scaffold_repo(&h).await;

    // second node, no httpd service property
    let other = ElementId::generate();
    h.store
        .upsert_node_inventory(&NodeInventoryRow {
            node_id: other,
            asset_id: 43,
            name: "node-two".into(),
            team_id: h.team,
            server_id: ServerId::generate(),
            online: true,
            deleted: false,
            assigned: false,
        })
        .await
        .unwrap();
    h.run(Payload::AssignNode {
        node_id: other,
        repository_id: repo.id,
        bucket_id: soma_domain::BucketId::new(bucket.as_uuid()),
        inventory: None,
    })
    .await;
    h.run(Payload::AddNodeToGroup {
        bucket_id: soma_domain::BucketId::new(bucket.as_uuid()),
        node_id: other,
        group_id: group,
    })
    .await;

    h.run(Payload::SetProperty {
        element_id: node,
        spec: PropertySpec {
            view: View::Internal,
            inheritance: false,
            children_only: false,
            payload: PropertyPayload::Service { name: "httpd".into(), attributes: vec![] },
        },
    })
    .await;
    h.run(Payload::SetCheck {
        element_id: root_of(&repo),
        config: httpd_check(h.team),
    })
    .await;

    let instances = h.store.list_instances(repo.id).await.unwrap();
    assert_eq!(instances.len(), 1, "one instance, not two");
    assert_eq!(instances[0].element_id, node);
}

#[tokio::test]
async fn frozen_bucket_rejects_descendant_mutations() {
    let h = harness().await;
    let (repo, bucket, group, _node) = scaffold_repo(&h).await;

    let job = h
        .run(Payload::FreezeBucket {
            bucket_id: soma_domain::BucketId::new(bucket.as_uuid()),
            frozen: true,
        })
        .await;
    assert_eq!(job.status, JobStatus::Processed);

    let job = h
        .run(Payload::SetProperty {
            element_id: group,
            spec: PropertySpec {
                view: View::Any,
                inheritance: false,
                children_only: false,
                payload: PropertyPayload::System { name: "x".into(), value: "y".into() },
            },
        })
        .await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Readonly bucket"));

    // repository-level mutations outside the bucket still work
    let job = h
        .run(Payload::SetProperty {
            element_id: root_of(&repo),
            spec: PropertySpec {
                view: View::Any,
                inheritance: false,
                children_only: false,
                payload: PropertyPayload::System { name: "x".into(), value: "y".into() },
            },
        })
        .await;
    assert_eq!(job.status, JobStatus::Processed);
}

#[tokio::test]
async fn duplicate_check_configuration_fails_the_job() {
    let h = harness().await;
    let (repo, _bucket, _group, node) = scaffold_repo(&h).await;
    h.run(Payload::SetProperty {
        element_id: node,
        spec: PropertySpec {
            view: View::Internal,
            inheritance: false,
            children_only: false,
            payload: PropertyPayload::Service { name: "httpd".into(), attributes: vec![] },
        },
    })
    .await;

    let config = httpd_check(h.team);
    let first = h
        .run(Payload::SetCheck { element_id: root_of(&repo), config: config.clone() })
        .await;
    assert_eq!(first.status, JobStatus::Processed);

    let second = h
        .run(Payload::SetCheck { element_id: root_of(&repo), config })
        .await;
    assert_eq!(second.status, JobStatus::Failed);

    // no second instance version appeared
    let instances = h.store.list_instances(repo.id).await.unwrap();
    assert_eq!(instances.len(), 1);
}

#[tokio::test]
async fn keeper_reboot_reproduces_the_instance_set() {
    let h = harness().await;
    let (repo, _bucket, _group, node) = scaffold_repo(&h).await;
    h.run(Payload::SetProperty {
        element_id: node,
        spec: PropertySpec {
            view: View::Internal,
            inheritance: false,
            children_only: false,
            payload: PropertyPayload::Service {
                name: "httpd".into(),
                attributes: vec![ServiceAttribute { name: "port".into(), value: "80".into() }],
            },
        },
    })
    .await;
    h.run(Payload::SetCheck { element_id: root_of(&repo), config: httpd_check(h.team) })
        .await;

    let before = h.store.list_instances(repo.id).await.unwrap();
    assert_eq!(before.len(), 1);

    // a freshly loaded tree computes the same triple-hashes
    let tree = load_tree(h.store.as_ref() as &dyn Store, &repo).await.unwrap();
    let recomputed = tree.compute_all_instances();
    assert_eq!(recomputed.len(), 1);
    assert_eq!(recomputed[0].constraint_hash, before[0].constraint_hash);
    assert_eq!(recomputed[0].constraint_val_hash, before[0].constraint_val_hash);
    assert_eq!(
        recomputed[0].instance_service_cfg_hash,
        before[0].instance_service_cfg_hash
    );
}

#[tokio::test]
async fn no_unfinished_jobs_remain_after_processing() {
    let h = harness().await;
    let (_repo, _bucket, _group, _node) = scaffold_repo(&h).await;
    assert!(h.store.list_unfinished_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn property_delete_restores_the_previous_tree_shape() {
    let h = harness().await;
    let (repo, _bucket, _group, _node) = scaffold_repo(&h).await;

    let before = h.store.list_properties(repo.id).await.unwrap().len();
    h.run(Payload::SetProperty {
        element_id: root_of(&repo),
        spec: PropertySpec {
            view: View::External,
            inheritance: true,
            children_only: false,
            payload: PropertyPayload::System { name: "fs".into(), value: "ext4".into() },
        },
    })
    .await;
    let placed = h.store.list_properties(repo.id).await.unwrap();
    assert_eq!(placed.len(), before + 1);
    let instance_id = placed
        .iter()
        .find(|p| p.property.payload.name() == "fs")
        .unwrap()
        .property
        .instance_id;

    h.run(Payload::DeleteProperty { element_id: root_of(&repo), instance_id }).await;
    assert_eq!(h.store.list_properties(repo.id).await.unwrap().len(), before);
}

#[tokio::test]
async fn deleting_a_check_deprovisions_its_instances() {
    let h = harness().await;
    let (repo, _bucket, _group, node) = scaffold_repo(&h).await;
    h.run(Payload::SetProperty {
        element_id: node,
        spec: PropertySpec {
            view: View::Internal,
            inheritance: false,
            children_only: false,
            payload: PropertyPayload::Service { name: "httpd".into(), attributes: vec![] },
        },
    })
    .await;
    let config = httpd_check(h.team);
    let check_id = config.id;
    h.run(Payload::SetCheck { element_id: root_of(&repo), config }).await;
    assert_eq!(h.store.list_instances(repo.id).await.unwrap().len(), 1);

    h.run(Payload::DeleteCheck { element_id: root_of(&repo), check_id }).await;
    let instances = h.store.list_instances(repo.id).await.unwrap();
    assert_eq!(instances.len(), 1);
    // in-flight rollout gets torn down through the deprovision leg
    assert!(matches!(
        instances[0].state,
        InstanceState::AwaitingDeprovision
            | InstanceState::DeprovisionInProgress
            | InstanceState::Deprovisioned
    ));
}

#[tokio::test]
async fn unknown_repository_is_unavailable_not_found() {
    let h = harness().await;
    // resolvable repository, but no keeper registered: Unavailable
    let repo = RepositoryRow {
        id: soma_domain::RepositoryId::generate(),
        name: "ghost-repo".into(),
        team_id: h.team,
        active: false,
        deleted: false,
    };
    h.store.create_repository(&repo).await.unwrap();
    let err = h
        .submit(Payload::CreateBucket {
            repository_id: repo.id,
            name: "ghost-dev".into(),
            environment: Environment::Dev,
            team_id: h.team,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, soma_domain::ErrorKind::Unavailable);
}

#[tokio::test]
async fn readonly_instance_refuses_mutations() {
    let store = Arc::new(InMemoryStore::new());
    let handlers = Arc::new(HandlerMap::new());
    let reaper = Arc::new(GrimReaper::new());
    GuidePost::spawn(store.clone(), handlers.clone(), true, &reaper).await;

    let handler = handlers.lookup(GUIDEPOST).await.unwrap();
    let (env, rx) = Envelope::new(Request {
        id: Uuid::new_v4(),
        section: "tree".into(),
        action: "create_bucket".into(),
        user_id: UserId::generate(),
        team_id: TeamId::generate(),
        job_id: None,
        payload: Payload::CreateBucket {
            repository_id: soma_domain::RepositoryId::generate(),
            name: "any-name".into(),
            environment: Environment::Dev,
            team_id: TeamId::generate(),
        },
    });
    handler.intake.normal.send(env).await.unwrap();
    let err = rx.await.unwrap().unwrap_err();
    assert_eq!(err.kind, soma_domain::ErrorKind::Conflict);
    assert_eq!(err.message, "Readonly instance");
}
