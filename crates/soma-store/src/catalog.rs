//! Central statement catalogue. Every SQL statement the PostgreSQL
//! store executes is declared here under a stable name; runtime errors
//! carry that name so log lines always point at one statement.

pub struct Statement {
    pub name: &'static str,
    pub sql: &'static str,
}

// ── DDL ───────────────────────────────────────────────────────────────────────
//
// Idempotent; run at every connect. Logical namespaces map to schemas:
// `soma` (declarations and materialisations), `inventory` (users,
// nodes), `auth` (credentials, tokens).

pub const MIGRATIONS: &str = r#"
CREATE SCHEMA IF NOT EXISTS soma;
CREATE SCHEMA IF NOT EXISTS inventory;
CREATE SCHEMA IF NOT EXISTS auth;

CREATE TABLE IF NOT EXISTS soma.repositories (
    id      UUID PRIMARY KEY,
    name    TEXT NOT NULL UNIQUE,
    team_id UUID NOT NULL,
    active  BOOLEAN NOT NULL DEFAULT FALSE,
    deleted BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS soma.elements (
    id            UUID PRIMARY KEY,
    repository_id UUID NOT NULL,
    parent_id     UUID,
    kind          JSONB NOT NULL,
    name          TEXT NOT NULL,
    team_id       UUID NOT NULL,
    state         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_elements_repository
    ON soma.elements (repository_id);

CREATE TABLE IF NOT EXISTS soma.properties (
    instance_id   UUID PRIMARY KEY,
    repository_id UUID NOT NULL,
    element_id    UUID NOT NULL,
    property      JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_properties_repository
    ON soma.properties (repository_id);

CREATE TABLE IF NOT EXISTS soma.checks (
    check_id      UUID PRIMARY KEY,
    repository_id UUID NOT NULL,
    element_id    UUID NOT NULL,
    config        JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_checks_repository
    ON soma.checks (repository_id);

CREATE TABLE IF NOT EXISTS soma.check_instances (
    id                  UUID PRIMARY KEY,
    repository_id       UUID NOT NULL,
    check_id            UUID NOT NULL,
    element_id          UUID NOT NULL,
    version             BIGINT NOT NULL,
    constraint_hash     TEXT NOT NULL,
    constraint_val_hash TEXT NOT NULL,
    service_cfg_hash    TEXT NOT NULL,
    service_config      JSONB NOT NULL,
    state               TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_instances_check
    ON soma.check_instances (check_id);
CREATE INDEX IF NOT EXISTS idx_instances_repository
    ON soma.check_instances (repository_id);

CREATE TABLE IF NOT EXISTS soma.jobs (
    id            UUID PRIMARY KEY,
    status        TEXT NOT NULL,
    result        TEXT NOT NULL,
    job_type      TEXT NOT NULL,
    repository_id UUID NOT NULL,
    user_id       UUID NOT NULL,
    team_id       UUID NOT NULL,
    queued_at     TIMESTAMPTZ NOT NULL,
    finished_at   TIMESTAMPTZ,
    raw_request   JSONB NOT NULL,
    error         TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_user ON soma.jobs (user_id);

CREATE TABLE IF NOT EXISTS soma.sections (
    id       UUID PRIMARY KEY,
    name     TEXT NOT NULL UNIQUE,
    category TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS soma.actions (
    id         UUID PRIMARY KEY,
    name       TEXT NOT NULL,
    section_id UUID NOT NULL,
    category   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS soma.permissions (
    id       UUID PRIMARY KEY,
    name     TEXT NOT NULL,
    category TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS soma.grants (
    id        UUID PRIMARY KEY,
    payload   JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS soma.permission_map (
    permission_id UUID NOT NULL,
    section_id    UUID NOT NULL,
    action_id     UUID,
    UNIQUE (permission_id, section_id, action_id)
);

CREATE TABLE IF NOT EXISTS soma.levels (
    name          TEXT PRIMARY KEY,
    short_name    TEXT NOT NULL,
    numeric_level INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS soma.team_services (
    team_id    UUID NOT NULL,
    service    TEXT NOT NULL,
    attributes JSONB NOT NULL,
    PRIMARY KEY (team_id, service)
);

CREATE TABLE IF NOT EXISTS soma.monitorings (
    id              UUID PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    contact_user_id UUID
);

CREATE TABLE IF NOT EXISTS inventory.users (
    id      UUID PRIMARY KEY,
    name    TEXT NOT NULL UNIQUE,
    team_id UUID NOT NULL,
    active  BOOLEAN NOT NULL DEFAULT FALSE,
    deleted BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS inventory.nodes (
    node_id   UUID PRIMARY KEY,
    asset_id  BIGINT NOT NULL,
    name      TEXT NOT NULL,
    team_id   UUID NOT NULL,
    server_id UUID NOT NULL,
    online    BOOLEAN NOT NULL,
    deleted   BOOLEAN NOT NULL,
    assigned  BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS auth.credentials (
    user_id    UUID NOT NULL,
    user_name  TEXT NOT NULL,
    phc_hash   TEXT NOT NULL,
    valid_from TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    active     BOOLEAN NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_credentials_user
    ON auth.credentials (user_name);

CREATE TABLE IF NOT EXISTS auth.tokens (
    token      TEXT PRIMARY KEY,
    salt       TEXT NOT NULL,
    user_name  TEXT NOT NULL,
    valid_from TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    bound_ip   TEXT
);
"#;

// ── soma namespace ────────────────────────────────────────────────────────────

pub const REPOSITORY_INSERT: Statement = Statement {
    name: "repository::insert",
    sql: "INSERT INTO soma.repositories (id, name, team_id, active, deleted)
          VALUES ($1, $2, $3, $4, $5)",
};

pub const REPOSITORY_BY_ID: Statement = Statement {
    name: "repository::by-id",
    sql: "SELECT id, name, team_id, active, deleted FROM soma.repositories WHERE id = $1",
};

pub const REPOSITORY_BY_NAME: Statement = Statement {
    name: "repository::by-name",
    sql: "SELECT id, name, team_id, active, deleted FROM soma.repositories WHERE name = $1",
};

pub const REPOSITORY_LIST: Statement = Statement {
    name: "repository::list",
    sql: "SELECT id, name, team_id, active, deleted FROM soma.repositories
          WHERE deleted = FALSE ORDER BY name",
};

pub const REPOSITORY_SET_ACTIVE: Statement = Statement {
    name: "repository::set-active",
    sql: "UPDATE soma.repositories SET active = $2 WHERE id = $1",
};

pub const ELEMENT_UPSERT: Statement = Statement {
    name: "element::upsert",
    sql: "INSERT INTO soma.elements (id, repository_id, parent_id, kind, name, team_id, state)
          VALUES ($1, $2, $3, $4::jsonb, $5, $6, $7)
          ON CONFLICT (id) DO UPDATE SET
            parent_id = EXCLUDED.parent_id, kind = EXCLUDED.kind,
            name = EXCLUDED.name, team_id = EXCLUDED.team_id, state = EXCLUDED.state",
};

pub const ELEMENT_DELETE: Statement = Statement {
    name: "element::delete",
    sql: "DELETE FROM soma.elements WHERE id = $1",
};

pub const ELEMENT_LIST: Statement = Statement {
    name: "element::list",
    sql: "SELECT id, repository_id, parent_id, kind, name, team_id, state
          FROM soma.elements WHERE repository_id = $1",
};

pub const ELEMENT_REPOSITORY: Statement = Statement {
    name: "element::enclosing-repository",
    sql: "SELECT r.id, r.name, r.team_id, r.active, r.deleted
          FROM soma.repositories r
          JOIN soma.elements e ON e.repository_id = r.id
          WHERE e.id = $1",
};

pub const PROPERTY_UPSERT: Statement = Statement {
    name: "property::upsert",
    sql: "INSERT INTO soma.properties (instance_id, repository_id, element_id, property)
          VALUES ($1, $2, $3, $4::jsonb)
          ON CONFLICT (instance_id) DO UPDATE SET property = EXCLUDED.property",
};

pub const PROPERTY_DELETE: Statement = Statement {
    name: "property::delete",
    sql: "DELETE FROM soma.properties WHERE instance_id = $1",
};

pub const PROPERTY_LIST: Statement = Statement {
    name: "property::list",
    sql: "SELECT instance_id, repository_id, element_id, property
          FROM soma.properties WHERE repository_id = $1",
};

pub const CHECK_UPSERT: Statement = Statement {
    name: "check::upsert",
    sql: "INSERT INTO soma.checks (check_id, repository_id, element_id, config)
          VALUES ($1, $2, $3, $4::jsonb)
          ON CONFLICT (check_id) DO UPDATE SET config = EXCLUDED.config",
};

pub const CHECK_DELETE: Statement = Statement {
    name: "check::delete",
    sql: "DELETE FROM soma.checks WHERE check_id = $1",
};

pub const CHECK_LIST: Statement = Statement {
    name: "check::list",
    sql: "SELECT check_id, repository_id, element_id, config
          FROM soma.checks WHERE repository_id = $1",
};

pub const INSTANCE_UPSERT: Statement = Statement {
    name: "instance::upsert",
    sql: "INSERT INTO soma.check_instances
            (id, repository_id, check_id, element_id, version,
             constraint_hash, constraint_val_hash, service_cfg_hash,
             service_config, state)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9::jsonb, $10)
          ON CONFLICT (id) DO UPDATE SET
            version = EXCLUDED.version, state = EXCLUDED.state,
            service_config = EXCLUDED.service_config",
};

pub const INSTANCE_SET_STATE: Statement = Statement {
    name: "instance::set-state",
    sql: "UPDATE soma.check_instances SET state = $2 WHERE id = $1",
};

pub const INSTANCE_BY_ID: Statement = Statement {
    name: "instance::by-id",
    sql: "SELECT id, repository_id, check_id, element_id, version,
                 constraint_hash, constraint_val_hash, service_cfg_hash,
                 service_config, state
          FROM soma.check_instances WHERE id = $1",
};

pub const INSTANCE_LIST_REPOSITORY: Statement = Statement {
    name: "instance::list-repository",
    sql: "SELECT id, repository_id, check_id, element_id, version,
                 constraint_hash, constraint_val_hash, service_cfg_hash,
                 service_config, state
          FROM soma.check_instances WHERE repository_id = $1",
};

pub const INSTANCE_LIST_CHECK: Statement = Statement {
    name: "instance::list-check",
    sql: "SELECT id, repository_id, check_id, element_id, version,
                 constraint_hash, constraint_val_hash, service_cfg_hash,
                 service_config, state
          FROM soma.check_instances WHERE check_id = $1",
};

pub const JOB_INSERT: Statement = Statement {
    name: "job::insert",
    sql: "INSERT INTO soma.jobs
            (id, status, result, job_type, repository_id, user_id, team_id,
             queued_at, finished_at, raw_request, error)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::jsonb, $11)",
};

pub const JOB_UPDATE: Statement = Statement {
    name: "job::update",
    sql: "UPDATE soma.jobs SET status = $2, result = $3, error = $4, finished_at = $5
          WHERE id = $1",
};

pub const JOB_BY_ID: Statement = Statement {
    name: "job::by-id",
    sql: "SELECT id, status, result, job_type, repository_id, user_id, team_id,
                 queued_at, finished_at, raw_request, error
          FROM soma.jobs WHERE id = $1",
};

pub const JOB_LIST_USER: Statement = Statement {
    name: "job::list-user",
    sql: "SELECT id, status, result, job_type, repository_id, user_id, team_id,
                 queued_at, finished_at, raw_request, error
          FROM soma.jobs WHERE user_id = $1 ORDER BY queued_at DESC",
};

pub const JOB_LIST_UNFINISHED: Statement = Statement {
    name: "job::list-unfinished",
    sql: "SELECT id, status, result, job_type, repository_id, user_id, team_id,
                 queued_at, finished_at, raw_request, error
          FROM soma.jobs WHERE status IN ('queued', 'in_progress')",
};

pub const SECTION_UPSERT: Statement = Statement {
    name: "section::upsert",
    sql: "INSERT INTO soma.sections (id, name, category) VALUES ($1, $2, $3)
          ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, category = EXCLUDED.category",
};

pub const SECTION_DELETE: Statement = Statement {
    name: "section::delete",
    sql: "DELETE FROM soma.sections WHERE id = $1",
};

pub const SECTION_LIST: Statement = Statement {
    name: "section::list",
    sql: "SELECT id, name, category FROM soma.sections ORDER BY name",
};

pub const ACTION_UPSERT: Statement = Statement {
    name: "action::upsert",
    sql: "INSERT INTO soma.actions (id, name, section_id, category) VALUES ($1, $2, $3, $4)
          ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name,
            section_id = EXCLUDED.section_id, category = EXCLUDED.category",
};

pub const ACTION_DELETE: Statement = Statement {
    name: "action::delete",
    sql: "DELETE FROM soma.actions WHERE id = $1",
};

pub const ACTION_LIST: Statement = Statement {
    name: "action::list",
    sql: "SELECT id, name, section_id, category FROM soma.actions ORDER BY name",
};

pub const PERMISSION_UPSERT: Statement = Statement {
    name: "permission::upsert",
    sql: "INSERT INTO soma.permissions (id, name, category) VALUES ($1, $2, $3)
          ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, category = EXCLUDED.category",
};

pub const PERMISSION_DELETE: Statement = Statement {
    name: "permission::delete",
    sql: "DELETE FROM soma.permissions WHERE id = $1",
};

pub const PERMISSION_LIST: Statement = Statement {
    name: "permission::list",
    sql: "SELECT id, name, category FROM soma.permissions ORDER BY name",
};

pub const GRANT_INSERT: Statement = Statement {
    name: "grant::insert",
    sql: "INSERT INTO soma.grants (id, payload) VALUES ($1, $2::jsonb)",
};

pub const GRANT_DELETE: Statement = Statement {
    name: "grant::delete",
    sql: "DELETE FROM soma.grants WHERE id = $1",
};

pub const GRANT_LIST: Statement = Statement {
    name: "grant::list",
    sql: "SELECT payload FROM soma.grants",
};

pub const PERMISSION_MAP_INSERT: Statement = Statement {
    name: "permission-map::insert",
    sql: "INSERT INTO soma.permission_map (permission_id, section_id, action_id)
          VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
};

pub const PERMISSION_MAP_DELETE: Statement = Statement {
    name: "permission-map::delete",
    sql: "DELETE FROM soma.permission_map
          WHERE permission_id = $1 AND section_id = $2
            AND action_id IS NOT DISTINCT FROM $3",
};

pub const PERMISSION_MAP_LIST: Statement = Statement {
    name: "permission-map::list",
    sql: "SELECT permission_id, section_id, action_id FROM soma.permission_map",
};

pub const LEVEL_UPSERT: Statement = Statement {
    name: "level::upsert",
    sql: "INSERT INTO soma.levels (name, short_name, numeric_level) VALUES ($1, $2, $3)
          ON CONFLICT (name) DO UPDATE SET short_name = EXCLUDED.short_name,
            numeric_level = EXCLUDED.numeric_level",
};

pub const LEVEL_LIST: Statement = Statement {
    name: "level::list",
    sql: "SELECT name, short_name, numeric_level FROM soma.levels ORDER BY numeric_level",
};

pub const TEAM_SERVICE_UPSERT: Statement = Statement {
    name: "team-service::upsert",
    sql: "INSERT INTO soma.team_services (team_id, service, attributes)
          VALUES ($1, $2, $3::jsonb)
          ON CONFLICT (team_id, service) DO UPDATE SET attributes = EXCLUDED.attributes",
};

pub const TEAM_SERVICE_LIST: Statement = Statement {
    name: "team-service::list",
    sql: "SELECT team_id, service, attributes FROM soma.team_services WHERE team_id = $1",
};

pub const MONITORING_UPSERT: Statement = Statement {
    name: "monitoring::upsert",
    sql: "INSERT INTO soma.monitorings (id, name, contact_user_id) VALUES ($1, $2, $3)
          ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name,
            contact_user_id = EXCLUDED.contact_user_id",
};

pub const MONITORING_LIST: Statement = Statement {
    name: "monitoring::list",
    sql: "SELECT id, name, contact_user_id FROM soma.monitorings ORDER BY name",
};

// ── inventory namespace ───────────────────────────────────────────────────────

pub const USER_BY_ID: Statement = Statement {
    name: "user::by-id",
    sql: "SELECT id, name, team_id, active, deleted FROM inventory.users WHERE id = $1",
};

pub const USER_BY_NAME: Statement = Statement {
    name: "user::by-name",
    sql: "SELECT id, name, team_id, active, deleted FROM inventory.users WHERE name = $1",
};

pub const USER_UPSERT: Statement = Statement {
    name: "user::upsert",
    sql: "INSERT INTO inventory.users (id, name, team_id, active, deleted)
          VALUES ($1, $2, $3, $4, $5)
          ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name,
            team_id = EXCLUDED.team_id, active = EXCLUDED.active,
            deleted = EXCLUDED.deleted",
};

pub const NODE_INVENTORY_BY_ID: Statement = Statement {
    name: "node-inventory::by-id",
    sql: "SELECT node_id, asset_id, name, team_id, server_id, online, deleted, assigned
          FROM inventory.nodes WHERE node_id = $1",
};

pub const NODE_INVENTORY_UPSERT: Statement = Statement {
    name: "node-inventory::upsert",
    sql: "INSERT INTO inventory.nodes
            (node_id, asset_id, name, team_id, server_id, online, deleted, assigned)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
          ON CONFLICT (node_id) DO UPDATE SET asset_id = EXCLUDED.asset_id,
            name = EXCLUDED.name, team_id = EXCLUDED.team_id,
            server_id = EXCLUDED.server_id, online = EXCLUDED.online,
            deleted = EXCLUDED.deleted, assigned = EXCLUDED.assigned",
};

pub const NODE_INVENTORY_SET_ASSIGNED: Statement = Statement {
    name: "node-inventory::set-assigned",
    sql: "UPDATE inventory.nodes SET assigned = $2 WHERE node_id = $1",
};

// ── auth namespace ────────────────────────────────────────────────────────────

pub const CREDENTIAL_INSERT: Statement = Statement {
    name: "credential::insert",
    sql: "INSERT INTO auth.credentials
            (user_id, user_name, phc_hash, valid_from, expires_at, active)
          VALUES ($1, $2, $3, $4, $5, $6)",
};

pub const CREDENTIAL_ACTIVE: Statement = Statement {
    name: "credential::active",
    sql: "SELECT user_id, user_name, phc_hash, valid_from, expires_at, active
          FROM auth.credentials
          WHERE user_name = $1 AND active = TRUE
          ORDER BY valid_from DESC LIMIT 1",
};

pub const CREDENTIAL_EXPIRE_BEFORE: Statement = Statement {
    name: "credential::expire-before",
    sql: "UPDATE auth.credentials SET active = FALSE, expires_at = $2
          WHERE user_name = $1 AND valid_from < $2",
};

pub const TOKEN_INSERT: Statement = Statement {
    name: "token::insert",
    sql: "INSERT INTO auth.tokens (token, salt, user_name, valid_from, expires_at, bound_ip)
          VALUES ($1, $2, $3, $4, $5, $6)",
};

pub const TOKEN_BY_VALUE: Statement = Statement {
    name: "token::by-value",
    sql: "SELECT token, salt, user_name, valid_from, expires_at, bound_ip
          FROM auth.tokens WHERE token = $1",
};

pub const TOKEN_EXPIRE: Statement = Statement {
    name: "token::expire",
    sql: "UPDATE auth.tokens SET expires_at = $2 WHERE token = $1 AND expires_at > $2",
};

pub const TOKEN_EXPIRE_USER: Statement = Statement {
    name: "token::expire-user",
    sql: "UPDATE auth.tokens SET expires_at = $2 WHERE user_name = $1 AND expires_at > $2",
};

pub const TOKEN_EXPIRE_ALL: Statement = Statement {
    name: "token::expire-all",
    sql: "UPDATE auth.tokens SET expires_at = $1 WHERE expires_at > $1",
};

pub const TOKEN_LIST_VALID: Statement = Statement {
    name: "token::list-valid",
    sql: "SELECT token, salt, user_name, valid_from, expires_at, bound_ip
          FROM auth.tokens WHERE valid_from <= $1 AND expires_at > $1",
};
