//! Entities and seed data shared by the store tests.

use quarry_core::{record_of, Entity, Field, FilterOp, Model, Relation, Schema, Value, ValueType};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{Database, DbConfig, UnitOfWork};

pub const STATUSES: &[&str] = &["active", "paused", "done"];

// =============================================================================
// Owner
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    #[serde(skip)]
    pub projects: Vec<Project>,
}

impl Model for Owner {
    const NAME: &'static str = "owner";

    fn schema() -> Schema {
        Schema::new(Self::NAME)
            .field(Field::new("id", ValueType::Int).key())
            .field(
                Field::new("name", ValueType::Text)
                    .searchable()
                    .sortable()
                    .required(),
            )
            .field(Field::new("email", ValueType::Text).searchable())
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            "email" => Some(self.email.clone().into()),
            _ => None,
        }
    }
}

impl Entity for Owner {
    fn relations() -> Vec<Relation<Self>> {
        vec![Relation::collection::<Project>(
            "projects",
            |project: &Project, owner: &Owner| project.owner_id == Some(owner.id),
            |owner: &mut Owner, projects: Vec<Project>| owner.projects = projects,
        )]
    }
}

pub fn owner(id: i64, name: &str, email: Option<&str>) -> Owner {
    Owner {
        id,
        name: name.to_string(),
        email: email.map(str::to_string),
        projects: Vec::new(),
    }
}

// =============================================================================
// Project
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub tag: Option<String>,
    pub status: String,
    pub budget: i64,
    pub owner_id: Option<i64>,
    #[serde(skip)]
    pub owner: Option<Owner>,
}

impl Model for Project {
    const NAME: &'static str = "project";

    fn schema() -> Schema {
        Schema::new(Self::NAME)
            .field(Field::new("id", ValueType::Int).key())
            .field(
                Field::new("name", ValueType::Text)
                    .searchable()
                    .sortable()
                    .required(),
            )
            .field(Field::new("tag", ValueType::Text).searchable())
            .field(Field::new("status", ValueType::Enum(STATUSES)).searchable_with(&[FilterOp::Equals]))
            .field(
                Field::new("budget", ValueType::Int)
                    .searchable_with(&[
                        FilterOp::Equals,
                        FilterOp::GreaterThan,
                        FilterOp::GreaterOrEqual,
                    ])
                    .sortable(),
            )
            .field(Field::new("owner_id", ValueType::Int))
            .field(Field::new("owner", ValueType::Model(Owner::schema)).sortable())
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            "tag" => Some(self.tag.clone().into()),
            "status" => Some(self.status.as_str().into()),
            "budget" => Some(self.budget.into()),
            "owner_id" => Some(self.owner_id.into()),
            "owner" => Some(record_of(self.owner.as_ref())),
            _ => None,
        }
    }
}

impl Entity for Project {
    fn relations() -> Vec<Relation<Self>> {
        vec![Relation::reference::<Owner>(
            "owner",
            |project: &Project| vec![project.owner_id.into()],
            |project: &mut Project, owner: Option<Owner>| project.owner = owner,
        )]
    }
}

pub fn project(id: i64, name: &str, owner_id: i64, budget: i64) -> Project {
    Project {
        id,
        name: name.to_string(),
        tag: None,
        status: "active".to_string(),
        budget,
        owner_id: Some(owner_id),
        owner: None,
    }
}

// =============================================================================
// Membership (composite key)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub owner_id: i64,
    pub project_id: i64,
    pub role: String,
}

impl Model for Membership {
    const NAME: &'static str = "membership";

    fn schema() -> Schema {
        Schema::new(Self::NAME)
            .field(Field::new("owner_id", ValueType::Int).key())
            .field(Field::new("project_id", ValueType::Int).key())
            .field(Field::new("role", ValueType::Text).required())
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "owner_id" => Some(self.owner_id.into()),
            "project_id" => Some(self.project_id.into()),
            "role" => Some(self.role.as_str().into()),
            _ => None,
        }
    }
}

impl Entity for Membership {}

pub fn membership(owner_id: i64, project_id: i64, role: &str) -> Membership {
    Membership {
        owner_id,
        project_id,
        role: role.to_string(),
    }
}

// =============================================================================
// Seed Data
// =============================================================================

/// In-memory database holding three owners and four projects, plus a fresh
/// unit of work with nothing tracked.
///
/// ```text
/// owner  1 Acme   ops@acme.io       project 10 Apollo  owner 1  500  active
/// owner  2 acorn  -                 project 11 Beacon  owner 1  300  active  "core"
/// owner  3 Zed    zed@example.com   project 12 Comet   owner 2  800  active  "comms"
///                                   project 13 Drift   owner 3  200  paused
/// ```
pub async fn seeded() -> (Database, UnitOfWork) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let cancel = CancellationToken::new();

    let seed = db.unit_of_work().await.unwrap();
    let owners = seed.repository::<Owner>().unwrap();
    owners.add(owner(1, "Acme", Some("ops@acme.io"))).unwrap();
    owners.add(owner(2, "acorn", None)).unwrap();
    owners.add(owner(3, "Zed", Some("zed@example.com"))).unwrap();

    let projects = seed.repository::<Project>().unwrap();
    projects.add(project(10, "Apollo", 1, 500)).unwrap();
    projects
        .add(Project {
            tag: Some("core".to_string()),
            ..project(11, "Beacon", 1, 300)
        })
        .unwrap();
    projects
        .add(Project {
            tag: Some("comms".to_string()),
            ..project(12, "Comet", 2, 800)
        })
        .unwrap();
    projects
        .add(Project {
            status: "paused".to_string(),
            ..project(13, "Drift", 3, 200)
        })
        .unwrap();

    seed.commit(&cancel).await.unwrap();
    seed.dispose().await;

    let uow = db.unit_of_work().await.unwrap();
    (db, uow)
}
