use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::error::{DeployError, Result};
use crate::storage::traits::{NodeFilter, ResourceTracker};
use crate::types::{Node, ResourceType};

const NODE_COLUMNS: &str = "id, deployment_name, resource_type, resource_id, name, generation_id, \
     is_running, is_active_generation, initial_deploy_complete, created_at, version";

pub struct PostgresTracker {
    pool: PgPool,
}

impl PostgresTracker {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/V001__node_records.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceTracker for PostgresTracker {
    async fn find(&self, deployment_name: &str, filter: &NodeFilter) -> Result<Vec<Node>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
        query.push(NODE_COLUMNS);
        query.push(" FROM node_records WHERE deployment_name = ");
        query.push_bind(deployment_name);

        if let Some(generation_id) = filter.generation_id {
            query
                .push(" AND generation_id = ")
                .push_bind(generation_id as i64);
        }
        if let Some(resource_type) = filter.resource_type {
            query
                .push(" AND resource_type = ")
                .push_bind(resource_type.as_str());
        }
        if let Some(name) = filter.name.as_deref() {
            query.push(" AND name = ").push_bind(name);
        }
        if let Some(resource_id) = filter.resource_id.as_deref() {
            query.push(" AND resource_id = ").push_bind(resource_id);
        }
        if let Some(is_running) = filter.is_running {
            query.push(" AND is_running = ").push_bind(is_running);
        }
        if let Some(is_active) = filter.is_active_generation {
            query
                .push(" AND is_active_generation = ")
                .push_bind(is_active);
        }
        query.push(" ORDER BY generation_id, created_at");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_node).collect()
    }

    async fn save(&self, node: &Node) -> Result<Node> {
        // Version 0 means a record never stored; anything else must match
        // the stored version exactly.
        let sql = if node.version == 0 {
            r#"
            INSERT INTO node_records (
                id, deployment_name, resource_type, resource_id, name, generation_id,
                is_running, is_active_generation, initial_deploy_complete, created_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11 + 1)
            ON CONFLICT (id) DO NOTHING
            RETURNING version
            "#
        } else {
            r#"
            UPDATE node_records SET
                deployment_name = $2,
                resource_type = $3,
                resource_id = $4,
                name = $5,
                generation_id = $6,
                is_running = $7,
                is_active_generation = $8,
                initial_deploy_complete = $9,
                created_at = $10,
                version = $11 + 1
            WHERE id = $1 AND version = $11
            RETURNING version
            "#
        };

        let row = sqlx::query(sql)
            .bind(node.id)
            .bind(&node.deployment_name)
            .bind(node.resource_type.as_str())
            .bind(&node.resource_id)
            .bind(&node.name)
            .bind(node.generation_id as i64)
            .bind(node.is_running)
            .bind(node.is_active_generation)
            .bind(node.initial_deploy_complete)
            .bind(node.created_at)
            .bind(node.version as i64)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let version: i64 = r.try_get("version")?;
                let mut saved = node.clone();
                saved.version = version as u64;
                Ok(saved)
            }
            None => Err(DeployError::ConcurrentModification(node.id)),
        }
    }
}

fn row_to_node(r: &PgRow) -> Result<Node> {
    let type_str: String = r.try_get("resource_type")?;
    let resource_type = ResourceType::parse(&type_str).ok_or_else(|| {
        DeployError::Config(format!("unknown resource type in tracker: {}", type_str))
    })?;
    let generation_id: i64 = r.try_get("generation_id")?;
    let version: i64 = r.try_get("version")?;

    Ok(Node {
        id: r.try_get("id")?,
        deployment_name: r.try_get("deployment_name")?,
        resource_type,
        resource_id: r.try_get("resource_id")?,
        name: r.try_get("name")?,
        generation_id: generation_id as u64,
        is_running: r.try_get("is_running")?,
        is_active_generation: r.try_get("is_active_generation")?,
        initial_deploy_complete: r.try_get("initial_deploy_complete")?,
        created_at: r.try_get("created_at")?,
        version: version as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs only when `GENROLL_TEST_DATABASE_URL` points at a scratch database.
    async fn test_tracker() -> Option<PostgresTracker> {
        let url = std::env::var("GENROLL_TEST_DATABASE_URL").ok()?;
        let tracker = PostgresTracker::new(&url).await.unwrap();
        tracker.run_migrations().await.unwrap();
        Some(tracker)
    }

    #[tokio::test]
    async fn test_save_version_checks_match_memory_tracker() {
        let Some(tracker) = test_tracker().await else {
            return;
        };
        let node = Node::new("pg-test", ResourceType::Compute, "i-pg", "web", 1, true);

        let mut unknown = node.clone();
        unknown.version = 3;
        let err = tracker.save(&unknown).await.unwrap_err();
        assert!(matches!(err, DeployError::ConcurrentModification(_)));

        let saved = tracker.save(&node).await.unwrap();
        assert_eq!(saved.version, 1);

        let err = tracker.save(&node).await.unwrap_err();
        assert!(matches!(err, DeployError::ConcurrentModification(_)));

        let mut retired = saved.clone();
        retired.is_running = false;
        assert_eq!(tracker.save(&retired).await.unwrap().version, 2);

        let err = tracker.save(&saved).await.unwrap_err();
        assert!(matches!(err, DeployError::ConcurrentModification(_)));
    }
}
