//! SeaORM implementation of UserRepository

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};

use crate::domain::{DomainError, UserRepository};
use crate::models::user::Entity as UserEntity;

/// SeaORM-based implementation of UserRepository
pub struct SeaOrmUserRepository {
    db: DatabaseConnection,
}

impl SeaOrmUserRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for SeaOrmUserRepository {
    async fn exists(&self, id: i32) -> Result<bool, DomainError> {
        let user = UserEntity::find_by_id(id).one(&self.db).await?;
        Ok(user.is_some())
    }
}
