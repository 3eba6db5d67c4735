//! Classroom data service: classes and memberships behind one interface
//!
//! `handler` maps HTTP-shaped requests onto a [`ClassroomService`];
//! `memory` is the storage backend.

pub mod handler;
mod memory;

use async_trait::async_trait;

pub use memory::MemoryClassroom;

use crate::models::{Class, ClassMember, ClassWithRole, Role};

#[derive(Debug, thiserror::Error)]
pub enum ClassroomError {
    #[error("Class not found")]
    ClassNotFound,

    #[error("Membership not found")]
    MemberNotFound,

    #[error("User is already a member of this class")]
    AlreadyMember,

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClassroomError>;

/// Fields a class update may change. `description: Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct ClassUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

#[async_trait]
pub trait ClassroomService: Send + Sync {
    /// Classes the user belongs to, optionally filtered by role,
    /// ordered by join time, newest first.
    async fn classes_for_user(&self, user_id: &str, role: Option<Role>) -> Result<Vec<ClassWithRole>>;

    /// A class as seen by `user_id`, or `None` if they are not a member.
    async fn class_for_user(&self, class_id: &str, user_id: &str) -> Result<Option<ClassWithRole>>;

    /// Create a class and enrol the owner as its teacher in one step.
    async fn create_class(&self, name: &str, description: Option<String>, owner_id: &str) -> Result<Class>;

    async fn update_class(&self, class_id: &str, update: ClassUpdate) -> Result<Class>;

    /// Delete a class along with its memberships.
    async fn delete_class(&self, class_id: &str) -> Result<()>;

    async fn add_member(
        &self,
        class_id: &str,
        user_id: &str,
        role: Role,
        invited_by: Option<String>,
    ) -> Result<ClassMember>;

    async fn remove_member(&self, class_id: &str, user_id: &str) -> Result<()>;
}
