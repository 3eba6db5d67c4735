//! In-memory classroom backend

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ClassUpdate, ClassroomError, ClassroomService, Result};
use crate::models::{Class, ClassMember, ClassWithRole, Role};

const INVITE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const INVITE_LEN: usize = 8;

#[derive(Default)]
struct Tables {
    classes: HashMap<String, Class>,
    /// Insertion order is kept so equal join times list newest first
    members: Vec<ClassMember>,
}

/// Classroom service holding everything in process memory.
#[derive(Default)]
pub struct MemoryClassroom {
    tables: RwLock<Tables>,
}

impl MemoryClassroom {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Random 8-character invite code over `A-Z0-9`.
fn generate_invite_code() -> Result<String> {
    let mut bytes = [0u8; INVITE_LEN];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| ClassroomError::Storage(anyhow::anyhow!("RNG failure: {}", e)))?;
    Ok(bytes
        .iter()
        .map(|b| INVITE_ALPHABET[*b as usize % INVITE_ALPHABET.len()] as char)
        .collect())
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ClassroomError::Invalid("Class name is required".into()));
    }
    Ok(name.to_string())
}

#[async_trait]
impl ClassroomService for MemoryClassroom {
    async fn classes_for_user(&self, user_id: &str, role: Option<Role>) -> Result<Vec<ClassWithRole>> {
        let tables = self.tables.read().await;
        let mut result: Vec<ClassWithRole> = tables
            .members
            .iter()
            .rev()
            .filter(|m| m.user_id == user_id)
            .filter(|m| role.map_or(true, |r| m.role == r))
            .filter_map(|m| {
                tables
                    .classes
                    .get(&m.class_id)
                    .map(|c| ClassWithRole::new(c.clone(), m))
            })
            .collect();
        // Stable: ties keep newest-inserted first
        result.sort_by(|a, b| b.joined_at.cmp(&a.joined_at));
        Ok(result)
    }

    async fn class_for_user(&self, class_id: &str, user_id: &str) -> Result<Option<ClassWithRole>> {
        let tables = self.tables.read().await;
        let member = tables
            .members
            .iter()
            .find(|m| m.class_id == class_id && m.user_id == user_id);
        Ok(member.and_then(|m| {
            tables
                .classes
                .get(class_id)
                .map(|c| ClassWithRole::new(c.clone(), m))
        }))
    }

    async fn create_class(&self, name: &str, description: Option<String>, owner_id: &str) -> Result<Class> {
        let name = validate_name(name)?;
        if owner_id.trim().is_empty() {
            return Err(ClassroomError::Invalid("ownerId is required".into()));
        }

        let now = Utc::now();
        let class = Class {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            description,
            owner_id: owner_id.to_string(),
            invite_code: Some(generate_invite_code()?),
            created_at: now,
            updated_at: now,
        };
        let owner = ClassMember {
            class_id: class.id.clone(),
            user_id: owner_id.to_string(),
            role: Role::Teacher,
            joined_at: now,
            invited_by: None,
        };

        // Single write guard: class and owner membership land together
        let mut tables = self.tables.write().await;
        tables.classes.insert(class.id.clone(), class.clone());
        tables.members.push(owner);
        tracing::info!(class_id = %class.id, "Class created");
        Ok(class)
    }

    async fn update_class(&self, class_id: &str, update: ClassUpdate) -> Result<Class> {
        let name = update.name.as_deref().map(validate_name).transpose()?;

        let mut tables = self.tables.write().await;
        let class = tables
            .classes
            .get_mut(class_id)
            .ok_or(ClassroomError::ClassNotFound)?;
        if let Some(name) = name {
            class.name = name;
        }
        if let Some(description) = update.description {
            class.description = description;
        }
        class.updated_at = Utc::now();
        Ok(class.clone())
    }

    async fn delete_class(&self, class_id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.classes.contains_key(class_id) {
            return Err(ClassroomError::ClassNotFound);
        }
        tables.members.retain(|m| m.class_id != class_id);
        tables.classes.remove(class_id);
        tracing::info!(class_id, "Class deleted");
        Ok(())
    }

    async fn add_member(
        &self,
        class_id: &str,
        user_id: &str,
        role: Role,
        invited_by: Option<String>,
    ) -> Result<ClassMember> {
        if user_id.trim().is_empty() {
            return Err(ClassroomError::Invalid("userId is required".into()));
        }

        let mut tables = self.tables.write().await;
        if !tables.classes.contains_key(class_id) {
            return Err(ClassroomError::ClassNotFound);
        }
        if tables
            .members
            .iter()
            .any(|m| m.class_id == class_id && m.user_id == user_id)
        {
            return Err(ClassroomError::AlreadyMember);
        }

        let member = ClassMember {
            class_id: class_id.to_string(),
            user_id: user_id.to_string(),
            role,
            joined_at: Utc::now(),
            invited_by,
        };
        tables.members.push(member.clone());
        Ok(member)
    }

    async fn remove_member(&self, class_id: &str, user_id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let before = tables.members.len();
        tables
            .members
            .retain(|m| !(m.class_id == class_id && m.user_id == user_id));
        if tables.members.len() == before {
            return Err(ClassroomError::MemberNotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_code_shape() {
        let code = generate_invite_code().unwrap();
        assert_eq!(code.len(), INVITE_LEN);
        assert!(code.bytes().all(|b| INVITE_ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn test_create_enrols_owner_as_teacher() {
        let svc = MemoryClassroom::new();
        let class = svc.create_class(" Algebra ", None, "u1").await.unwrap();
        assert_eq!(class.name, "Algebra");

        let mine = svc.class_for_user(&class.id, "u1").await.unwrap().unwrap();
        assert_eq!(mine.role, Role::Teacher);
        assert!(svc.class_for_user(&class.id, "u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_classes_ordered_newest_first_and_filtered() {
        let svc = MemoryClassroom::new();
        let a = svc.create_class("A", None, "u1").await.unwrap();
        let b = svc.create_class("B", None, "u2").await.unwrap();
        let c = svc.create_class("C", None, "u1").await.unwrap();
        svc.add_member(&b.id, "u1", Role::Student, Some("u2".into()))
            .await
            .unwrap();

        let all = svc.classes_for_user("u1", None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|c| c.class.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), c.id.as_str(), a.id.as_str()]);

        let teaching = svc.classes_for_user("u1", Some(Role::Teacher)).await.unwrap();
        assert_eq!(teaching.len(), 2);
        assert!(teaching.iter().all(|c| c.role == Role::Teacher));

        let studying = svc.classes_for_user("u1", Some(Role::Student)).await.unwrap();
        assert_eq!(studying.len(), 1);
        assert_eq!(studying[0].class.id, b.id);

        assert!(svc.classes_for_user("nobody", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_membership_errors() {
        let svc = MemoryClassroom::new();
        let class = svc.create_class("A", None, "u1").await.unwrap();

        assert!(matches!(
            svc.add_member(&class.id, "u1", Role::Student, None).await,
            Err(ClassroomError::AlreadyMember)
        ));
        assert!(matches!(
            svc.add_member("missing", "u2", Role::Student, None).await,
            Err(ClassroomError::ClassNotFound)
        ));
        assert!(matches!(
            svc.remove_member(&class.id, "u2").await,
            Err(ClassroomError::MemberNotFound)
        ));

        svc.add_member(&class.id, "u2", Role::Student, None).await.unwrap();
        svc.remove_member(&class.id, "u2").await.unwrap();
        assert!(svc.classes_for_user("u2", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let svc = MemoryClassroom::new();
        let class = svc
            .create_class("A", Some("first".into()), "u1")
            .await
            .unwrap();

        let updated = svc
            .update_class(
                &class.id,
                ClassUpdate {
                    name: Some("A2".into()),
                    description: Some(None),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "A2");
        assert_eq!(updated.description, None);
        assert!(updated.updated_at >= class.updated_at);

        assert!(matches!(
            svc.update_class(&class.id, ClassUpdate { name: Some(" ".into()), description: None }).await,
            Err(ClassroomError::Invalid(_))
        ));

        svc.delete_class(&class.id).await.unwrap();
        assert!(svc.classes_for_user("u1", None).await.unwrap().is_empty());
        assert!(matches!(
            svc.delete_class(&class.id).await,
            Err(ClassroomError::ClassNotFound)
        ));
    }
}
