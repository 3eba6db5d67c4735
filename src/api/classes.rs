//! Classroom endpoints: classes and memberships

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use super::client::{ApiClient, ApiRequest};
use super::error::ApiError;
use crate::models::{Class, ClassMember, ClassWithRole, Role, User};

/// `GET /classes` response
#[derive(Debug, Deserialize)]
pub struct ClassList {
    pub success: bool,
    pub data: Vec<ClassWithRole>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClass {
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMember {
    pub user_id: String,
    pub role: Role,
    pub invited_by: Option<String>,
}

/// Join path segments, percent-encoding each so ids cannot change the route.
fn segments_path(segments: &[&str]) -> Result<String, ApiError> {
    let mut url = Url::parse("http://localhost/")
        .map_err(|e| ApiError::local(format!("Failed to build request path: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| ApiError::local("Failed to build request path"))?
        .clear()
        .extend(segments);
    Ok(url.path().to_string())
}

/// Classes the user belongs to, newest membership first.
pub async fn get_classes(
    client: &ApiClient,
    user_id: &str,
    role: Option<Role>,
) -> Result<ClassList, ApiError> {
    let mut request = ApiRequest::new(Method::GET, "/classes").query("userId", user_id);
    if let Some(role) = role {
        request = request.query("role", role.as_str());
    }
    client.send_json(request).await
}

pub async fn get_class(
    client: &ApiClient,
    class_id: &str,
    user_id: &str,
) -> Result<ClassWithRole, ApiError> {
    let request =
        ApiRequest::new(Method::GET, segments_path(&["classes", class_id])?).query("userId", user_id);
    let envelope: Envelope<ClassWithRole> = client.send_json(request).await?;
    Ok(envelope.data)
}

pub async fn create_class(client: &ApiClient, new_class: &NewClass) -> Result<Class, ApiError> {
    let envelope: Envelope<Class> = client.post("/classes", new_class).await?;
    Ok(envelope.data)
}

pub async fn add_member(
    client: &ApiClient,
    class_id: &str,
    member: &NewMember,
) -> Result<ClassMember, ApiError> {
    let envelope: Envelope<ClassMember> = client
        .post(&segments_path(&["classes", class_id, "members"])?, member)
        .await?;
    Ok(envelope.data)
}

pub async fn remove_member(
    client: &ApiClient,
    class_id: &str,
    user_id: &str,
) -> Result<(), ApiError> {
    client
        .delete(&segments_path(&["classes", class_id, "members", user_id])?)
        .await
}

// ---------------------------------------------------------------------------
// CLI output
// ---------------------------------------------------------------------------

/// Print the signed-in user's classes as a table.
pub fn print_classes(user: &User, classes: &ClassList) {
    println!("\nClasses for {}:", user.display_name);
    println!("{:-<60}", "");

    if classes.data.is_empty() {
        println!("  (no classes found)");
        return;
    }

    for entry in &classes.data {
        println!(
            "  {:<30} {:<8} {}",
            entry.class.name,
            entry.role,
            entry.class.id
        );
    }
    println!("\n{} class(es)", classes.count);
}

pub fn print_class(entry: &ClassWithRole) {
    let class = &entry.class;
    println!();
    println!("Name:        {}", class.name);
    println!(
        "Description: {}",
        class.description.as_deref().unwrap_or("(none)")
    );
    println!("Your role:   {}", entry.role);
    println!(
        "Invite code: {}",
        class.invite_code.as_deref().unwrap_or("(none)")
    );
    println!("Joined:      {}", entry.joined_at.format("%Y-%m-%d %H:%M"));
    println!("ID:          {}", class.id);
}
