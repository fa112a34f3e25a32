use serde::{Deserialize, Serialize};

pub mod ids;

// ── Users ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub verified: bool,
    pub lang: String,
    pub theme: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Login {
    /// Email address or username.
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBody {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgotPassword {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetPassword {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
}

// ── Threads ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThread {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub open_to_non_members: Option<bool>,
    #[serde(default)]
    pub open_to_anonymous: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditThreadConfig {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub open_to_non_members: Option<bool>,
    #[serde(default)]
    pub open_to_anonymous: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    pub id: i64,
    pub name: String,
    pub owner: UserSummary,
    pub description: String,
    pub open_to_non_members: bool,
    pub open_to_anonymous: bool,
    pub icon_url: Option<String>,
    pub banner_url: Option<String>,
    pub member_count: i64,
    pub viewer_rank: i64,
    pub created_at: String,
}

/// A row in the thread directory or on a profile. `rank` is the rank of
/// whoever the list is about: the viewer for the directory, the profile's
/// owner on a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub icon_url: Option<String>,
    pub member_count: i64,
    pub rank: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub threads: Vec<ThreadSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(default)]
    pub username: String,
}

// ── Tags ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagDto {
    pub id: i64,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTag {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub tag_color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRef {
    #[serde(default, deserialize_with = "ids::one")]
    pub tag_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditTag {
    #[serde(default, deserialize_with = "ids::one")]
    pub tag_id: i64,
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub tag_color: Option<String>,
}

// ── Posts ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaDto {
    pub id: i64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDto {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub author: UserSummary,
    pub created_at: String,
    pub upvotes: i64,
    pub downvotes: i64,
    pub my_vote: i64,
    pub comment_count: i64,
    pub tags: Vec<TagDto>,
    pub medias: Vec<MediaDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "ids::many")]
    pub medias: Vec<i64>,
    #[serde(default, deserialize_with = "ids::many")]
    pub tags: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessage {
    #[serde(default, deserialize_with = "ids::one")]
    pub message_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    #[serde(default, deserialize_with = "ids::one")]
    pub message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMedia {
    #[serde(default, deserialize_with = "ids::one")]
    pub message_id: i64,
    #[serde(default, deserialize_with = "ids::one")]
    pub media_id: i64,
}

// ── Comments ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDto {
    pub id: i64,
    pub post_id: i64,
    pub content: String,
    pub author: UserSummary,
    pub created_at: String,
    pub upvotes: i64,
    pub downvotes: i64,
    pub my_vote: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendComment {
    #[serde(default, deserialize_with = "ids::one")]
    pub message_id: i64,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditComment {
    #[serde(default, deserialize_with = "ids::one")]
    pub comment_id: i64,
    #[serde(default, deserialize_with = "ids::one")]
    pub message_id: i64,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRef {
    #[serde(default, deserialize_with = "ids::one")]
    pub comment_id: i64,
    #[serde(default, deserialize_with = "ids::one")]
    pub message_id: i64,
}

// ── Reports ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportContent {
    #[serde(
        rename = "contentToReportID",
        default,
        deserialize_with = "ids::one"
    )]
    pub content_to_report_id: i64,
    #[serde(default)]
    pub report_type: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRef {
    #[serde(default, deserialize_with = "ids::one")]
    pub report_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDto {
    pub id: i64,
    pub subject_kind: String,
    pub subject_id: i64,
    pub reporter: UserSummary,
    pub kind: String,
    pub reason: String,
    pub resolved: bool,
    pub created_at: String,
}
