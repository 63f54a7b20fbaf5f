//! Data models for the auth and management APIs.
//!
//! All types mirror the backend's camelCase JSON. Optional fields default
//! so older or trimmed payloads still parse.

pub mod auth;
pub mod resources;

pub use auth::{
    AuthResponse, ChangePasswordRequest, LoginRequest, LogoutRequest, Profile,
    ProfileUpdateRequest, RefreshTokenRequest, RegisterRequest, User,
};
pub use resources::{
    ApiKey, Certification, Chat, ChatMessage, ChatRole, Client, ClientStatus, DashboardStats,
    EntryKind, Experience, FinanceEntry, FinanceReport, Idea, IdeaStatus, Language, Priority,
    Proficiency, Project, ProjectStatus, ScheduledTask, TaskStatus, Testimonial, Theme,
    UserPreferences, UserProfile,
};
