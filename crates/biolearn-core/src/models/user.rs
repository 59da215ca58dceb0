use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Admin => "ADMIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Pending,
    Expired,
    Cancelled,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Snapshot of the signed-in user as returned by the backend.
///
/// Never mutated in place: login, refresh and profile updates replace the
/// whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub subscription_status: SubscriptionStatus,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub enrolled_courses_count: u32,
    #[serde(default)]
    pub completed_courses_count: u32,
}

impl UserRecord {
    /// "First Last", falling back to whichever part exists, then the email.
    pub fn display_name(&self) -> String {
        let first = self.first_name.as_deref().map(str::trim).unwrap_or("");
        let last = self.last_name.as_deref().map(str::trim).unwrap_or("");
        match (first.is_empty(), last.is_empty()) {
            (false, false) => format!("{} {}", first, last),
            (false, true) => first.to_string(),
            (true, false) => last.to_string(),
            (true, true) => self.email.clone(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_student(&self) -> bool {
        self.role == Role::Student
    }

    pub fn has_active_subscription(&self) -> bool {
        self.subscription_status == SubscriptionStatus::Active
    }
}
