use chrono::NaiveDate;
use serde::{ Serialize, Deserialize };

/// Optional profile fields captured at registration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub grade_level: Option<String>,
    #[serde(default)]
    pub dob: Option<NaiveDate>,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub profile: UserProfile,
}

/// Row shape kept by the stores. Never serialized to clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredUser {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub profile: UserProfile,
}

impl StoredUser {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            first_name: self.profile.first_name.clone(),
            last_name: self.profile.last_name.clone(),
            gender: self.profile.gender.clone(),
            grade_level: self.profile.grade_level.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserCredentials {
    pub id: i64,
    pub password_hash: String,
}

/// Public listing entry for `/api/all-users`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(rename = "userID")]
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub grade_level: Option<String>,
}

/// Emails are unique regardless of case.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
