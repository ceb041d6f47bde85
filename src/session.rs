use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};

/// User profile as returned by the login endpoint. The backend is loose
/// about which fields it fills in, so everything past the email is optional.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UserProfile {
    pub email: String,
    #[serde(default)]
    pub nombre: Option<String>,
    #[serde(default)]
    pub id: Option<i64>,
}

/// Authenticated session: token plus the profile that came with it.
///
/// Persisted as JSON in the user config dir with an explicit
/// load/save/clear lifecycle. Anything that talks to the backend takes
/// the session as an argument; nothing reads the file ad hoc.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: UserProfile,
    pub base_url: String,
    pub saved_at: DateTime<Utc>,
}

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

impl Session {
    pub fn new(token: String, user: UserProfile, base_url: String) -> Self {
        Self {
            token,
            user,
            base_url,
            saved_at: Utc::now(),
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::session_path()?;

        if !path.exists() {
            return Err(anyhow!("No session found. Run `ecobox login` first."));
        }

        let content = fs::read_to_string(&path)?;
        let session: Session = serde_json::from_str(&content)?;
        Ok(session)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::session_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    pub fn clear() -> Result<()> {
        let path = Self::session_path()?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn exists() -> bool {
        Self::session_path().map(|p| p.exists()).unwrap_or(false)
    }

    fn session_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("session.json"))
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("ecobox"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Session {
        Session::new(
            "abc123".to_string(),
            UserProfile {
                email: "ana@example.com".to_string(),
                nombre: Some("Ana".to_string()),
                id: Some(7),
            },
            DEFAULT_BASE_URL.to_string(),
        )
    }

    #[test]
    fn roundtrips_through_json() {
        let session = sample();
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.token, "abc123");
        assert_eq!(back.user.email, "ana@example.com");
        assert_eq!(back.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn profile_tolerates_missing_fields() {
        let profile: UserProfile = serde_json::from_str(r#"{"email":"x@y.z"}"#).unwrap();
        assert_eq!(profile.email, "x@y.z");
        assert!(profile.nombre.is_none());
        assert!(profile.id.is_none());
    }

    #[test]
    fn save_and_load_roundtrip() {
        // Redirect the config dir so the test never touches the real one
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session.json");

        let session = sample();
        let content = serde_json::to_string_pretty(&session).unwrap();
        std::fs::write(&path, content).unwrap();

        let loaded: Session =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.token, session.token);
        assert_eq!(loaded.user.id, Some(7));
    }
}
