//! Static collaborator providers.
//!
//! Profiles, interests, and activities belong to systems outside this
//! engine. These implementations serve fixed data handed to them at
//! construction — the right shape for tests and for deployments that
//! snapshot collaborator data ahead of a session.

use async_trait::async_trait;
use keepsake_core::error::MemoryError;
use keepsake_core::profile::{
    Activity, ActivityProvider, Interest, InterestProvider, Profile, ProfileProvider,
};
use chrono::{Duration, Utc};
use std::collections::HashMap;

/// Serves profiles from a fixed map.
pub struct StaticProfileProvider {
    profiles: HashMap<String, Profile>,
}

impl StaticProfileProvider {
    pub fn new(profiles: Vec<Profile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.user_id.clone(), p)).collect(),
        }
    }
}

#[async_trait]
impl ProfileProvider for StaticProfileProvider {
    async fn get_profile(&self, user_id: &str) -> Result<Profile, MemoryError> {
        self.profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(format!("profile for {user_id}")))
    }
}

/// Serves interests from fixed per-user lists.
pub struct StaticInterestProvider {
    interests: HashMap<String, Vec<Interest>>,
}

impl StaticInterestProvider {
    pub fn new(interests: HashMap<String, Vec<Interest>>) -> Self {
        Self { interests }
    }
}

#[async_trait]
impl InterestProvider for StaticInterestProvider {
    async fn interests_by_category(
        &self,
        user_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<Interest>, MemoryError> {
        let all = self.interests.get(user_id).cloned().unwrap_or_default();
        Ok(match category {
            Some(cat) => all
                .into_iter()
                .filter(|i| i.category.eq_ignore_ascii_case(cat))
                .collect(),
            None => all,
        })
    }
}

/// Serves activities from fixed per-user lists.
pub struct StaticActivityProvider {
    activities: HashMap<String, Vec<Activity>>,
}

impl StaticActivityProvider {
    pub fn new(activities: HashMap<String, Vec<Activity>>) -> Self {
        Self { activities }
    }
}

#[async_trait]
impl ActivityProvider for StaticActivityProvider {
    async fn recent_activities(
        &self,
        user_id: &str,
        days: u32,
        activity_type: Option<&str>,
    ) -> Result<Vec<Activity>, MemoryError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let all = self.activities.get(user_id).cloned().unwrap_or_default();
        Ok(all
            .into_iter()
            .filter(|a| a.occurred_at >= cutoff)
            .filter(|a| activity_type.map_or(true, |t| a.activity_type.eq_ignore_ascii_case(t)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(user_id: &str, name: &str) -> Profile {
        Profile {
            user_id: user_id.into(),
            name: name.into(),
            companion_name: "Stella".into(),
            age: None,
            top_interests: vec![],
            communication_style: Default::default(),
        }
    }

    #[tokio::test]
    async fn profile_lookup() {
        let provider = StaticProfileProvider::new(vec![profile("u1", "Maya")]);
        assert_eq!(provider.get_profile("u1").await.unwrap().name, "Maya");
        assert!(provider.get_profile("ghost").await.is_err());
    }

    #[tokio::test]
    async fn interests_filter_by_category() {
        let mut map = HashMap::new();
        map.insert(
            "u1".to_string(),
            vec![
                Interest {
                    content: "watercolor".into(),
                    category: "art".into(),
                    importance: 0.9,
                },
                Interest {
                    content: "telescopes".into(),
                    category: "science".into(),
                    importance: 0.7,
                },
            ],
        );
        let provider = StaticInterestProvider::new(map);

        let art = provider.interests_by_category("u1", Some("Art")).await.unwrap();
        assert_eq!(art.len(), 1);
        assert_eq!(art[0].content, "watercolor");

        let all = provider.interests_by_category("u1", None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn activities_respect_day_window() {
        let mut map = HashMap::new();
        map.insert(
            "u1".to_string(),
            vec![
                Activity {
                    activity_type: "conversation".into(),
                    description: "talked about school".into(),
                    occurred_at: Utc::now() - Duration::days(2),
                },
                Activity {
                    activity_type: "conversation".into(),
                    description: "ancient history".into(),
                    occurred_at: Utc::now() - Duration::days(30),
                },
            ],
        );
        let provider = StaticActivityProvider::new(map);

        let recent = provider.recent_activities("u1", 7, None).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].description, "talked about school");
    }

    #[tokio::test]
    async fn unknown_user_gets_empty_lists() {
        let provider = StaticInterestProvider::new(HashMap::new());
        assert!(provider.interests_by_category("ghost", None).await.unwrap().is_empty());
    }
}
