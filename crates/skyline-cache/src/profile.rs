//! Optimistic overlay for profiles.

use skyline_atproto::ProfileView;

use crate::post::adjust_count;
use crate::shadow::{ShadowPatch, Shadowable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Following,
}

/// Pending edit to whether the viewer follows a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileShadow {
    pub following: Option<Option<String>>,
}

impl ProfileShadow {
    pub fn followed(on: bool) -> Self {
        Self {
            following: Some(on.then(|| crate::PENDING_RECORD.to_string())),
        }
    }
}

impl ShadowPatch for ProfileShadow {
    type Field = ProfileField;

    fn merge(&mut self, newer: &Self) {
        if newer.following.is_some() {
            self.following = newer.following.clone();
        }
    }

    fn clear(&mut self, field: ProfileField) {
        match field {
            ProfileField::Following => self.following = None,
        }
    }

    fn is_empty(&self) -> bool {
        self.following.is_none()
    }
}

impl Shadowable for ProfileView {
    type Patch = ProfileShadow;

    fn shadow_key(&self) -> &str {
        &self.did
    }

    fn apply_patch(&self, patch: &ProfileShadow) -> Self {
        let mut profile = self.clone();
        if let Some(following) = &patch.following {
            profile.followers_count = adjust_count(
                self.followers_count,
                self.viewer.following.is_some(),
                following.is_some(),
            );
            profile.viewer.following = following.clone();
        }
        profile
    }
}
