//! Entities whose viewer relationships can be toggled.

use skyline_atproto::{PostView, ProfileView, RelationshipAction};
use skyline_cache::{
    PENDING_RECORD, PostField, PostShadow, ProfileField, ProfileShadow, ShadowPatch, Shadowable,
};

/// A shadowable entity with on/off viewer relationships backed by records.
pub trait Toggleable: Shadowable {
    /// Overlay field owned by `action`, or `None` if this entity has no such
    /// relationship.
    fn field_for(action: RelationshipAction) -> Option<<Self::Patch as ShadowPatch>::Field>;

    /// Record URI of the viewer's `action` relationship, if any.
    fn relationship(&self, action: RelationshipAction) -> Option<&str>;

    /// Patch that sets the `action` relationship to `record`.
    fn relationship_patch(action: RelationshipAction, record: Option<String>) -> Self::Patch;

    /// Content hash sent along with the mutation, for record types that need it.
    fn subject_cid(&self) -> Option<&str>;

    /// This entity with the `action` relationship confirmed as `record`,
    /// counters included.
    fn with_relationship(&self, action: RelationshipAction, record: Option<String>) -> Self {
        self.apply_patch(&Self::relationship_patch(action, record))
    }

    /// Optimistic patch for a requested state. Keeps a known record URI
    /// instead of the pending placeholder when the state doesn't change.
    fn optimistic_patch(&self, action: RelationshipAction, desired: bool) -> Self::Patch {
        let record = match (desired, self.relationship(action)) {
            (false, _) => None,
            (true, Some(existing)) => Some(existing.to_string()),
            (true, None) => Some(PENDING_RECORD.to_string()),
        };
        Self::relationship_patch(action, record)
    }
}

impl Toggleable for PostView {
    fn field_for(action: RelationshipAction) -> Option<PostField> {
        match action {
            RelationshipAction::Like => Some(PostField::Like),
            RelationshipAction::Repost => Some(PostField::Repost),
            RelationshipAction::Follow => None,
        }
    }

    fn relationship(&self, action: RelationshipAction) -> Option<&str> {
        match action {
            RelationshipAction::Like => self.viewer.like.as_deref(),
            RelationshipAction::Repost => self.viewer.repost.as_deref(),
            RelationshipAction::Follow => None,
        }
    }

    fn relationship_patch(action: RelationshipAction, record: Option<String>) -> PostShadow {
        match action {
            RelationshipAction::Like => PostShadow {
                like: Some(record),
                ..Default::default()
            },
            RelationshipAction::Repost => PostShadow {
                repost: Some(record),
                ..Default::default()
            },
            RelationshipAction::Follow => PostShadow::default(),
        }
    }

    fn subject_cid(&self) -> Option<&str> {
        Some(&self.cid)
    }
}

impl Toggleable for ProfileView {
    fn field_for(action: RelationshipAction) -> Option<ProfileField> {
        match action {
            RelationshipAction::Follow => Some(ProfileField::Following),
            _ => None,
        }
    }

    fn relationship(&self, action: RelationshipAction) -> Option<&str> {
        match action {
            RelationshipAction::Follow => self.viewer.following.as_deref(),
            _ => None,
        }
    }

    fn relationship_patch(action: RelationshipAction, record: Option<String>) -> ProfileShadow {
        match action {
            RelationshipAction::Follow => ProfileShadow {
                following: Some(record),
            },
            _ => ProfileShadow::default(),
        }
    }

    fn subject_cid(&self) -> Option<&str> {
        None
    }
}
