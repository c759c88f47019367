//! Job variants and scheduling behaviors.
//!
//! These enums are shared between the durable job store and the runner;
//! they persist as their string form, so renaming a variant is a schema
//! migration.

use serde::{Deserialize, Serialize};

/// The closed set of background job kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobVariant {
    MessageSend,
    MessageReceive,
    ConfigMessageReceive,
    AttachmentDownload,
    AttachmentUpload,
    NotifyPush,
    SendReadReceipts,
    ExpirationUpdate,
    GetExpiration,
    DisappearingMessages,
    ConfigSync,
    GroupLeaving,
    RetrieveDefaultOpenGroupRooms,
    GarbageCollection,
}

/// When and how often a job runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobBehavior {
    /// Run once, deleted on success or permanent failure.
    RunOnce,
    /// Run once at the next app launch.
    RunOnceNextLaunch,
    /// Re-run forever; success advances the next-run timestamp.
    Recurring,
    /// Recurring, reloaded at every app launch.
    RecurringOnLaunch,
    /// Recurring, reloaded every time the app becomes active.
    RecurringOnActive,
}

impl JobVariant {
    /// The string persisted in the job table.
    pub fn as_str(self) -> &'static str {
        match self {
            JobVariant::MessageSend => "messageSend",
            JobVariant::MessageReceive => "messageReceive",
            JobVariant::ConfigMessageReceive => "configMessageReceive",
            JobVariant::AttachmentDownload => "attachmentDownload",
            JobVariant::AttachmentUpload => "attachmentUpload",
            JobVariant::NotifyPush => "notifyPush",
            JobVariant::SendReadReceipts => "sendReadReceipts",
            JobVariant::ExpirationUpdate => "expirationUpdate",
            JobVariant::GetExpiration => "getExpiration",
            JobVariant::DisappearingMessages => "disappearingMessages",
            JobVariant::ConfigSync => "configSync",
            JobVariant::GroupLeaving => "groupLeaving",
            JobVariant::RetrieveDefaultOpenGroupRooms => "retrieveDefaultOpenGroupRooms",
            JobVariant::GarbageCollection => "garbageCollection",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "messageSend" => JobVariant::MessageSend,
            "messageReceive" => JobVariant::MessageReceive,
            "configMessageReceive" => JobVariant::ConfigMessageReceive,
            "attachmentDownload" => JobVariant::AttachmentDownload,
            "attachmentUpload" => JobVariant::AttachmentUpload,
            "notifyPush" => JobVariant::NotifyPush,
            "sendReadReceipts" => JobVariant::SendReadReceipts,
            "expirationUpdate" => JobVariant::ExpirationUpdate,
            "getExpiration" => JobVariant::GetExpiration,
            "disappearingMessages" => JobVariant::DisappearingMessages,
            "configSync" => JobVariant::ConfigSync,
            "groupLeaving" => JobVariant::GroupLeaving,
            "retrieveDefaultOpenGroupRooms" => JobVariant::RetrieveDefaultOpenGroupRooms,
            "garbageCollection" => JobVariant::GarbageCollection,
            _ => return None,
        })
    }

    /// Every variant, in declaration order.
    pub fn all() -> &'static [JobVariant] {
        &[
            JobVariant::MessageSend,
            JobVariant::MessageReceive,
            JobVariant::ConfigMessageReceive,
            JobVariant::AttachmentDownload,
            JobVariant::AttachmentUpload,
            JobVariant::NotifyPush,
            JobVariant::SendReadReceipts,
            JobVariant::ExpirationUpdate,
            JobVariant::GetExpiration,
            JobVariant::DisappearingMessages,
            JobVariant::ConfigSync,
            JobVariant::GroupLeaving,
            JobVariant::RetrieveDefaultOpenGroupRooms,
            JobVariant::GarbageCollection,
        ]
    }
}

impl JobBehavior {
    /// The string persisted in the job table.
    pub fn as_str(self) -> &'static str {
        match self {
            JobBehavior::RunOnce => "runOnce",
            JobBehavior::RunOnceNextLaunch => "runOnceNextLaunch",
            JobBehavior::Recurring => "recurring",
            JobBehavior::RecurringOnLaunch => "recurringOnLaunch",
            JobBehavior::RecurringOnActive => "recurringOnActive",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "runOnce" => JobBehavior::RunOnce,
            "runOnceNextLaunch" => JobBehavior::RunOnceNextLaunch,
            "recurring" => JobBehavior::Recurring,
            "recurringOnLaunch" => JobBehavior::RecurringOnLaunch,
            "recurringOnActive" => JobBehavior::RecurringOnActive,
            _ => return None,
        })
    }

    /// Whether the job self-deletes after a successful run.
    pub fn deletes_on_success(self) -> bool {
        matches!(self, JobBehavior::RunOnce | JobBehavior::RunOnceNextLaunch)
    }

    /// Whether this behavior is reloaded by a lifecycle event.
    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            JobBehavior::RunOnceNextLaunch
                | JobBehavior::RecurringOnLaunch
                | JobBehavior::RecurringOnActive
        )
    }
}

impl std::fmt::Display for JobVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for JobBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_string_roundtrip() {
        for v in JobVariant::all() {
            assert_eq!(JobVariant::parse(v.as_str()), Some(*v));
        }
        assert_eq!(JobVariant::parse("unknown"), None);
    }

    #[test]
    fn test_behavior_string_roundtrip() {
        for b in [
            JobBehavior::RunOnce,
            JobBehavior::RunOnceNextLaunch,
            JobBehavior::Recurring,
            JobBehavior::RecurringOnLaunch,
            JobBehavior::RecurringOnActive,
        ] {
            assert_eq!(JobBehavior::parse(b.as_str()), Some(b));
        }
    }

    #[test]
    fn test_deletes_on_success() {
        assert!(JobBehavior::RunOnce.deletes_on_success());
        assert!(JobBehavior::RunOnceNextLaunch.deletes_on_success());
        assert!(!JobBehavior::Recurring.deletes_on_success());
        assert!(!JobBehavior::RecurringOnLaunch.deletes_on_success());
    }

    #[test]
    fn test_lifecycle_classification() {
        assert!(JobBehavior::RunOnceNextLaunch.is_lifecycle());
        assert!(JobBehavior::RecurringOnActive.is_lifecycle());
        assert!(!JobBehavior::RunOnce.is_lifecycle());
        assert!(!JobBehavior::Recurring.is_lifecycle());
    }
}
