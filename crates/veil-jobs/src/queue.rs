//! The fixed queue topology.
//!
//! Each variant is statically routed to one queue. Serial queues run one
//! job at a time; concurrent queues run as many as the host allows. The
//! blocking queue is special: it holds launch jobs of any variant and must
//! fully drain before any other queue starts.

use veil_types::job::JobVariant;

/// The named queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Serial; launch jobs of any variant.
    Blocking,
    /// Concurrent; outbound traffic.
    MessageSend,
    /// Serial; inbound traffic must keep its order.
    MessageReceive,
    /// Serial.
    AttachmentDownload,
    /// Concurrent.
    ExpirationUpdate,
    /// Serial; everything unrouted.
    General,
}

impl QueueKind {
    /// The queue a variant executes on (outside the blocking queue).
    pub fn for_variant(variant: JobVariant) -> QueueKind {
        match variant {
            JobVariant::AttachmentUpload
            | JobVariant::MessageSend
            | JobVariant::NotifyPush
            | JobVariant::SendReadReceipts
            | JobVariant::GroupLeaving
            | JobVariant::ConfigSync => QueueKind::MessageSend,
            JobVariant::MessageReceive | JobVariant::ConfigMessageReceive => {
                QueueKind::MessageReceive
            }
            JobVariant::AttachmentDownload => QueueKind::AttachmentDownload,
            JobVariant::ExpirationUpdate
            | JobVariant::GetExpiration
            | JobVariant::DisappearingMessages => QueueKind::ExpirationUpdate,
            JobVariant::RetrieveDefaultOpenGroupRooms | JobVariant::GarbageCollection => {
                QueueKind::General
            }
        }
    }

    /// Whether this queue runs one job at a time.
    pub fn is_serial(self) -> bool {
        !matches!(self, QueueKind::MessageSend | QueueKind::ExpirationUpdate)
    }

    /// The variants routed to this queue. The blocking queue owns none; it
    /// executes whatever launch jobs land in it.
    pub fn variants(self) -> Vec<JobVariant> {
        match self {
            QueueKind::Blocking => Vec::new(),
            other => JobVariant::all()
                .iter()
                .copied()
                .filter(|variant| QueueKind::for_variant(*variant) == other)
                .collect(),
        }
    }

    /// Every queue, blocking first.
    pub fn all() -> [QueueKind; 6] {
        [
            QueueKind::Blocking,
            QueueKind::MessageSend,
            QueueKind::MessageReceive,
            QueueKind::AttachmentDownload,
            QueueKind::ExpirationUpdate,
            QueueKind::General,
        ]
    }

    /// Every queue except the blocking one.
    pub fn non_blocking() -> [QueueKind; 5] {
        [
            QueueKind::MessageSend,
            QueueKind::MessageReceive,
            QueueKind::AttachmentDownload,
            QueueKind::ExpirationUpdate,
            QueueKind::General,
        ]
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueueKind::Blocking => "blocking",
            QueueKind::MessageSend => "message-send",
            QueueKind::MessageReceive => "message-receive",
            QueueKind::AttachmentDownload => "attachment-download",
            QueueKind::ExpirationUpdate => "expiration-update",
            QueueKind::General => "general",
        };
        f.write_str(name)
    }
}
