//! Conflict resolution between a rejected local operation and the remote
//! snapshot.
//!
//! The resolver is pure: it never touches the store or the queue. It returns a
//! [`ConflictResolution`] whose [`ResolutionAction`] tells the caller what to
//! do with both. Running it twice on the same inputs gives the same answer.

use crate::{Document, DocumentDraft, DocumentId, OperationKind, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Which side survives a version conflict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Overwrite the remote, resending on top of its version
    Local,
    /// Drop the local operation and take the remote snapshot
    Remote,
    /// Combine both with a caller-supplied [`DocumentMerge`]
    Merge,
    /// Take the remote snapshot, then replay the local text as a new edit
    #[default]
    RemoteThenRequeue,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Local => "local",
            ConflictPolicy::Remote => "remote",
            ConflictPolicy::Merge => "merge",
            ConflictPolicy::RemoteThenRequeue => "remote-then-requeue",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown policy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown conflict policy: {0}")]
pub struct UnknownPolicy(pub String);

impl FromStr for ConflictPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ConflictPolicy::Local),
            "remote" => Ok(ConflictPolicy::Remote),
            "merge" => Ok(ConflictPolicy::Merge),
            "remote-then-requeue" | "remote-wins-then-requeue-local-as-new-edit" => {
                Ok(ConflictPolicy::RemoteThenRequeue)
            }
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

/// Outcome label of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    Local,
    Remote,
    Merge,
}

/// What the caller has to do to carry out a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionAction {
    /// Send the queued item again as `kind`, based on `base_version`
    Resend {
        kind: OperationKind,
        base_version: Version,
    },
    /// Install the remote snapshot locally and drop the document's queued items
    AdoptRemote(Document),
    /// The remote deleted the document; tombstone it locally and drop its items
    AcceptDeletion,
    /// Install `remote`, then write `edit` as a fresh local edit
    Reapply {
        remote: Document,
        edit: DocumentDraft,
    },
}

/// Record of one resolved conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictResolution {
    pub document_id: DocumentId,
    pub local_value: Document,
    /// `None` is a remote tombstone
    pub remote_value: Option<Document>,
    pub resolution: Resolution,
    pub action: ResolutionAction,
}

/// Combines a local and a remote snapshot into a new local edit.
pub trait DocumentMerge: Send + Sync {
    fn merge(&self, local: &Document, remote: &Document) -> DocumentDraft;
}

impl<F> DocumentMerge for F
where
    F: Fn(&Document, &Document) -> DocumentDraft + Send + Sync,
{
    fn merge(&self, local: &Document, remote: &Document) -> DocumentDraft {
        self(local, remote)
    }
}

/// Applies a [`ConflictPolicy`] to rejected operations.
#[derive(Clone, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    merger: Option<Arc<dyn DocumentMerge>>,
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("policy", &self.policy)
            .field("merger", &self.merger.is_some())
            .finish()
    }
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            merger: None,
        }
    }

    /// Supply the merge function used by [`ConflictPolicy::Merge`].
    ///
    /// Without one, `Merge` behaves like the default policy.
    pub fn with_merge(mut self, merger: impl DocumentMerge + 'static) -> Self {
        self.merger = Some(Arc::new(merger));
        self
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Resolve a conflict reported for an operation of `kind`.
    ///
    /// `local` is the freshest local snapshot of the document; `remote` is the
    /// remote's snapshot, or `None` when the remote no longer has it.
    pub fn resolve(
        &self,
        kind: OperationKind,
        local: &Document,
        remote: Option<&Document>,
    ) -> ConflictResolution {
        let (resolution, action) = match remote {
            None => self.against_tombstone(kind),
            Some(remote) => self.against_snapshot(kind, local, remote),
        };

        ConflictResolution {
            document_id: local.id.clone(),
            local_value: local.clone(),
            remote_value: remote.cloned(),
            resolution,
            action,
        }
    }

    fn against_tombstone(&self, kind: OperationKind) -> (Resolution, ResolutionAction) {
        // Both sides want it gone
        if kind == OperationKind::Delete {
            return (Resolution::Remote, ResolutionAction::AcceptDeletion);
        }

        match self.policy {
            ConflictPolicy::Remote => (Resolution::Remote, ResolutionAction::AcceptDeletion),
            _ => (
                Resolution::Local,
                ResolutionAction::Resend {
                    kind: OperationKind::Create,
                    base_version: 0,
                },
            ),
        }
    }

    fn against_snapshot(
        &self,
        kind: OperationKind,
        local: &Document,
        remote: &Document,
    ) -> (Resolution, ResolutionAction) {
        if kind == OperationKind::Delete {
            return match self.policy {
                ConflictPolicy::Remote => (
                    Resolution::Remote,
                    ResolutionAction::AdoptRemote(remote.clone()),
                ),
                _ => (
                    Resolution::Local,
                    ResolutionAction::Resend {
                        kind: OperationKind::Delete,
                        base_version: remote.version,
                    },
                ),
            };
        }

        match (self.policy, &self.merger) {
            (ConflictPolicy::Local, _) => (
                Resolution::Local,
                ResolutionAction::Resend {
                    // The remote has the document, so a create becomes an update
                    kind: OperationKind::Update,
                    base_version: remote.version,
                },
            ),
            (ConflictPolicy::Remote, _) => (
                Resolution::Remote,
                ResolutionAction::AdoptRemote(remote.clone()),
            ),
            (ConflictPolicy::Merge, Some(merger)) => {
                let mut edit = merger.merge(local, remote);
                edit.id = local.id.clone();
                (
                    Resolution::Merge,
                    ResolutionAction::Reapply {
                        remote: remote.clone(),
                        edit,
                    },
                )
            }
            (ConflictPolicy::Merge, None) | (ConflictPolicy::RemoteThenRequeue, _) => (
                Resolution::Local,
                ResolutionAction::Reapply {
                    remote: remote.clone(),
                    edit: DocumentDraft::from(local),
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(content: &str, version: Version) -> Document {
        let mut doc = Document::from_draft(DocumentDraft::new("d1", "Title", content), 1000);
        doc.version = version;
        doc
    }

    #[test]
    fn remote_policy_adopts_remote() {
        let resolver = ConflictResolver::new(ConflictPolicy::Remote);
        let local = doc("mine", 3);
        let remote = doc("theirs", 5);

        let result = resolver.resolve(OperationKind::Update, &local, Some(&remote));
        assert_eq!(result.resolution, Resolution::Remote);
        assert_eq!(result.action, ResolutionAction::AdoptRemote(remote.clone()));
        assert_eq!(result.local_value.version, 3);
        assert_eq!(result.remote_value.unwrap().version, 5);
    }

    #[test]
    fn local_policy_resends_on_remote_version() {
        let resolver = ConflictResolver::new(ConflictPolicy::Local);
        let result = resolver.resolve(OperationKind::Create, &doc("mine", 1), Some(&doc("x", 7)));

        assert_eq!(result.resolution, Resolution::Local);
        assert_eq!(
            result.action,
            ResolutionAction::Resend {
                kind: OperationKind::Update,
                base_version: 7
            }
        );
    }

    #[test]
    fn default_policy_replays_local_text_over_remote() {
        let resolver = ConflictResolver::default();
        let local = doc("mine", 3);
        let remote = doc("theirs", 5);

        let result = resolver.resolve(OperationKind::Update, &local, Some(&remote));
        match result.action {
            ResolutionAction::Reapply { remote: r, edit } => {
                assert_eq!(r.version, 5);
                assert_eq!(edit.content, "mine");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn merge_policy_uses_merge_function() {
        let resolver = ConflictResolver::new(ConflictPolicy::Merge).with_merge(
            |local: &Document, remote: &Document| {
                DocumentDraft::new(
                    "ignored",
                    local.title.clone(),
                    format!("{}\n{}", remote.content, local.content),
                )
            },
        );

        let remote = doc("theirs", 4);
        let result = resolver.resolve(OperationKind::Update, &doc("mine", 2), Some(&remote));
        assert_eq!(result.resolution, Resolution::Merge);
        match result.action {
            ResolutionAction::Reapply { edit, .. } => {
                assert_eq!(edit.id, "d1");
                assert_eq!(edit.content, "theirs\nmine");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn merge_without_function_falls_back_to_default() {
        let resolver = ConflictResolver::new(ConflictPolicy::Merge);
        let result = resolver.resolve(OperationKind::Update, &doc("mine", 2), Some(&doc("x", 4)));
        assert!(matches!(result.action, ResolutionAction::Reapply { .. }));
        assert_eq!(result.resolution, Resolution::Local);
    }

    #[test]
    fn tombstone_resurrects_unless_remote_wins() {
        let local = doc("mine", 3);

        let local_wins = ConflictResolver::new(ConflictPolicy::Local);
        let keep = local_wins.resolve(OperationKind::Update, &local, None);
        assert_eq!(
            keep.action,
            ResolutionAction::Resend {
                kind: OperationKind::Create,
                base_version: 0
            }
        );
        assert_eq!(keep.remote_value, None);

        let remote_wins = ConflictResolver::new(ConflictPolicy::Remote);
        let drop = remote_wins.resolve(OperationKind::Update, &local, None);
        assert_eq!(drop.action, ResolutionAction::AcceptDeletion);
        assert_eq!(drop.resolution, Resolution::Remote);
    }

    #[test]
    fn delete_against_tombstone_is_accepted() {
        let resolver = ConflictResolver::new(ConflictPolicy::Local);
        let result = resolver.resolve(OperationKind::Delete, &doc("x", 4), None);
        assert_eq!(result.action, ResolutionAction::AcceptDeletion);
    }

    #[test]
    fn delete_against_newer_remote() {
        let remote = doc("theirs", 9);
        let local = doc("x", 4);

        let resolver = ConflictResolver::default();
        let keep = resolver.resolve(OperationKind::Delete, &local, Some(&remote));
        assert_eq!(
            keep.action,
            ResolutionAction::Resend {
                kind: OperationKind::Delete,
                base_version: 9
            }
        );

        let remote_wins = ConflictResolver::new(ConflictPolicy::Remote);
        let drop = remote_wins.resolve(OperationKind::Delete, &local, Some(&remote));
        assert_eq!(drop.action, ResolutionAction::AdoptRemote(remote));
    }

    #[test]
    fn resolution_is_idempotent() {
        let local = doc("mine", 3);
        let remote = doc("theirs", 5);

        for policy in [
            ConflictPolicy::Local,
            ConflictPolicy::Remote,
            ConflictPolicy::Merge,
            ConflictPolicy::RemoteThenRequeue,
        ] {
            let resolver = ConflictResolver::new(policy);
            let first = resolver.resolve(OperationKind::Update, &local, Some(&remote));
            let second = resolver.resolve(OperationKind::Update, &local, Some(&remote));
            assert_eq!(first, second, "policy {policy}");
        }
    }

    #[test]
    fn policy_names() {
        assert_eq!("remote".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Remote);
        assert_eq!(
            "Remote-Then-Requeue".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::RemoteThenRequeue
        );
        assert!("coin-flip".parse::<ConflictPolicy>().is_err());
        assert_eq!(
            serde_json::to_string(&ConflictPolicy::RemoteThenRequeue).unwrap(),
            "\"remote-then-requeue\""
        );
    }
}
