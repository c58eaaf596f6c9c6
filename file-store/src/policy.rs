use auth_check::Identity;

use crate::error::{FileStoreError, FileStoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Upload,
    Download,
    Delete,
    CompressionStatus,
    ListAll,
}

pub const ALL_OPERATIONS: [Operation; 6] = [
    Operation::List,
    Operation::Upload,
    Operation::Download,
    Operation::Delete,
    Operation::CompressionStatus,
    Operation::ListAll,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    Namespace(&'a str),
    /// The aggregate of every namespace.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Users work in their own namespace only. Admins may list, download and delete
/// anywhere and see the aggregate, but never upload.
pub fn authorize(identity: &Identity, target: Target<'_>, operation: Operation) -> Decision {
    let own = matches!(target, Target::Namespace(ns) if ns == identity.username);

    let allowed = match (operation, target) {
        (Operation::ListAll, _) => identity.admin,
        (_, Target::All) => false,
        (Operation::Upload, _) => !identity.admin && own,
        (Operation::CompressionStatus, _) => own,
        (Operation::List | Operation::Download | Operation::Delete, _) => identity.admin || own,
    };

    if allowed { Decision::Allow } else { Decision::Deny }
}

/// [`authorize`], with a denial turned into `Forbidden`.
pub fn require(identity: &Identity, target: Target<'_>, operation: Operation) -> FileStoreResult<()> {
    match authorize(identity, target, operation) {
        Decision::Allow => Ok(()),
        Decision::Deny => {
            tracing::info!(user = %identity.username, ?target, ?operation, "Access denied");
            Err(FileStoreError::Forbidden)
        }
    }
}
