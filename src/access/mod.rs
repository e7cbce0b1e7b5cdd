use crate::error::{CoreError, Result};
use crate::{Role, User};

/// Who is asking, and how they relate to the code being viewed.
#[derive(Debug, Clone, Copy)]
pub struct Viewer<'a> {
    pub user: &'a User,
    /// Membership in the semester the code belongs to.
    pub role: Option<Role>,
    pub is_author: bool,
    pub is_reviewer: bool,
}

/// Chunks and whole submissions are visible to semester teachers, the authors,
/// assigned reviewers and site administrators.
pub fn check_code_access(viewer: &Viewer<'_>) -> Result<()> {
    if viewer.user.is_admin {
        return Ok(());
    }
    match viewer.role {
        None => Err(CoreError::PermissionDenied(format!(
            "{} is not a member of this semester",
            viewer.user.username
        ))),
        Some(Role::Teacher) => Ok(()),
        Some(_) if viewer.is_author || viewer.is_reviewer => Ok(()),
        Some(_) => Err(CoreError::PermissionDenied(format!(
            "{} is neither an author nor a reviewer of this code",
            viewer.user.username
        ))),
    }
}

/// Looking up a submission by author name requires semester membership, even for
/// site administrators. Members may then look up their own submission; teachers
/// and administrators may look up anyone's.
pub fn check_author_lookup(viewer: &Viewer<'_>) -> Result<()> {
    let Some(role) = viewer.role else {
        return Err(CoreError::PermissionDenied(format!(
            "{} is not a member of this semester",
            viewer.user.username
        )));
    };
    if viewer.user.is_admin || role == Role::Teacher || viewer.is_author {
        return Ok(());
    }
    Err(CoreError::PermissionDenied(format!(
        "{} may not look up other students' submissions",
        viewer.user.username
    )))
}
