use thiserror::Error;
use uuid::Uuid;

use crate::models::{Role, UserRecord};

/// The authenticated caller, as vouched for by the session provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: Uuid,
    pub role: Role,
}

impl From<&UserRecord> for Viewer {
    fn from(user: &UserRecord) -> Self {
        Self {
            user_id: user.id,
            role: user.role,
        }
    }
}

/// Which records a query may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Student(Uuid),
    Instructor(Uuid),
    All,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("{role} accounts cannot view {resource}")]
    Forbidden { role: Role, resource: &'static str },
}

impl Viewer {
    pub fn own_scope(&self) -> Scope {
        Scope::Student(self.user_id)
    }

    pub fn roster_scope(&self) -> Result<Scope, AccessError> {
        match self.role {
            Role::Instructor => Ok(Scope::Instructor(self.user_id)),
            Role::Admin => Ok(Scope::All),
            Role::Student => Err(AccessError::Forbidden {
                role: self.role,
                resource: "student rosters",
            }),
        }
    }

    pub fn analytics_scope(&self) -> Result<Scope, AccessError> {
        match self.role {
            Role::Admin => Ok(Scope::All),
            role => Err(AccessError::Forbidden {
                role,
                resource: "admin analytics",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewer(role: Role) -> Viewer {
        Viewer {
            user_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn students_only_see_themselves() {
        let student = viewer(Role::Student);
        assert_eq!(student.own_scope(), Scope::Student(student.user_id));
        assert!(student.roster_scope().is_err());
        assert!(student.analytics_scope().is_err());
    }

    #[test]
    fn instructors_are_scoped_to_their_courses() {
        let instructor = viewer(Role::Instructor);
        assert_eq!(
            instructor.roster_scope(),
            Ok(Scope::Instructor(instructor.user_id))
        );
        assert_eq!(
            instructor.analytics_scope(),
            Err(AccessError::Forbidden {
                role: Role::Instructor,
                resource: "admin analytics",
            })
        );
    }

    #[test]
    fn admins_are_unscoped() {
        let admin = viewer(Role::Admin);
        assert_eq!(admin.roster_scope(), Ok(Scope::All));
        assert_eq!(admin.analytics_scope(), Ok(Scope::All));
    }

    #[test]
    fn forbidden_message_names_role() {
        let err = viewer(Role::Student).roster_scope().unwrap_err();
        assert_eq!(err.to_string(), "student accounts cannot view student rosters");
    }
}
