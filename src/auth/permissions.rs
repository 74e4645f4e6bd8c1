use anyhow::Error;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewRegistries,

    ManageStudents,
    ManageTeachers,
    ManageClassrooms,
    ManageClasses,
    EnrollStudents,

    ViewPayments,
    RecordPayments,

    RunSessions,
    ManageCards,

    DeleteRecords,
    ManageUsers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Role {
    Admin,
    Secretary,
    Accountant,
    Teacher,
}

static SECRETARY_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewRegistries);
    permissions.insert(Permission::ManageStudents);
    permissions.insert(Permission::ManageClasses);
    permissions.insert(Permission::EnrollStudents);
    permissions.insert(Permission::ViewPayments);
    permissions.insert(Permission::RecordPayments);
    permissions.insert(Permission::RunSessions);
    permissions.insert(Permission::ManageCards);

    permissions
});

static ACCOUNTANT_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewRegistries);
    permissions.insert(Permission::ViewPayments);
    permissions.insert(Permission::RecordPayments);

    permissions
});

static TEACHER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewRegistries);
    permissions.insert(Permission::RunSessions);

    permissions
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(SECRETARY_PERMISSIONS.iter().copied());
    permissions.extend(ACCOUNTANT_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageTeachers);
    permissions.insert(Permission::ManageClassrooms);
    permissions.insert(Permission::DeleteRecords);
    permissions.insert(Permission::ManageUsers);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Admin => &ADMIN_PERMISSIONS,
            Role::Secretary => &SECRETARY_PERMISSIONS,
            Role::Accountant => &ACCOUNTANT_PERMISSIONS,
            Role::Teacher => &TEACHER_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Secretary => "secretary",
            Role::Accountant => "accountant",
            Role::Teacher => "teacher",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "admin" => Ok(Role::Admin),
            "secretary" => Ok(Role::Secretary),
            "accountant" => Ok(Role::Accountant),
            "teacher" => Ok(Role::Teacher),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
